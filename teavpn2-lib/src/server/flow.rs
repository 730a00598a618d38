#![forbid(unsafe_code)]

//! Per-session state machine, shared by the stream and datagram
//! engines: handshake, auth, then the active tunnel loop.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::engine::link::{LinkReader, LinkWriter};
use crate::error::{Error, ProtocolError, Result};
use crate::proto::{version, ClientPacket, ServerHandshake, ServerPacket};
use crate::session::Session;

use super::SrvState;

/// Drive one session from fresh to terminal. The caller releases the
/// slot afterwards, whatever the outcome.
pub(crate) async fn drive<R, W>(
    state: &SrvState,
    session: &Session,
    mut reader: R,
    mut writer: W,
    peer: SocketAddr,
    stop: watch::Receiver<bool>,
) -> Result<()>
where
    R: LinkReader<In = ClientPacket>,
    W: LinkWriter<Out = ServerPacket>,
{
    let handshake_window = Duration::from_secs(state.cfg.timeout.handshake_secs);
    let pkt = match timeout(handshake_window, reader.recv()).await {
        Ok(res) => res?,
        Err(_) => {
            let _ = writer.send(&ServerPacket::Close).await;
            return Err(Error::PhaseTimeout("handshake"));
        }
    };
    let client_ver = match pkt {
        Some(ClientPacket::Handshake(v)) => v,
        Some(other) => {
            let _ = writer.send(&ServerPacket::Close).await;
            return Err(ProtocolError::UnexpectedPacket {
                got: other.kind(),
                phase: "handshake",
            }
            .into());
        }
        None => return Err(Error::PeerClosed),
    };
    session.bump_recv();

    let advert = ServerHandshake::advertise(
        version::CURRENT,
        Some(version::OLDEST),
        Some(version::CURRENT),
    );
    writer.send(&ServerPacket::Handshake(advert)).await?;
    session.bump_send();
    if !advert.accepts(&client_ver) {
        warn!(%peer, version = %client_ver, "incompatible client version");
        let _ = writer.send(&ServerPacket::Close).await;
        return Err(Error::VersionMismatch(client_ver));
    }
    debug!(%peer, version = %client_ver, "handshake complete");

    let auth_window = Duration::from_secs(state.cfg.timeout.auth_secs);
    let creds = match timeout(auth_window, reader.recv()).await {
        Ok(Ok(Some(ClientPacket::Auth(creds)))) => creds,
        Ok(Ok(Some(_))) | Err(_) => {
            let _ = writer.send(&ServerPacket::AuthReject).await;
            return Err(Error::AuthRejected);
        }
        Ok(Ok(None)) => return Err(Error::PeerClosed),
        Ok(Err(e)) => return Err(e),
    };
    session.bump_recv();
    session.set_username(creds.username());

    let Some(iff) = state.auth.authenticate(&creds) else {
        info!(%peer, user = creds.username(), "authentication rejected");
        let _ = writer.send(&ServerPacket::AuthReject).await;
        return Err(Error::AuthRejected);
    };
    if let Err(e) = state.table.bind_ip(session.slot(), iff.ipv4) {
        // Two accounts mapped onto one address is an operator mistake;
        // only the offending session pays for it.
        warn!(%peer, user = creds.username(), vip = %iff.ipv4, "virtual address collision");
        let _ = writer.send(&ServerPacket::AuthReject).await;
        return Err(e);
    }
    session.mark_authenticated(iff);
    writer.send(&ServerPacket::AuthOk(iff)).await?;
    session.bump_send();
    info!(%peer, user = creds.username(), vip = %iff.ipv4, "session authenticated");

    active(state, session, reader, writer, stop).await
}

async fn active<R, W>(
    state: &SrvState,
    session: &Session,
    mut reader: R,
    mut writer: W,
    mut stop: watch::Receiver<bool>,
) -> Result<()>
where
    R: LinkReader<In = ClientPacket>,
    W: LinkWriter<Out = ServerPacket>,
{
    let idle = Duration::from_secs(state.cfg.timeout.idle_secs);
    let threshold = state.cfg.err_threshold;
    let idle_timer = sleep(idle);
    tokio::pin!(idle_timer);
    let mut probe_outstanding = false;

    loop {
        tokio::select! {
            res = reader.recv() => {
                let pkt = match res {
                    Ok(Some(pkt)) => pkt,
                    Ok(None) => return Ok(()),
                    Err(Error::Protocol(pe)) => {
                        session.record_error();
                        // A bad datagram stands alone; a framing error
                        // on a stream desynchronizes everything after
                        // it.
                        if R::DATAGRAM && !session.is_expired(threshold) {
                            debug!(error = %pe, "malformed datagram");
                            continue;
                        }
                        let _ = writer.send(&ServerPacket::Close).await;
                        return Err(pe.into());
                    }
                    Err(e) => {
                        session.record_error();
                        return Err(e);
                    }
                };
                session.bump_recv();
                let answered_probe = probe_outstanding;
                probe_outstanding = false;
                idle_timer.as_mut().reset(Instant::now() + idle);
                match pkt {
                    ClientPacket::IfaceData(frame) => {
                        if let Err(e) = state.tun.send(&frame).await {
                            warn!(error = %e, "tun write failed");
                            session.record_error();
                            if session.is_expired(threshold) {
                                let _ = writer.send(&ServerPacket::Close).await;
                                return Err(Error::SessionExpired);
                            }
                        }
                    }
                    ClientPacket::Reqsync => {
                        session.reset_error();
                        // A REQSYNC that answers our own probe gets no
                        // counter-reply, or two idle peers would volley
                        // probes forever.
                        if !answered_probe {
                            writer.send(&ServerPacket::Reqsync).await?;
                            session.bump_send();
                        }
                    }
                    ClientPacket::Close => return Ok(()),
                    ClientPacket::Nop => {}
                    other => {
                        let _ = writer.send(&ServerPacket::Close).await;
                        return Err(ProtocolError::UnexpectedPacket {
                            got: other.kind(),
                            phase: "active",
                        }
                        .into());
                    }
                }
            }
            frame = session.next_frame() => {
                match writer.send(&ServerPacket::IfaceData(frame)).await {
                    Ok(()) => session.bump_send(),
                    Err(e) => {
                        debug!(error = %e, "tunnel frame send failed");
                        session.record_error();
                        if session.is_expired(threshold) {
                            return Err(Error::SessionExpired);
                        }
                    }
                }
            }
            _ = &mut idle_timer => {
                idle_timer.as_mut().reset(Instant::now() + idle);
                if probe_outstanding {
                    session.record_error();
                    if session.is_expired(threshold) {
                        let _ = writer.send(&ServerPacket::Close).await;
                        return Err(Error::SessionExpired);
                    }
                }
                writer.send(&ServerPacket::Reqsync).await?;
                session.bump_send();
                probe_outstanding = true;
            }
            _ = stop.changed() => {
                let _ = writer.send(&ServerPacket::Close).await;
                return Ok(());
            }
        }
    }
}

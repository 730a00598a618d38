#![forbid(unsafe_code)]

//! Client side of the per-session state machine: offer a handshake,
//! authenticate, apply the assigned interface parameters, then pump
//! frames both ways.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::engine::link::{LinkReader, LinkWriter};
use crate::error::{Error, ProtocolError, Result};
use crate::proto::{version, ClientPacket, Credentials, ServerPacket, MAX_PAYLOAD};
use crate::tun::{IfaceConfigurator, TunDevice};

pub(crate) async fn drive<R, W>(
    cfg: &ClientConfig,
    tun: &TunDevice,
    iface: &dyn IfaceConfigurator,
    mut reader: R,
    mut writer: W,
    stop: watch::Receiver<bool>,
) -> Result<()>
where
    R: LinkReader<In = ServerPacket>,
    W: LinkWriter<Out = ClientPacket>,
{
    writer
        .send(&ClientPacket::Handshake(version::CURRENT))
        .await?;

    let handshake_window = Duration::from_secs(cfg.timeout.handshake_secs);
    let offer = match timeout(handshake_window, reader.recv()).await {
        Ok(res) => res?,
        Err(_) => return Err(Error::PhaseTimeout("handshake")),
    };
    let advert = match offer {
        Some(ServerPacket::Handshake(hs)) => hs,
        Some(ServerPacket::Close) | None => return Err(Error::PeerClosed),
        Some(other) => {
            return Err(ProtocolError::UnexpectedPacket {
                got: other.kind(),
                phase: "handshake",
            }
            .into())
        }
    };
    if !advert.accepts(&version::CURRENT) {
        warn!(server = %advert.cur, ours = %version::CURRENT, "server rejects our version");
        let _ = writer.send(&ClientPacket::Close).await;
        return Err(Error::VersionMismatch(version::CURRENT));
    }
    debug!(server = %advert.cur, "handshake complete");

    let creds = Credentials::new(&cfg.auth.username, &cfg.auth.password)?;
    writer.send(&ClientPacket::Auth(creds)).await?;

    let auth_window = Duration::from_secs(cfg.timeout.auth_secs);
    let reply = match timeout(auth_window, reader.recv()).await {
        Ok(res) => res?,
        Err(_) => return Err(Error::PhaseTimeout("auth")),
    };
    let iff = match reply {
        Some(ServerPacket::AuthOk(iff)) => iff,
        Some(ServerPacket::AuthReject) => return Err(Error::AuthRejected),
        Some(ServerPacket::Close) | None => return Err(Error::PeerClosed),
        Some(other) => {
            return Err(ProtocolError::UnexpectedPacket {
                got: other.kind(),
                phase: "auth",
            }
            .into())
        }
    };
    iface.apply(&iff)?;
    info!(vip = %iff.ipv4, gw = %iff.gateway, mtu = iff.mtu, "tunnel established");

    active(cfg, tun, reader, writer, stop).await
}

async fn active<R, W>(
    cfg: &ClientConfig,
    tun: &TunDevice,
    mut reader: R,
    mut writer: W,
    mut stop: watch::Receiver<bool>,
) -> Result<()>
where
    R: LinkReader<In = ServerPacket>,
    W: LinkWriter<Out = ClientPacket>,
{
    let idle = Duration::from_secs(cfg.timeout.idle_secs);
    let threshold = cfg.err_threshold;
    let idle_timer = sleep(idle);
    tokio::pin!(idle_timer);
    let mut probe_outstanding = false;
    let mut err_c: u8 = 0;
    let mut tun_buf = vec![0u8; MAX_PAYLOAD];

    loop {
        tokio::select! {
            res = reader.recv() => {
                let pkt = match res {
                    Ok(Some(pkt)) => pkt,
                    Ok(None) => return Err(Error::PeerClosed),
                    Err(Error::Protocol(pe)) => {
                        err_c = err_c.saturating_add(1);
                        if R::DATAGRAM && err_c < threshold {
                            debug!(error = %pe, "malformed datagram");
                            continue;
                        }
                        let _ = writer.send(&ClientPacket::Close).await;
                        return Err(pe.into());
                    }
                    Err(e) => return Err(e),
                };
                let answered_probe = probe_outstanding;
                probe_outstanding = false;
                idle_timer.as_mut().reset(Instant::now() + idle);
                match pkt {
                    ServerPacket::IfaceData(frame) => {
                        if let Err(e) = tun.send(&frame).await {
                            warn!(error = %e, "tun write failed");
                            err_c = err_c.saturating_add(1);
                            if err_c >= threshold {
                                let _ = writer.send(&ClientPacket::Close).await;
                                return Err(Error::SessionExpired);
                            }
                        }
                    }
                    ServerPacket::Reqsync => {
                        err_c = 0;
                        // Replying to a reply would volley probes
                        // forever between two idle peers.
                        if !answered_probe {
                            writer.send(&ClientPacket::Reqsync).await?;
                        }
                    }
                    ServerPacket::Close => return Ok(()),
                    ServerPacket::Nop => {}
                    other => {
                        let _ = writer.send(&ClientPacket::Close).await;
                        return Err(ProtocolError::UnexpectedPacket {
                            got: other.kind(),
                            phase: "active",
                        }
                        .into());
                    }
                }
            }
            res = tun.recv(&mut tun_buf) => {
                let n = res?;
                let frame = Bytes::copy_from_slice(&tun_buf[..n]);
                if let Err(e) = writer.send(&ClientPacket::IfaceData(frame)).await {
                    debug!(error = %e, "tunnel frame send failed");
                    err_c = err_c.saturating_add(1);
                    if err_c >= threshold {
                        return Err(Error::SessionExpired);
                    }
                }
            }
            _ = &mut idle_timer => {
                idle_timer.as_mut().reset(Instant::now() + idle);
                if probe_outstanding {
                    err_c = err_c.saturating_add(1);
                    if err_c >= threshold {
                        let _ = writer.send(&ClientPacket::Close).await;
                        return Err(Error::SessionExpired);
                    }
                }
                writer.send(&ClientPacket::Reqsync).await?;
                probe_outstanding = true;
            }
            _ = stop.changed() => {
                let _ = writer.send(&ClientPacket::Close).await;
                return Ok(());
            }
        }
    }
}

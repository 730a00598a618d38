#![forbid(unsafe_code)]

//! TCP engine. The accept task allocates slots and hands sessions to
//! workers round-robin through their wake-up channels; each worker owns
//! its sessions until they die. One pump task moves frames from the
//! tunnel device toward the sessions' outbound queues.

use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::engine::link::stream_link;
use crate::engine::{join_or_leak, OnlineTasks, TeardownReport, WorkerPool};
use crate::error::Result;
use crate::proto::codec;
use crate::session::Session;

use super::{flow, SrvState};

/// Depth of each worker's wake-up channel.
const HANDOFF_DEPTH: usize = 8;

struct Handoff {
    session: Arc<Session>,
    stream: TcpStream,
    peer: SocketAddr,
}

pub async fn run(
    cfg: crate::config::ServerConfig,
    tun: crate::tun::TunDevice,
    external_stop: watch::Receiver<bool>,
) -> Result<TeardownReport> {
    let workers = super::worker_count(&cfg);
    let (stop_tx, stop_rx) = watch::channel(false);
    super::forward_stop(external_stop, stop_tx.clone());

    let state = Arc::new(SrvState::new(cfg, tun, stop_tx));
    let (pool, handoff_rxs) = WorkerPool::new(workers, HANDOFF_DEPTH);

    let listener = bind_listener(&state.cfg)?;
    state.table.mark_listener(listener.as_raw_fd());
    info!(
        addr = %listener.local_addr()?,
        workers,
        max_conn = state.table.capacity(),
        "tcp server listening"
    );

    let online = Arc::new(OnlineTasks::new());
    for (idx, rx) in handoff_rxs.into_iter().enumerate() {
        online.enter();
        tokio::spawn(worker_loop(
            idx,
            rx,
            state.clone(),
            online.clone(),
            stop_rx.clone(),
        ));
    }
    online.enter();
    tokio::spawn(super::tun_pump(
        state.clone(),
        online.clone(),
        stop_rx.clone(),
    ));

    accept_loop(&state, &pool, &listener, stop_rx).await;

    // Teardown reverses init: stop accepting, close the handoff
    // channels, then wait on the interlock before the state goes away.
    drop(listener);
    drop(pool);
    let grace = Duration::from_secs(state.cfg.timeout.grace_secs);
    Ok(join_or_leak(&online, grace, state).await)
}

fn bind_listener(cfg: &crate::config::ServerConfig) -> Result<TcpListener> {
    let addr = cfg.sock.listen;
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(cfg.sock.backlog.min(i32::MAX as u32) as i32)?;
    Ok(TcpListener::from_std(socket.into())?)
}

async fn accept_loop(
    state: &Arc<SrvState>,
    pool: &WorkerPool<Handoff>,
    listener: &TcpListener,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            res = listener.accept() => match res {
                Ok(pair) => pair,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
            _ = stop.changed() => break,
        };

        let Some(session) = state.table.acquire() else {
            // Full house: the connection was accepted and is closed
            // right away, leaving existing sessions untouched.
            if state.note_full() {
                debug!(%peer, "server full, dropping connection");
            } else {
                warn!(%peer, "server full, dropping connection");
            }
            continue;
        };
        state.note_slot_ok();

        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "failed to set TCP_NODELAY");
        }
        let fd = stream.as_raw_fd();
        session.bind_fd(fd);
        state.table.bind_fd(session.slot(), fd);
        info!(%peer, slot = session.slot(), "connection accepted");

        let slot = session.slot();
        let handed = pool
            .dispatch(Handoff {
                session,
                stream,
                peer,
            })
            .await;
        if !handed {
            warn!(%peer, slot, "no worker accepted the session");
            if let Err(e) = state.table.release(slot) {
                debug!(slot, error = %e, "release after failed handoff");
            }
        }
    }
}

async fn worker_loop(
    idx: usize,
    mut handoffs: mpsc::Receiver<Handoff>,
    state: Arc<SrvState>,
    online: Arc<OnlineTasks>,
    mut stop: watch::Receiver<bool>,
) {
    debug!(worker = idx, "worker online");
    let mut sessions: JoinSet<()> = JoinSet::new();
    loop {
        tokio::select! {
            handoff = handoffs.recv() => match handoff {
                Some(h) => {
                    let state = state.clone();
                    let stop = stop.clone();
                    sessions.spawn(serve_session(state, h, stop));
                }
                None => break,
            },
            _ = stop.changed() => break,
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
        }
    }
    // Let the sessions finish their CLOSE exchanges before checking
    // out of the interlock.
    while sessions.join_next().await.is_some() {}
    debug!(worker = idx, "worker offline");
    online.leave();
}

async fn serve_session(state: Arc<SrvState>, handoff: Handoff, stop: watch::Receiver<bool>) {
    let Handoff {
        session,
        stream,
        peer,
    } = handoff;
    session.mark_connected();
    let slot = session.slot();

    let (reader, writer) = stream_link(stream, codec::decode_client, codec::encode_server);
    match flow::drive(&state, &session, reader, writer, peer, stop).await {
        Ok(()) => info!(
            %peer,
            slot,
            recv = session.recv_count(),
            sent = session.send_count(),
            "session closed"
        ),
        Err(e) => warn!(%peer, slot, error = %e, "session ended"),
    }
    if let Err(e) = state.table.release(slot) {
        debug!(slot, error = %e, "slot already released");
    }
}

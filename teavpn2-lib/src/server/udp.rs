#![forbid(unsafe_code)]

//! UDP engine. One shared socket; the demultiplexer resolves each
//! datagram's source address to its session and feeds the frame through
//! that session's inbound channel. Sessions are handed to workers
//! round-robin exactly like the stream engine, and run the same state
//! machine.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::engine::link::{DatagramChanReader, DatagramWriter};
use crate::engine::{join_or_leak, OnlineTasks, TeardownReport, WorkerPool};
use crate::error::Result;
use crate::proto::{codec, ServerPacket, MAX_FRAME};
use crate::session::Session;

use super::{flow, SrvState};

const HANDOFF_DEPTH: usize = 8;

/// Datagrams a session may have in flight before the demultiplexer
/// starts shedding.
const INBOUND_DEPTH: usize = 32;

struct Handoff {
    session: Arc<Session>,
    inbound: mpsc::Receiver<Bytes>,
    peer: SocketAddr,
    socket: Arc<UdpSocket>,
    dead: mpsc::Sender<SocketAddr>,
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

    let socket = Arc::new(UdpSocket::bind(state.cfg.sock.listen).await?);
    state.table.mark_listener(socket.as_raw_fd());
    info!(
        addr = %socket.local_addr()?,
        workers,
        max_conn = state.table.capacity(),
        "udp server listening"
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

    demux_loop(&state, &pool, &socket, stop_rx).await;

    drop(pool);
    let grace = Duration::from_secs(state.cfg.timeout.grace_secs);
    Ok(join_or_leak(&online, grace, state).await)
}

async fn demux_loop(
    state: &Arc<SrvState>,
    pool: &WorkerPool<Handoff>,
    socket: &Arc<UdpSocket>,
    mut stop: watch::Receiver<bool>,
) {
    let mut inbounds: HashMap<SocketAddr, mpsc::Sender<Bytes>> = HashMap::new();
    let (dead_tx, mut dead_rx) = mpsc::channel::<SocketAddr>(64);
    let mut buf = vec![0u8; MAX_FRAME + 1];
    loop {
        tokio::select! {
            res = socket.recv_from(&mut buf) => {
                let (n, peer) = match res {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "udp recv failed");
                        continue;
                    }
                };
                let datagram = Bytes::copy_from_slice(&buf[..n]);
                if let Some(tx) = inbounds.get(&peer) {
                    if tx.try_send(datagram).is_err() {
                        debug!(%peer, "inbound channel full, datagram dropped");
                    }
                    continue;
                }
                attach_peer(state, pool, socket, &mut inbounds, &dead_tx, peer, datagram).await;
            }
            Some(peer) = dead_rx.recv() => {
                inbounds.remove(&peer);
            }
            _ = stop.changed() => break,
        }
    }
}

/// First datagram from an unknown source: allocate a slot, wire up the
/// inbound channel and hand the session to a worker.
async fn attach_peer(
    state: &Arc<SrvState>,
    pool: &WorkerPool<Handoff>,
    socket: &Arc<UdpSocket>,
    inbounds: &mut HashMap<SocketAddr, mpsc::Sender<Bytes>>,
    dead: &mpsc::Sender<SocketAddr>,
    peer: SocketAddr,
    datagram: Bytes,
) {
    let Some(session) = state.table.acquire() else {
        if state.note_full() {
            debug!(%peer, "server full, rejecting peer");
        } else {
            warn!(%peer, "server full, rejecting peer");
        }
        let mut close = BytesMut::new();
        if codec::encode_server(&ServerPacket::Close, &mut close).is_ok() {
            let _ = socket.try_send_to(&close, peer);
        }
        return;
    };
    state.note_slot_ok();
    state.table.bind_peer(session.slot(), peer);
    info!(%peer, slot = session.slot(), "peer attached");

    let (tx, rx) = mpsc::channel(INBOUND_DEPTH);
    // The triggering datagram must not be lost; the channel is empty.
    let _ = tx.try_send(datagram);
    inbounds.insert(peer, tx);

    let slot = session.slot();
    let handed = pool
        .dispatch(Handoff {
            session,
            inbound: rx,
            peer,
            socket: socket.clone(),
            dead: dead.clone(),
        })
        .await;
    if !handed {
        warn!(%peer, slot, "no worker accepted the session");
        inbounds.remove(&peer);
        if let Err(e) = state.table.release(slot) {
            debug!(slot, error = %e, "release after failed handoff");
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
    while sessions.join_next().await.is_some() {}
    debug!(worker = idx, "worker offline");
    online.leave();
}

async fn serve_session(state: Arc<SrvState>, handoff: Handoff, stop: watch::Receiver<bool>) {
    let Handoff {
        session,
        inbound,
        peer,
        socket,
        dead,
    } = handoff;
    session.mark_connected();
    let slot = session.slot();

    let reader = DatagramChanReader::new(inbound, codec::decode_client_datagram);
    let writer = DatagramWriter::new(socket, Some(peer), codec::encode_server);
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
    let _ = dead.send(peer).await;
}

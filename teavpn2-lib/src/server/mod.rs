#![forbid(unsafe_code)]

//! Server lifecycle: fixed init order, signal wiring, engine dispatch
//! by socket type, and the interlocked teardown.

mod flow;
pub mod tcp;
pub mod udp;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::StaticAuth;
use crate::config::{ServerConfig, SockType};
use crate::engine::{self, OnlineTasks, TeardownReport};
use crate::error::Result;
use crate::proto::MAX_PAYLOAD;
use crate::session::SessionTable;
use crate::signal;
use crate::tun::{self, TunDevice};

/// Consecutive slot-exhaustion rejections before emergency mode
/// engages and per-peer noise is demoted to debug.
const EMERGENCY_AFTER: u32 = 16;

pub(crate) struct SrvState {
    pub(crate) cfg: ServerConfig,
    pub(crate) table: SessionTable,
    pub(crate) auth: StaticAuth,
    pub(crate) tun: TunDevice,
    pub(crate) stop: watch::Sender<bool>,
    in_emergency: AtomicBool,
    full_streak: AtomicU32,
}

impl SrvState {
    pub(crate) fn new(cfg: ServerConfig, tun: TunDevice, stop: watch::Sender<bool>) -> Self {
        let table = SessionTable::new(cfg.sock.max_conn, engine::DEFAULT_QUEUE_CAP);
        let auth = StaticAuth::from_config(&cfg);
        Self {
            cfg,
            table,
            auth,
            tun,
            stop,
            in_emergency: AtomicBool::new(false),
            full_streak: AtomicU32::new(0),
        }
    }

    pub(crate) fn in_emergency(&self) -> bool {
        self.in_emergency.load(Ordering::Acquire)
    }

    /// Record one slot-exhaustion rejection. Returns whether emergency
    /// mode is active.
    pub(crate) fn note_full(&self) -> bool {
        let streak = self.full_streak.fetch_add(1, Ordering::AcqRel) + 1;
        if streak >= EMERGENCY_AFTER && !self.in_emergency.swap(true, Ordering::AcqRel) {
            tracing::warn!(streak, "slot exhaustion persists, entering emergency mode");
        }
        self.in_emergency()
    }

    /// Record a successful allocation, clearing any emergency.
    pub(crate) fn note_slot_ok(&self) {
        self.full_streak.store(0, Ordering::Release);
        if self.in_emergency.swap(false, Ordering::AcqRel) {
            info!("slot pressure cleared, leaving emergency mode");
        }
    }

    /// Fatal internal error: request an orderly shutdown.
    pub(crate) fn request_stop(&self) {
        self.stop.send_replace(true);
    }
}

/// Run the server with signal handling wired up. Returns once a
/// terminating signal or a fatal error stopped the engine.
pub async fn serve(cfg: ServerConfig, tun: TunDevice) -> Result<TeardownReport> {
    let (stop_tx, stop_rx) = watch::channel(false);
    signal::register(stop_tx);
    signal::spawn_watcher();
    let ret = run(cfg, tun, stop_rx).await;
    signal::deregister();
    ret
}

/// Run the server until `stop` flips. The tunnel device must already
/// exist; creating it is the caller's business.
pub async fn run(
    cfg: ServerConfig,
    tun: TunDevice,
    stop: watch::Receiver<bool>,
) -> Result<TeardownReport> {
    engine::select_event_loop(cfg.event_loop)?;
    match cfg.sock.sock_type {
        SockType::Tcp => tcp::run(cfg, tun, stop).await,
        SockType::Udp => udp::run(cfg, tun, stop).await,
    }
}

pub(crate) fn worker_count(cfg: &ServerConfig) -> usize {
    cfg.workers
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(usize::from)
                .unwrap_or(2)
        })
        .max(1)
}

/// Move frames from the tunnel device to the owning sessions' outbound
/// queues. Frames without an authenticated owner are dropped silently,
/// no ICMP is emitted.
pub(crate) async fn tun_pump(
    state: Arc<SrvState>,
    online: Arc<OnlineTasks>,
    mut stop: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_PAYLOAD];
    loop {
        let n = tokio::select! {
            res = state.tun.recv(&mut buf) => match res {
                Ok(n) => n,
                Err(e) => {
                    // Losing the device is fatal to the whole engine.
                    warn!(error = %e, "tun read failed, requesting shutdown");
                    state.request_stop();
                    break;
                }
            },
            _ = stop.changed() => break,
        };
        let Some(dst) = tun::ipv4_dst(&buf[..n]) else {
            continue;
        };
        if let Some(session) = state.table.by_ip(dst) {
            if session.push_frame(Bytes::copy_from_slice(&buf[..n])) {
                session.record_error();
                if !state.in_emergency() {
                    debug!(slot = session.slot(), %dst, "outbound queue full, dropped oldest");
                }
            }
        }
    }
    online.leave();
}

/// Mirror an external stop request into the engine's own channel, so
/// embedders and signals share one path with fatal internal errors.
pub(crate) fn forward_stop(mut external: watch::Receiver<bool>, internal: watch::Sender<bool>) {
    tokio::spawn(async move {
        let mut engine_down = internal.subscribe();
        loop {
            if *external.borrow() {
                internal.send_replace(true);
                return;
            }
            tokio::select! {
                changed = external.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = engine_down.changed() => return,
            }
        }
    });
}

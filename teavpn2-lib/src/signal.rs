#![forbid(unsafe_code)]

//! Signal dispatch facade.
//!
//! The running lifecycle registers its stop channel here at startup and
//! deregisters at teardown; the watcher task flips whatever is
//! currently registered. This registry is the only module-level mutable
//! state in the crate.

use std::sync::{Mutex, MutexGuard};

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{info, warn};

static REGISTRY: Mutex<Option<watch::Sender<bool>>> = Mutex::new(None);

fn registry() -> MutexGuard<'static, Option<watch::Sender<bool>>> {
    REGISTRY.lock().unwrap_or_else(|e| e.into_inner())
}

/// Install the stop channel terminating signals will flip.
pub fn register(stop: watch::Sender<bool>) {
    *registry() = Some(stop);
}

/// Remove the registered stop channel, if any.
pub fn deregister() {
    *registry() = None;
}

fn fire(name: &str) {
    info!(signal = name, "caught terminating signal");
    if let Some(stop) = registry().as_ref() {
        stop.send_replace(true);
    }
}

/// Spawn the signal watcher. SIGHUP, SIGINT, SIGTERM and SIGQUIT each
/// request an orderly shutdown; SIGPIPE is sunk so a dead peer cannot
/// kill the process.
pub fn spawn_watcher() {
    tokio::spawn(async {
        let streams = (
            signal(SignalKind::hangup()),
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
            signal(SignalKind::quit()),
            signal(SignalKind::pipe()),
        );
        let (Ok(mut hup), Ok(mut int), Ok(mut term), Ok(mut quit), Ok(mut pipe)) = streams
        else {
            warn!("failed to install signal handlers");
            return;
        };
        loop {
            tokio::select! {
                _ = hup.recv() => fire("SIGHUP"),
                _ = int.recv() => fire("SIGINT"),
                _ = term.recv() => fire("SIGTERM"),
                _ = quit.recv() => fire("SIGQUIT"),
                // Receiving at all is the point: the default disposition
                // would terminate the process.
                _ = pipe.recv() => {}
            }
        }
    });
}

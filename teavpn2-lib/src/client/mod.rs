#![forbid(unsafe_code)]

//! Client lifecycle: connect, tunnel, and the reconnect regime with
//! exponential backoff. The tunnel device is created by the caller; the
//! server-assigned parameters are applied through the configurator
//! seam once AUTH_OK arrives.

mod flow;
pub mod tcp;
pub mod udp;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::config::{ClientConfig, SockType};
use crate::engine;
use crate::error::{Error, Result};
use crate::signal;
use crate::tun::{IfaceConfigurator, TunDevice};

/// Cap on the backoff delay between reconnect attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Run the client with signal handling wired up.
pub async fn serve(
    cfg: ClientConfig,
    tun: TunDevice,
    iface: Arc<dyn IfaceConfigurator>,
) -> Result<()> {
    let (stop_tx, stop_rx) = watch::channel(false);
    signal::register(stop_tx);
    signal::spawn_watcher();
    let ret = run(cfg, tun, iface, stop_rx).await;
    signal::deregister();
    ret
}

/// Run the client until `stop` flips, the session ends without
/// reconnect, or a fatal error occurs.
pub async fn run(
    cfg: ClientConfig,
    tun: TunDevice,
    iface: Arc<dyn IfaceConfigurator>,
    mut stop: watch::Receiver<bool>,
) -> Result<()> {
    engine::select_event_loop(cfg.event_loop)?;

    let mut attempt: u32 = 0;
    loop {
        if *stop.borrow() {
            return Ok(());
        }
        let res = match cfg.sock.sock_type {
            SockType::Tcp => tcp::run_once(&cfg, &tun, iface.as_ref(), stop.clone()).await,
            SockType::Udp => udp::run_once(&cfg, &tun, iface.as_ref(), stop.clone()).await,
        };
        match res {
            Ok(()) => {
                if *stop.borrow() {
                    return Ok(());
                }
                info!("session ended by the server");
                // The tunnel was up, so the retry count starts over.
                attempt = 0;
                if !cfg.reconnect.enabled {
                    return Ok(());
                }
            }
            Err(e) if is_fatal(&e) => return Err(e),
            Err(e) => {
                warn!(error = %e, "session failed");
                if !cfg.reconnect.enabled {
                    return Err(e);
                }
            }
        }
        attempt += 1;
        if attempt > cfg.reconnect.max_tries {
            return Err(Error::ReconnectExhausted);
        }
        let delay = backoff(cfg.reconnect.base_delay_ms, attempt);
        info!(attempt, ?delay, "reconnecting");
        tokio::select! {
            _ = sleep(delay) => {}
            _ = stop.changed() => return Ok(()),
        }
    }
}

/// Errors reconnecting cannot fix.
fn is_fatal(e: &Error) -> bool {
    matches!(
        e,
        Error::AuthRejected
            | Error::VersionMismatch(_)
            | Error::Protocol(_)
            | Error::Config(_)
            | Error::EventLoopUnsupported(_)
    )
}

fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let ms = base_ms.saturating_mul(1u64 << exp);
    Duration::from_millis(ms).min(MAX_BACKOFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        assert_eq!(backoff(500, 1), Duration::from_millis(500));
        assert_eq!(backoff(500, 2), Duration::from_millis(1000));
        assert_eq!(backoff(500, 3), Duration::from_millis(2000));
        assert_eq!(backoff(500, 12), MAX_BACKOFF);
    }
}

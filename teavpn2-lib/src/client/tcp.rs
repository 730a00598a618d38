#![forbid(unsafe_code)]

use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::engine::link::stream_link;
use crate::error::Result;
use crate::proto::codec;
use crate::tun::{IfaceConfigurator, TunDevice};

use super::flow;

/// One connect-to-close TCP session.
pub(crate) async fn run_once(
    cfg: &ClientConfig,
    tun: &TunDevice,
    iface: &dyn IfaceConfigurator,
    stop: watch::Receiver<bool>,
) -> Result<()> {
    info!(server = %cfg.sock.server, "connecting");
    let stream = TcpStream::connect(cfg.sock.server).await?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "failed to set TCP_NODELAY");
    }
    let (reader, writer) = stream_link(stream, codec::decode_server, codec::encode_client);
    flow::drive(cfg, tun, iface, reader, writer, stop).await
}

#![forbid(unsafe_code)]

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::info;

use crate::config::ClientConfig;
use crate::engine::link::{DatagramSockReader, DatagramWriter};
use crate::error::Result;
use crate::proto::codec;
use crate::tun::{IfaceConfigurator, TunDevice};

use super::flow;

/// One attach-to-close UDP session over a connected socket.
pub(crate) async fn run_once(
    cfg: &ClientConfig,
    tun: &TunDevice,
    iface: &dyn IfaceConfigurator,
    stop: watch::Receiver<bool>,
) -> Result<()> {
    let local: SocketAddr = if cfg.sock.server.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(cfg.sock.server).await?;
    info!(server = %cfg.sock.server, "udp socket attached");

    let socket = Arc::new(socket);
    let reader = DatagramSockReader::new(socket.clone(), codec::decode_server_datagram);
    let writer = DatagramWriter::new(socket, None, codec::encode_client);
    flow::drive(cfg, tun, iface, reader, writer, stop).await
}

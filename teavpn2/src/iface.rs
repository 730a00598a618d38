//! TUN device creation and interface configuration. Everything that
//! touches ioctls or iproute2 lives here; the engine only ever sees a
//! non-blocking descriptor and the configurator seam.

use std::io;
use std::os::fd::{FromRawFd, IntoRawFd, OwnedFd};
use std::process::Command;

use teavpn2_lib::config::IfaceConfig;
use teavpn2_lib::proto::IfInfo;
use teavpn2_lib::tun::IfaceConfigurator;
use teavpn2_lib::{Error, Result, TunDevice};
use tracing::info;

/// Create and fully configure the server-side device; its parameters
/// are all known up front.
pub fn create_server_tun(cfg: &IfaceConfig) -> Result<TunDevice> {
    info!(dev = %cfg.dev, ipv4 = %cfg.ipv4, "creating virtual network interface");
    let mut config = tun::Configuration::default();
    config
        .name(&cfg.dev)
        .layer(tun::Layer::L3)
        .address(cfg.ipv4)
        .netmask(cfg.netmask)
        .mtu(i32::from(cfg.mtu))
        .up();
    config.platform(|p| {
        p.packet_information(false);
    });
    wrap_device(tun::create(&config).map_err(tun_err)?)
}

/// Create the client-side device bare; address, netmask and MTU arrive
/// from the server in AUTH_OK.
pub fn create_client_tun(dev: &str) -> Result<TunDevice> {
    info!(dev, "creating virtual network interface");
    let mut config = tun::Configuration::default();
    config.name(dev).layer(tun::Layer::L3);
    config.platform(|p| {
        p.packet_information(false);
    });
    wrap_device(tun::create(&config).map_err(tun_err)?)
}

fn wrap_device(device: tun::platform::Device) -> Result<TunDevice> {
    device.set_nonblock()?;
    // The descriptor's sole owner from here on is the engine wrapper.
    #[allow(unsafe_code)]
    let fd = unsafe { OwnedFd::from_raw_fd(device.into_raw_fd()) };
    Ok(TunDevice::from_owned_fd(fd)?)
}

fn tun_err(e: tun::Error) -> Error {
    Error::Config(format!("tun device: {e}"))
}

/// Applies server-assigned parameters with iproute2, the same way an
/// operator would by hand.
pub struct IprouteConfigurator {
    dev: String,
}

impl IprouteConfigurator {
    pub fn new(dev: String) -> Self {
        Self { dev }
    }
}

impl IfaceConfigurator for IprouteConfigurator {
    fn apply(&self, info: &IfInfo) -> io::Result<()> {
        let prefix = u32::from(info.netmask).count_ones();
        run_ip(&[
            "addr",
            "add",
            &format!("{}/{prefix}", info.ipv4),
            "dev",
            &self.dev,
        ])?;
        run_ip(&[
            "link",
            "set",
            "dev",
            &self.dev,
            "mtu",
            &info.mtu.to_string(),
        ])?;
        run_ip(&["link", "set", "dev", &self.dev, "up"])?;
        info!(dev = %self.dev, ipv4 = %info.ipv4, mtu = info.mtu, "interface configured");
        Ok(())
    }
}

fn run_ip(args: &[&str]) -> io::Result<()> {
    let status = Command::new("ip").args(args).status()?;
    if !status.success() {
        return Err(io::Error::other(format!(
            "ip {} exited with {status}",
            args.join(" ")
        )));
    }
    Ok(())
}

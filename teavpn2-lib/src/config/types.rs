use std::net::Ipv4Addr;

use serde::Deserialize;

/// Transport the tunnel runs over
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SockType {
    Tcp,
    Udp,
}

/// Event-loop shape the engine runs on
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EventLoop {
    #[default]
    Epoll,
    IoUring,
}

/// Virtual network interface parameters
#[derive(Debug, Deserialize, Clone)]
pub struct IfaceConfig {
    /// Device name, e.g. "teavpn2-srv"
    pub dev: String,
    /// Address of the interface inside the VPN; also handed to clients
    /// as their gateway
    pub ipv4: Ipv4Addr,
    /// Netmask of the VPN subnet
    pub netmask: Ipv4Addr,
    /// Interface MTU
    /// Default: 1500
    #[serde(default = "default_mtu")]
    pub mtu: u16,
}

/// Timeout configuration
#[derive(Debug, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Maximum time for the HANDSHAKE exchange in seconds
    /// Default: 10
    #[serde(default = "default_handshake_secs")]
    pub handshake_secs: u64,
    /// Maximum time for the AUTH exchange in seconds
    /// Default: 10
    #[serde(default = "default_auth_secs")]
    pub auth_secs: u64,
    /// Idle time before a REQSYNC probe is sent, in seconds. A probe
    /// that stays unanswered for another window counts as an error.
    /// Default: 30
    #[serde(default = "default_idle_secs")]
    pub idle_secs: u64,
    /// Grace period for engine tasks to exit at teardown, in seconds
    /// Default: 5
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            handshake_secs: default_handshake_secs(),
            auth_secs: default_auth_secs(),
            idle_secs: default_idle_secs(),
            grace_secs: default_grace_secs(),
        }
    }
}

fn default_mtu() -> u16 {
    1500
}

fn default_handshake_secs() -> u64 {
    10
}

fn default_auth_secs() -> u64 {
    10
}

fn default_idle_secs() -> u64 {
    30
}

fn default_grace_secs() -> u64 {
    5
}

pub(crate) fn default_err_threshold() -> u8 {
    5
}

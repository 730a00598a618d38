use std::net::{Ipv4Addr, SocketAddr};

use serde::Deserialize;

use super::types::{default_err_threshold, EventLoop, IfaceConfig, TimeoutConfig};

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Event-loop shape
    /// Default: "epoll"
    #[serde(default)]
    pub event_loop: EventLoop,
    /// Worker count; derived from the online CPU count when unset
    #[serde(default)]
    pub workers: Option<usize>,
    /// Consecutive errors before a session is closed
    /// Default: 5
    #[serde(default = "default_err_threshold")]
    pub err_threshold: u8,
    pub sock: ServerSockConfig,
    pub iface: IfaceConfig,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    /// Accounts allowed to authenticate, each with its assigned
    /// virtual address
    pub users: Vec<UserConfig>,
}

/// Server socket configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSockConfig {
    /// Transport: "tcp" or "udp"
    #[serde(rename = "type")]
    pub sock_type: super::types::SockType,
    /// Address and port to listen on
    /// Example: "0.0.0.0:55555"
    pub listen: SocketAddr,
    /// Listen backlog (TCP only)
    /// Default: 128
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    /// Maximum concurrent sessions
    /// Default: 32
    #[serde(default = "default_max_conn")]
    pub max_conn: u16,
}

/// One VPN account
#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
    /// Virtual address handed to this user in AUTH_OK
    pub ipv4: Ipv4Addr,
}

fn default_backlog() -> u32 {
    128
}

fn default_max_conn() -> u16 {
    32
}

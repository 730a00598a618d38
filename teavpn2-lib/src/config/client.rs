use std::net::SocketAddr;

use serde::Deserialize;

use super::types::{default_err_threshold, EventLoop, SockType, TimeoutConfig};

/// Client configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ClientConfig {
    /// Event-loop shape
    /// Default: "epoll"
    #[serde(default)]
    pub event_loop: EventLoop,
    /// Consecutive errors before the session is abandoned
    /// Default: 5
    #[serde(default = "default_err_threshold")]
    pub err_threshold: u8,
    pub sock: ClientSockConfig,
    pub iface: ClientIfaceConfig,
    pub auth: CredentialsConfig,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Client socket configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSockConfig {
    /// Transport: "tcp" or "udp"
    #[serde(rename = "type")]
    pub sock_type: SockType,
    /// Server address and port
    /// Example: "203.0.113.7:55555"
    pub server: SocketAddr,
}

/// Client-side interface configuration. Address, netmask and MTU come
/// from the server in AUTH_OK.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientIfaceConfig {
    /// Device name, e.g. "teavpn2-cli"
    pub dev: String,
}

/// Login credentials
#[derive(Debug, Deserialize, Clone)]
pub struct CredentialsConfig {
    pub username: String,
    pub password: String,
}

/// Reconnect behavior after a dropped session
#[derive(Debug, Deserialize, Clone)]
pub struct ReconnectConfig {
    /// Reconnect when the session drops
    /// Default: true
    #[serde(default = "default_reconnect_enabled")]
    pub enabled: bool,
    /// Give up after this many consecutive failed attempts
    /// Default: 8
    #[serde(default = "default_max_tries")]
    pub max_tries: u32,
    /// First retry delay in milliseconds; doubles per attempt, capped
    /// at 30 seconds
    /// Default: 500
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: default_reconnect_enabled(),
            max_tries: default_max_tries(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_max_tries() -> u32 {
    8
}

fn default_base_delay_ms() -> u64 {
    500
}

#![forbid(unsafe_code)]

pub mod auth;
pub mod client;
pub mod config;
pub mod engine;
pub mod error;
pub mod proto;
pub mod server;
pub mod session;
pub mod signal;
pub mod tun;

pub use auth::{Authenticator, StaticAuth};
pub use config::{load_client_from_path, load_server_from_path, ClientConfig, ServerConfig};
pub use engine::TeardownReport;
pub use error::{Error, ProtocolError, Result};
pub use proto::{ClientPacket, Credentials, IfInfo, ServerPacket, Version};
pub use session::{Session, SessionTable};
pub use tun::{IfaceConfigurator, TunDevice};

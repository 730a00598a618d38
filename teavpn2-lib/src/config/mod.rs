mod client;
mod loader;
mod server;
mod types;

pub use client::{ClientConfig, ClientIfaceConfig, ClientSockConfig, CredentialsConfig, ReconnectConfig};
pub use loader::{load_client_from_path, load_server_from_path};
pub use server::{ServerConfig, ServerSockConfig, UserConfig};
pub use types::{EventLoop, IfaceConfig, SockType, TimeoutConfig};

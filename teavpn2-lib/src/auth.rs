#![forbid(unsafe_code)]

//! Credential verification seam. The engine hands in an AUTH payload
//! and gets back the interface parameters to assign, or a rejection.

use crate::config::ServerConfig;
use crate::proto::{Credentials, IfInfo};

pub trait Authenticator: Send + Sync {
    /// Verify the credentials. `Some` carries the tunnel parameters the
    /// peer will be handed in AUTH_OK.
    fn authenticate(&self, creds: &Credentials) -> Option<IfInfo>;
}

struct StaticUser {
    username: String,
    password: String,
    if_info: IfInfo,
}

/// Authenticates against the `[[users]]` table of the server config.
pub struct StaticAuth {
    users: Vec<StaticUser>,
}

impl StaticAuth {
    pub fn from_config(cfg: &ServerConfig) -> Self {
        let users = cfg
            .users
            .iter()
            .map(|u| StaticUser {
                username: u.username.clone(),
                password: u.password.clone(),
                if_info: IfInfo {
                    ipv4: u.ipv4,
                    netmask: cfg.iface.netmask,
                    gateway: cfg.iface.ipv4,
                    mtu: cfg.iface.mtu,
                },
            })
            .collect();
        Self { users }
    }
}

impl Authenticator for StaticAuth {
    fn authenticate(&self, creds: &Credentials) -> Option<IfInfo> {
        // An empty password never authenticates, whatever the account
        // table says.
        if creds.password().is_empty() {
            return None;
        }
        self.users
            .iter()
            .find(|u| u.username == creds.username() && u.password == creds.password())
            .map(|u| u.if_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IfaceConfig, ServerConfig, ServerSockConfig, SockType, UserConfig};

    fn config() -> ServerConfig {
        ServerConfig {
            event_loop: Default::default(),
            workers: None,
            err_threshold: 5,
            sock: ServerSockConfig {
                sock_type: SockType::Tcp,
                listen: "127.0.0.1:0".parse().expect("addr"),
                backlog: 128,
                max_conn: 4,
            },
            iface: IfaceConfig {
                dev: "tvpn-test".into(),
                ipv4: "10.8.0.1".parse().expect("addr"),
                netmask: "255.255.255.0".parse().expect("addr"),
                mtu: 1500,
            },
            timeout: Default::default(),
            users: vec![UserConfig {
                username: "alice".into(),
                password: "secret".into(),
                ipv4: "10.8.0.2".parse().expect("addr"),
            }],
        }
    }

    #[test]
    fn known_user_gets_interface_parameters() {
        let auth = StaticAuth::from_config(&config());
        let creds = Credentials::new("alice", "secret").expect("creds");
        let iff = auth.authenticate(&creds).expect("accepted");
        assert_eq!(iff.ipv4, "10.8.0.2".parse::<std::net::Ipv4Addr>().expect("addr"));
        assert_eq!(iff.gateway, "10.8.0.1".parse::<std::net::Ipv4Addr>().expect("addr"));
        assert_eq!(iff.mtu, 1500);
    }

    #[test]
    fn wrong_password_and_empty_password_are_rejected() {
        let auth = StaticAuth::from_config(&config());
        let wrong = Credentials::new("alice", "nope").expect("creds");
        assert!(auth.authenticate(&wrong).is_none());
        let empty = Credentials::new("alice", "").expect("creds");
        assert!(auth.authenticate(&empty).is_none());
    }
}

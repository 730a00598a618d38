use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;

use crate::error::{Error, Result};
use crate::proto::{MAX_PAYLOAD, PASSWORD_CAP, USERNAME_CAP};
use crate::session::table::MAX_CONN_LIMIT;

use super::client::ClientConfig;
use super::server::ServerConfig;

pub fn load_server_from_path<P: AsRef<Path>>(p: P) -> Result<ServerConfig> {
    let txt = fs::read_to_string(p)
        .map_err(|e| Error::Config(format!("failed to read config file: {e}")))?;
    let cfg: ServerConfig =
        toml::from_str(&txt).map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;

    validate_server(&cfg)?;

    Ok(cfg)
}

pub fn load_client_from_path<P: AsRef<Path>>(p: P) -> Result<ClientConfig> {
    let txt = fs::read_to_string(p)
        .map_err(|e| Error::Config(format!("failed to read config file: {e}")))?;
    let cfg: ClientConfig =
        toml::from_str(&txt).map_err(|e| Error::Config(format!("failed to parse config: {e}")))?;

    validate_client(&cfg)?;

    Ok(cfg)
}

fn check_credential(what: &str, value: &str, cap: usize) -> Result<()> {
    if value.len() >= cap || value.contains('\0') {
        return Err(Error::Config(format!(
            "{what} does not fit its {cap}-byte wire buffer"
        )));
    }
    Ok(())
}

fn in_subnet(addr: Ipv4Addr, net: Ipv4Addr, mask: Ipv4Addr) -> bool {
    u32::from(addr) & u32::from(mask) == u32::from(net) & u32::from(mask)
}

fn validate_server(cfg: &ServerConfig) -> Result<()> {
    if cfg.sock.max_conn == 0 || cfg.sock.max_conn > MAX_CONN_LIMIT {
        return Err(Error::Config(format!(
            "max_conn must be between 1 and {MAX_CONN_LIMIT}"
        )));
    }
    if usize::from(cfg.iface.mtu) > MAX_PAYLOAD {
        return Err(Error::Config(format!(
            "mtu {} exceeds the maximum tunneled frame size",
            cfg.iface.mtu
        )));
    }
    if let Some(0) = cfg.workers {
        return Err(Error::Config("workers must be at least 1".into()));
    }
    if cfg.users.is_empty() {
        return Err(Error::Config("no users configured".into()));
    }

    let mut names = HashSet::new();
    let mut addrs = HashSet::new();
    for user in &cfg.users {
        if user.username.is_empty() {
            return Err(Error::Config("empty username".into()));
        }
        check_credential("username", &user.username, USERNAME_CAP)?;
        check_credential("password", &user.password, PASSWORD_CAP)?;
        if !names.insert(user.username.as_str()) {
            return Err(Error::Config(format!(
                "duplicate username: {}",
                user.username
            )));
        }
        if !addrs.insert(user.ipv4) {
            return Err(Error::Config(format!(
                "virtual address {} assigned twice",
                user.ipv4
            )));
        }
        if user.ipv4 == cfg.iface.ipv4 {
            return Err(Error::Config(format!(
                "virtual address {} collides with the server interface",
                user.ipv4
            )));
        }
        if !in_subnet(user.ipv4, cfg.iface.ipv4, cfg.iface.netmask) {
            return Err(Error::Config(format!(
                "virtual address {} is outside the {}/{} subnet",
                user.ipv4, cfg.iface.ipv4, cfg.iface.netmask
            )));
        }
    }

    Ok(())
}

fn validate_client(cfg: &ClientConfig) -> Result<()> {
    if cfg.auth.username.is_empty() {
        return Err(Error::Config("empty username".into()));
    }
    check_credential("username", &cfg.auth.username, USERNAME_CAP)?;
    check_credential("password", &cfg.auth.password, PASSWORD_CAP)?;
    Ok(())
}

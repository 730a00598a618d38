#![forbid(unsafe_code)]

use std::fs;
use std::path::PathBuf;

use teavpn2_lib::config::{load_client_from_path, load_server_from_path, EventLoop, SockType};
use teavpn2_lib::Error;
use tempfile::TempDir;

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

fn write_toml(dir: &TempDir, name: &str, toml: &str) -> TestResult<PathBuf> {
    let path = dir.path().join(name);
    fs::write(&path, toml)?;
    Ok(path)
}

const SERVER_MINIMAL: &str = r#"
[sock]
type = "tcp"
listen = "127.0.0.1:55555"

[iface]
dev = "tvpn0"
ipv4 = "10.8.0.1"
netmask = "255.255.255.0"

[[users]]
username = "alice"
password = "secret"
ipv4 = "10.8.0.2"
"#;

#[test]
fn loads_minimal_server_config_with_defaults() -> TestResult<()> {
    let dir = TempDir::new()?;
    let path = write_toml(&dir, "server.toml", SERVER_MINIMAL)?;

    let cfg = load_server_from_path(&path)?;
    assert_eq!(cfg.sock.sock_type, SockType::Tcp);
    assert_eq!(cfg.sock.listen.to_string(), "127.0.0.1:55555");
    assert_eq!(cfg.sock.backlog, 128);
    assert_eq!(cfg.sock.max_conn, 32);
    assert_eq!(cfg.event_loop, EventLoop::Epoll);
    assert_eq!(cfg.workers, None);
    assert_eq!(cfg.err_threshold, 5);
    assert_eq!(cfg.iface.mtu, 1500);
    assert_eq!(cfg.timeout.handshake_secs, 10);
    assert_eq!(cfg.timeout.auth_secs, 10);
    assert_eq!(cfg.timeout.idle_secs, 30);
    assert_eq!(cfg.users.len(), 1);
    Ok(())
}

#[test]
fn loads_full_server_config() -> TestResult<()> {
    let dir = TempDir::new()?;
    let path = write_toml(
        &dir,
        "server.toml",
        r#"
event_loop = "io-uring"
workers = 4
err_threshold = 9

[sock]
type = "udp"
listen = "0.0.0.0:443"
backlog = 64
max_conn = 1000

[iface]
dev = "tvpn0"
ipv4 = "10.9.0.1"
netmask = "255.255.0.0"
mtu = 1400

[timeout]
handshake_secs = 3
auth_secs = 4
idle_secs = 5
grace_secs = 1

[[users]]
username = "alice"
password = "secret"
ipv4 = "10.9.0.2"

[[users]]
username = "bob"
password = "hunter2"
ipv4 = "10.9.0.3"
"#,
    )?;

    let cfg = load_server_from_path(&path)?;
    assert_eq!(cfg.event_loop, EventLoop::IoUring);
    assert_eq!(cfg.workers, Some(4));
    assert_eq!(cfg.sock.sock_type, SockType::Udp);
    assert_eq!(cfg.sock.max_conn, 1000);
    assert_eq!(cfg.iface.mtu, 1400);
    assert_eq!(cfg.timeout.grace_secs, 1);
    assert_eq!(cfg.users.len(), 2);
    Ok(())
}

#[test]
fn server_validation_catches_operator_mistakes() -> TestResult<()> {
    let dir = TempDir::new()?;
    let cases: &[(&str, &str)] = &[
        (
            "no_users.toml",
            r#"
users = []

[sock]
type = "tcp"
listen = "127.0.0.1:55555"

[iface]
dev = "tvpn0"
ipv4 = "10.8.0.1"
netmask = "255.255.255.0"
"#,
        ),
        (
            "dup_user.toml",
            r#"
[sock]
type = "tcp"
listen = "127.0.0.1:55555"

[iface]
dev = "tvpn0"
ipv4 = "10.8.0.1"
netmask = "255.255.255.0"

[[users]]
username = "alice"
password = "a"
ipv4 = "10.8.0.2"

[[users]]
username = "alice"
password = "b"
ipv4 = "10.8.0.3"
"#,
        ),
        (
            "outside_subnet.toml",
            r#"
[sock]
type = "tcp"
listen = "127.0.0.1:55555"

[iface]
dev = "tvpn0"
ipv4 = "10.8.0.1"
netmask = "255.255.255.0"

[[users]]
username = "alice"
password = "secret"
ipv4 = "192.168.1.2"
"#,
        ),
        (
            "zero_conn.toml",
            r#"
[sock]
type = "tcp"
listen = "127.0.0.1:55555"
max_conn = 0

[iface]
dev = "tvpn0"
ipv4 = "10.8.0.1"
netmask = "255.255.255.0"

[[users]]
username = "alice"
password = "secret"
ipv4 = "10.8.0.2"
"#,
        ),
    ];
    for (name, toml) in cases {
        let path = write_toml(&dir, name, toml)?;
        assert!(
            matches!(load_server_from_path(&path), Err(Error::Config(_))),
            "{name} should fail validation"
        );
    }
    Ok(())
}

#[test]
fn oversize_username_is_rejected_at_load() -> TestResult<()> {
    let dir = TempDir::new()?;
    let long = "u".repeat(64);
    let toml = format!(
        r#"
[sock]
type = "tcp"
listen = "127.0.0.1:55555"

[iface]
dev = "tvpn0"
ipv4 = "10.8.0.1"
netmask = "255.255.255.0"

[[users]]
username = "{long}"
password = "secret"
ipv4 = "10.8.0.2"
"#
    );
    let path = write_toml(&dir, "long_user.toml", &toml)?;
    assert!(matches!(load_server_from_path(&path), Err(Error::Config(_))));
    Ok(())
}

#[test]
fn loads_client_config_with_reconnect_defaults() -> TestResult<()> {
    let dir = TempDir::new()?;
    let path = write_toml(
        &dir,
        "client.toml",
        r#"
[sock]
type = "tcp"
server = "203.0.113.7:55555"

[iface]
dev = "tvpn-cli"

[auth]
username = "alice"
password = "secret"
"#,
    )?;

    let cfg = load_client_from_path(&path)?;
    assert_eq!(cfg.sock.sock_type, SockType::Tcp);
    assert_eq!(cfg.sock.server.to_string(), "203.0.113.7:55555");
    assert!(cfg.reconnect.enabled);
    assert_eq!(cfg.reconnect.max_tries, 8);
    assert_eq!(cfg.reconnect.base_delay_ms, 500);
    assert_eq!(cfg.err_threshold, 5);
    Ok(())
}

#[test]
fn client_validation_rejects_bad_credentials() -> TestResult<()> {
    let dir = TempDir::new()?;
    let path = write_toml(
        &dir,
        "client.toml",
        r#"
[sock]
type = "tcp"
server = "203.0.113.7:55555"

[iface]
dev = "tvpn-cli"

[auth]
username = ""
password = "secret"
"#,
    )?;
    assert!(matches!(load_client_from_path(&path), Err(Error::Config(_))));
    Ok(())
}

#[test]
fn missing_file_is_a_config_error() {
    let missing = PathBuf::from("/nonexistent/teavpn2.toml");
    assert!(matches!(load_server_from_path(&missing), Err(Error::Config(_))));
}

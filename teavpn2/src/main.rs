#![deny(unsafe_code)]

mod iface;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use teavpn2_lib::{client, config, server};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "TeaVPN2 layer-3 virtual private network")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the VPN server
    Server {
        /// Path to configuration TOML file
        #[arg(short, long, value_name = "FILE", default_value = "config/server.toml")]
        config: PathBuf,
    },
    /// Run the VPN client
    Client {
        /// Path to configuration TOML file
        #[arg(short, long, value_name = "FILE", default_value = "config/client.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    let res = match cli.command {
        Command::Server { config } => run_server(config).await,
        Command::Client { config } => run_client(config).await,
    };
    if let Err(err) = res {
        error!(%err, "exiting");
        std::process::exit(1);
    }
}

async fn run_server(path: PathBuf) -> teavpn2_lib::Result<()> {
    let cfg = config::load_server_from_path(&path)?;
    info!(listen = %cfg.sock.listen, dev = %cfg.iface.dev, users = cfg.users.len(), "server configuration loaded");

    let tun = iface::create_server_tun(&cfg.iface)?;
    let report = server::serve(cfg, tun).await?;
    if report.threads_wont_exit {
        error!("engine tasks stuck at teardown, shared state leaked");
    } else {
        info!("clean shutdown");
    }
    Ok(())
}

async fn run_client(path: PathBuf) -> teavpn2_lib::Result<()> {
    let cfg = config::load_client_from_path(&path)?;
    info!(server = %cfg.sock.server, dev = %cfg.iface.dev, user = %cfg.auth.username, "client configuration loaded");

    let tun = iface::create_client_tun(&cfg.iface.dev)?;
    let configurator = Arc::new(iface::IprouteConfigurator::new(cfg.iface.dev.clone()));
    client::serve(cfg, tun, configurator).await?;
    info!("clean shutdown");
    Ok(())
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

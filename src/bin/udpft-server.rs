//! udpft-server - serves one directory over the udpft protocol.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use tokio::net::UdpSocket;
use udpft::{Config, Server, Store};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Serve a directory to udpft clients")]
struct Args {
    /// UDP port to listen on
    port: u16,

    /// Address to bind
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    bind: IpAddr,

    /// Directory to serve (overrides server.root from the config file)
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Configuration file (default: <config dir>/udpft/config.toml)
    #[arg(long, env = "UDPFT_CONFIG")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    udpft::logging::init(args.verbose)?;

    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    let root = args.root.unwrap_or_else(|| config.server.root.clone());
    if !root.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }

    let addr = SocketAddr::new(args.bind, args.port);
    let socket = UdpSocket::bind(addr)
        .await
        .with_context(|| format!("Failed to bind UDP socket on {}", addr))?;

    let server = Server::new(socket, Store::new(root), config);
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
    }
    Ok(())
}

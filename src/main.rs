//! udpft - interactive client for the udpft file-transfer server.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::net::UdpSocket;
use udpft::{Client, Config, Store};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Fetch, upload, delete and list files on a udpft server"
)]
struct Args {
    /// Server host name or address
    host: String,

    /// Server UDP port
    port: u16,

    /// Configuration file (default: <config dir>/udpft/config.toml)
    #[arg(long, env = "UDPFT_CONFIG")]
    config: Option<PathBuf>,

    /// Local directory files are fetched into and uploaded from
    #[arg(short, long, default_value = ".")]
    dir: PathBuf,

    /// Run this command instead of prompting (repeatable)
    #[arg(short = 'c', long = "command", value_name = "COMMAND")]
    commands: Vec<String>,

    /// Hide transfer progress bars
    #[arg(long)]
    no_progress: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    udpft::logging::init(args.verbose)?;

    let mut config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if args.no_progress {
        config.transfer.progress = false;
    }

    let peer = tokio::net::lookup_host((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("Failed to resolve {}", args.host))?
        .next()
        .with_context(|| format!("No address found for {}", args.host))?;
    let bind_addr = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
    let socket = UdpSocket::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind UDP socket on {}", bind_addr))?;
    tracing::info!("Talking to {} from {}", peer, socket.local_addr()?);

    let client = Client::new(socket, peer, Store::new(&args.dir), config);
    if args.commands.is_empty() {
        client.run_interactive().await?;
    } else if !client.run_commands(&args.commands).await {
        std::process::exit(1);
    }
    Ok(())
}

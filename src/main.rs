//! hrhub CLI
//!
//! Decodes heart-rate hub telemetry and prints every event as one JSON line
//! on stdout. Logs go to stderr.

use anyhow::Context;
use clap::{Parser, Subcommand};
use hrhub::{Config, EventStream, HubService, StreamParams, VERSION};
use hrhub::service::{StreamMode, StreamProto};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hrhub")]
#[command(version = VERSION)]
#[command(about = "Heart-rate sensor hub telemetry decoder", long_about = None)]
struct Cli {
    /// Use this configuration file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind the TCP + UDP bridge and print decoded events
    Listen {
        /// Address to bind (defaults to the configured host)
        #[arg(long)]
        host: Option<String>,

        /// Port for both TCP and UDP (defaults to the configured port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Connect to a hub and print decoded events
    Connect {
        /// Hub address
        #[arg(long)]
        hub_host: String,

        /// Hub port
        #[arg(long, default_value = "8088")]
        hub_port: u16,

        /// Transport (tcp or ws)
        #[arg(long, default_value = "tcp")]
        proto: String,

        /// WebSocket request path
        #[arg(long, default_value = "/")]
        ws_path: String,
    },

    /// Show configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(Config::config_path);

    match cli.command {
        Commands::Listen { host, port } => {
            let config = load_config(&config_path)?;
            cmd_listen(config, host, port).await
        }
        Commands::Connect {
            hub_host,
            hub_port,
            proto,
            ws_path,
        } => {
            let config = load_config(&config_path)?;
            cmd_connect(config, hub_host, hub_port, &proto, ws_path).await
        }
        Commands::Config { init } => cmd_config(&config_path, init),
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("hrhub=info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    Config::load_from(path).with_context(|| format!("failed to load config from {path:?}"))
}

async fn cmd_listen(config: Config, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    let params = StreamParams {
        mode: StreamMode::Listen,
        host: Some(host.unwrap_or_else(|| config.bridge.host.clone())),
        port: Some(i64::from(port.unwrap_or(config.bridge.port))),
        ..StreamParams::default()
    };

    let service = HubService::new(config);
    let shutdown = shutdown_signal()?;
    let stream = service.open_params(params).await;
    print_events(stream, shutdown).await?;

    if let Some(stats) = service.bridge_stats().await {
        eprintln!();
        eprintln!("{}", stats.summary());
    }
    service.shutdown().await;
    Ok(())
}

async fn cmd_connect(
    config: Config,
    hub_host: String,
    hub_port: u16,
    proto: &str,
    ws_path: String,
) -> anyhow::Result<()> {
    let proto: StreamProto = proto.parse().context("invalid --proto")?;
    let params = StreamParams {
        mode: StreamMode::Connect,
        proto,
        hub_host: Some(hub_host),
        hub_port: Some(i64::from(hub_port)),
        ws_path: Some(ws_path),
        ..StreamParams::default()
    };

    let service = HubService::new(config);
    let shutdown = shutdown_signal()?;
    let stream = service.open_params(params).await;
    print_events(stream, shutdown).await
}

fn cmd_config(path: &Path, init: bool) -> anyhow::Result<()> {
    if init {
        Config::default()
            .save_to(path)
            .with_context(|| format!("failed to write {path:?}"))?;
        println!("Wrote default configuration to {path:?}");
        println!();
    }

    let config = load_config(path)?;
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {path:?}");
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

/// Receiver that flips to `true` on Ctrl+C.
fn shutdown_signal() -> anyhow::Result<watch::Receiver<bool>> {
    let (tx, rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = tx.send(true);
    })
    .context("failed to set Ctrl+C handler")?;
    Ok(rx)
}

/// Print events as JSON lines until the stream ends or Ctrl+C.
async fn print_events(
    mut stream: EventStream,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            event = stream.next() => match event {
                Some(event) => {
                    let line = serde_json::to_string(&event)?;
                    let mut out = stdout.lock();
                    writeln!(out, "{line}")?;
                    out.flush()?;
                }
                None => break,
            },
        }
    }
    stream.close().await;
    Ok(())
}

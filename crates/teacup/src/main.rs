use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use teacup::{ProxyConfig, ProxyServer, StdoutSink};

#[derive(Parser, Debug)]
#[command(name = "teacup")]
#[command(version, about = "Intercepting proxy for line-delimited JSON-RPC over TCP")]
struct Args {
    /// Address to listen on [default: localhost:8686]
    #[arg(long)]
    listen: Option<String>,

    /// Path to the config file [default: ~/.teacup/teacup.json]
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hide events whose method contains this text (repeatable)
    #[arg(long = "deny", value_name = "METHOD")]
    deny: Vec<String>,

    /// Print events without per-connection colors
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "teacup=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = ProxyConfig::load(args.config.as_deref())?;
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    config.deny_methods.extend(args.deny);
    if args.no_color {
        config.color = false;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.listen,
        "Starting teacup"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl-C, shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "Could not listen for Ctrl-C"),
            }
        }
    });

    let server = ProxyServer::from_config(&config, Arc::new(StdoutSink));
    server.run(shutdown).await?;

    info!("teacup stopped");
    Ok(())
}

//! Palaver signaling server

use anyhow::Context;
use clap::{Parser, Subcommand};
use palaver_server::config::Config;
use palaver_server::server::{self, AppState};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "palaver-server")]
#[command(about = "Wallet-authenticated WebRTC signaling hub", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the signaling server
    Serve {
        /// Configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen port override
        #[arg(long, env = "PORT")]
        port: Option<u16>,

        /// Signaling-only mode: answer non-WebSocket HTTP with 503
        #[arg(long, env = "DISABLE_UI")]
        disable_ui: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            port,
            disable_ui,
        } => {
            let mut config = match config {
                Some(path) => Config::load(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => Config::default(),
            };
            config.validate();
            if let Some(port) = port {
                config.server.port = port;
            }

            init_logging(&config.logging.level);
            info!("palaver-server v{}", env!("CARGO_PKG_VERSION"));

            let state = AppState::new(config, disable_ui);
            server::serve(state).await.context("server terminated")?;
        }
    }

    Ok(())
}

/// Initialize tracing; `RUST_LOG` wins over the configured level
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

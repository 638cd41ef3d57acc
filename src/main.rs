use clap::{Parser, Subcommand};
use std::{net::SocketAddr, path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

mod agent;
mod flights;
mod models;
mod repl;
mod server;
mod session;
mod settings;

use agent::engine::Engine;
use flights::MockFlightManager;
use models::GeminiClient;
use settings::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "gemini_flights")]
#[command(about = "Flight search and booking assistant over Gemini function calling", long_about = None)]
struct Cli {
    /// JSON config file. GEMINI_* environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Serve the web chat page and JSON API.
    Serve {
        #[arg(long, default_value = "127.0.0.1:7171")]
        listen: String,
        /// Expose Prometheus metrics on this address.
        #[arg(long)]
        metrics_listen: Option<String>,
    },
    /// Chat from the terminal.
    Chat,
}

fn build_engine(config: Option<&PathBuf>) -> anyhow::Result<Engine> {
    let cfg = AppConfig::load(config.map(PathBuf::as_path))?;
    info!(config = ?cfg, "configuration loaded");
    let model = Arc::new(GeminiClient::from_config(&cfg)?);
    let backend = Arc::new(MockFlightManager::with_default_schedule());
    Ok(Engine::new(cfg, model, backend)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Serve { listen, metrics_listen } => {
            let addr: SocketAddr = listen.parse()?;
            if let Some(m) = metrics_listen {
                let maddr: SocketAddr = m.parse()?;
                metrics_exporter_prometheus::PrometheusBuilder::new()
                    .with_http_listener(maddr)
                    .install()?;
                info!(addr = %maddr, "metrics exporter installed");
            }
            let engine = build_engine(cli.config.as_ref())?;
            let state = server::AppState::new(Arc::new(engine));
            server::serve(addr, state).await?;
        }
        Commands::Chat => {
            let engine = build_engine(cli.config.as_ref())?;
            let mut session = session::Session::new(None, Default::default());
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            repl::run(&engine, &mut session, stdin, tokio::io::stdout()).await?;
        }
    }
    Ok(())
}

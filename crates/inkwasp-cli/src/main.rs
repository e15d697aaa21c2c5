use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod config;

use config::{Config, ExtractorConfig};
use inkwasp_core::CaptureEngine;
use inkwasp_extract::{FieldExtractor, GeminiExtractor, StubExtractor};
use inkwasp_gateway::{Gateway, RateLimitConfig, RateLimiter};
use inkwasp_persist::SqliteRecordStore;
use inkwasp_server::state::AppState;
use inkwasp_store::{spawn_sweep_task, SessionStore, SWEEP_INTERVAL};

#[derive(Parser)]
#[command(name = "inkwasp", version, about = "chat-driven record capture bot")]
struct Cli {
    #[arg(long, default_value = "inkwasp.yaml", help = "Path to the YAML config file")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the webhook server and the background session sweep")]
    Start {
        #[arg(long, help = "Override the configured listen port")]
        port: Option<u16>,
    },
    #[command(about = "Validate the config file and exit")]
    Validate,
}

fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let file_appender = tracing_appender::rolling::daily("logs", "inkwasp.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Validate => {
            Config::load(&cli.config)?;
            println!("config ok: {}", cli.config.display());
            Ok(())
        }
        Commands::Start { port } => {
            let _guard = init_tracing();
            let config = Config::load(&cli.config)?;
            start(config, port).await
        }
    }
}

async fn start(config: Config, port_override: Option<u16>) -> Result<()> {
    let sessions = Arc::new(SessionStore::new());

    let extractor: Arc<dyn FieldExtractor> = match &config.extractor {
        ExtractorConfig::Gemini { api_key, model } => {
            Arc::new(GeminiExtractor::new(api_key.clone(), model.clone()))
        }
        ExtractorConfig::Stub => {
            tracing::warn!("using the stub extractor; every message classifies as a memo");
            Arc::new(StubExtractor::memo())
        }
    };

    let records = Arc::new(SqliteRecordStore::open(&config.storage.path)?);
    let engine = Arc::new(CaptureEngine::new(sessions.clone(), extractor, records));
    let gateway = Arc::new(Gateway::new(
        engine,
        sessions.clone(),
        config.bot.names.clone(),
        RateLimiter::new(RateLimitConfig::default()),
    ));

    spawn_sweep_task(sessions.clone(), SWEEP_INTERVAL);

    let bind = match port_override {
        Some(port) => {
            let host = config
                .server
                .bind
                .rsplit_once(':')
                .map(|(host, _)| host)
                .unwrap_or("0.0.0.0");
            format!("{host}:{port}")
        }
        None => config.server.bind.clone(),
    };

    let state = AppState {
        gateway,
        sessions,
        webhook_token: config.server.webhook_token.clone(),
    };
    inkwasp_server::serve(state, &bind).await
}

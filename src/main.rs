mod config;
mod engine;
mod error;
mod model;
mod notifier;
mod source;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use engine::Engine;
use notifier::AlertSink;
use notifier::terminal::TerminalSink;
use notifier::webhook::WebhookSink;
use source::PriceSource;
use source::sqlite::SqliteSource;

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("price source error")]
    Source,
    #[display("alert sink error")]
    Sink,
    #[display("engine error")]
    Engine,
    #[display("runtime error")]
    Runtime,
}

#[derive(Parser)]
#[command(name = "price-notify", about = "Token price threshold notifier")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load(Path::new(&cli.config)).change_context(AppError::Config)?;

    init_tracing(&config);

    // ── Price source ──────────────────────────────────────────────────────────
    let db_path = format!("{}/price-notify.db", config.general.data_dir);
    let source: Arc<dyn PriceSource> = Arc::new(
        SqliteSource::open(Path::new(&db_path))
            .await
            .change_context(AppError::Source)?,
    );

    // ── Alert sink ────────────────────────────────────────────────────────────
    let sink: Arc<dyn AlertSink> = match &config.webhook {
        Some(webhook) => {
            Arc::new(WebhookSink::from_config(webhook).change_context(AppError::Sink)?)
        }
        None => {
            tracing::warn!("no webhook configured; alerts are written to the log only");
            Arc::new(TerminalSink)
        }
    };

    // ── Engine ────────────────────────────────────────────────────────────────
    let mut engine = Engine::new(config.engine.to_engine_config(), source, sink)
        .await
        .change_context(AppError::Engine)?;
    engine.start().change_context(AppError::Engine)?;
    info!(state = %engine.state(), "price notify engine started");

    // ── Shutdown ──────────────────────────────────────────────────────────────
    tokio::signal::ctrl_c()
        .await
        .change_context(AppError::Runtime)?;

    info!("ctrl+c received, shutting down");
    match tokio::time::timeout(Duration::from_secs(10), engine.stop()).await {
        Ok(result) => result.change_context(AppError::Engine)?,
        Err(_) => tracing::warn!("engine did not stop within 10s"),
    }

    info!("shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

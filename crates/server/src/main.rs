// crates/server/src/main.rs
//! Scribeflow server binary.
//!
//! Reads configuration from the environment, opens the project store,
//! wires up the transcription provider, and serves the HTTP API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use scribeflow_db::{ProjectStore, SqliteStore};
use scribeflow_server::{create_app, AppState, Config, SttMode};
use scribeflow_stt::{HttpTranscriber, MockTranscriber, Transcriber};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).compact().init();

    let config = Config::from_env();
    tracing::info!(
        port = config.port,
        stt_mode = ?config.stt_mode,
        max_concurrency = config.jobs.max_concurrency,
        "scribeflow v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let store: Arc<dyn ProjectStore> = match &config.database_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "opening sqlite store");
            Arc::new(SqliteStore::new(path).await?)
        }
        None => {
            tracing::warn!("DATABASE_PATH unset, using in-memory sqlite store");
            Arc::new(SqliteStore::new_in_memory().await?)
        }
    };

    let stt: Arc<dyn Transcriber> = match config.stt_mode {
        SttMode::Http => {
            tracing::info!(url = %config.asr_url, "using http transcription provider");
            Arc::new(HttpTranscriber::new(config.asr_url.clone(), config.asr_timeout)?)
        }
        SttMode::Mock => {
            tracing::warn!("using mock transcription provider");
            Arc::new(MockTranscriber::new(Duration::from_millis(200)))
        }
    };

    let state = AppState::new(store, stt, config.jobs.clone());
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).await?;

    Ok(())
}

// crates/server/src/config.rs
//! Environment-driven server configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::jobs::JobConfig;

/// Default port for the server.
pub const DEFAULT_PORT: u16 = 8321;

/// Default transcription service endpoint.
pub const DEFAULT_ASR_URL: &str = "http://localhost:9000";

/// How the transcription provider is selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SttMode {
    /// Call the external service at `asr_url`.
    Http,
    /// In-process mock, for local development without a backend.
    Mock,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// SQLite file path; `None` runs fully in memory.
    pub database_path: Option<PathBuf>,
    pub stt_mode: SttMode,
    pub asr_url: String,
    pub asr_timeout: Duration,
    pub jobs: JobConfig,
}

impl Config {
    /// Read configuration from the environment, falling back to defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        let port = std::env::var("SCRIBEFLOW_PORT")
            .ok()
            .or_else(|| std::env::var("PORT").ok())
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let database_path = std::env::var("DATABASE_PATH").ok().map(PathBuf::from);

        let stt_mode = match std::env::var("STT_MODE").as_deref() {
            Ok("mock") => SttMode::Mock,
            _ => SttMode::Http,
        };

        let asr_url = std::env::var("ASR_URL").unwrap_or_else(|_| DEFAULT_ASR_URL.to_string());
        let asr_timeout = std::env::var("ASR_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(300));

        let mut jobs = JobConfig::default();
        if let Some(n) = std::env::var("MAX_CONCURRENT_TRANSCRIPTIONS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n: &usize| *n > 0)
        {
            jobs.max_concurrency = n;
        }

        Self {
            port,
            database_path,
            stt_mode,
            asr_url,
            asr_timeout,
            jobs,
        }
    }
}

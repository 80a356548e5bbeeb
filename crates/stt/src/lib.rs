// crates/stt/src/lib.rs
//! Transcription provider clients.
//!
//! [`Transcriber`] is the collaborator contract the job engine calls once
//! per audio file. [`HttpTranscriber`] talks to the external ASR service;
//! [`MockTranscriber`] is a deterministic stand-in for tests and local runs
//! without the service.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use scribeflow_core::{TranscriptionResult, TRANSCRIBE_SUCCESS};

#[derive(Debug, Error)]
pub enum SttError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Speech-to-text collaborator contract.
///
/// A transport-level `Err` and a non-success `status_code` are both
/// per-file failures from the job engine's point of view; neither aborts
/// the run.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio stored at `raw_path` (an object-storage path
    /// the provider can resolve).
    async fn transcribe(&self, raw_path: &str) -> Result<TranscriptionResult, SttError>;
}

/// Client for the external ASR HTTP service.
///
/// Mirrors the service's contract: `POST {base}/transcribe?audio_path=…`
/// returning a JSON [`TranscriptionResult`].
pub struct HttpTranscriber {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTranscriber {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, SttError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn transcribe(&self, raw_path: &str) -> Result<TranscriptionResult, SttError> {
        let response = self
            .client
            .post(format!("{}/transcribe", self.base_url))
            .query(&[("audio_path", raw_path)])
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(raw_path, error = %e, "transcription request failed");
                e
            })?;

        let status = response.status();
        let result: TranscriptionResult = response.json().await.map_err(|e| {
            tracing::warn!(raw_path, %status, error = %e, "unparseable provider response");
            SttError::InvalidResponse(format!("bad payload from provider (http {status}): {e}"))
        })?;
        Ok(result)
    }
}

/// Failure code the mock reports for paths registered via
/// [`MockTranscriber::fail_path`].
pub const MOCK_FAILURE_CODE: u16 = 503;

/// Deterministic in-process transcriber.
///
/// Succeeds with a canned transcript after an optional delay; paths
/// registered with [`fail_path`](Self::fail_path) fail with
/// [`MOCK_FAILURE_CODE`].
pub struct MockTranscriber {
    delay: Duration,
    transcript: String,
    failing: Mutex<HashSet<String>>,
}

impl MockTranscriber {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            transcript: "mock transcript".to_string(),
            failing: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.transcript = transcript.into();
        self
    }

    /// Make every call for `raw_path` return a provider failure.
    pub fn fail_path(&self, raw_path: impl Into<String>) {
        self.failing
            .lock()
            .expect("mock transcriber lock poisoned")
            .insert(raw_path.into());
    }
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new(Duration::from_millis(0))
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, raw_path: &str) -> Result<TranscriptionResult, SttError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failing = self
            .failing
            .lock()
            .expect("mock transcriber lock poisoned")
            .contains(raw_path);

        if failing {
            return Ok(TranscriptionResult {
                status_code: MOCK_FAILURE_CODE,
                transcription: String::new(),
                audio_filename: raw_path.to_string(),
                model_used: "mock".to_string(),
            });
        }

        Ok(TranscriptionResult {
            status_code: TRANSCRIBE_SUCCESS,
            transcription: self.transcript.clone(),
            audio_filename: raw_path.to_string(),
            model_used: "mock".to_string(),
        })
    }
}

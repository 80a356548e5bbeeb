// crates/core/src/transcription.rs
//! Result shape returned by the transcription provider.

use serde::{Deserialize, Serialize};

/// Provider status code denoting a successful transcription.
pub const TRANSCRIBE_SUCCESS: u16 = 201;

/// What the transcription provider returns for one audio file.
///
/// `status_code` equal to [`TRANSCRIBE_SUCCESS`] means `transcription`
/// holds the transcript text; any other value is a provider-specific
/// failure code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    pub status_code: u16,
    pub transcription: String,
    pub audio_filename: String,
    pub model_used: String,
}

impl TranscriptionResult {
    pub fn is_success(&self) -> bool {
        self.status_code == TRANSCRIBE_SUCCESS
    }
}

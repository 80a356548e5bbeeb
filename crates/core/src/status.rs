// crates/core/src/status.rs
//! Processing status shared by projects and audio files.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle status of a project or of a single audio file.
///
/// Projects move `Loading → Pending → Processing → Completed`; individual
/// files move `Pending → Processing → {Completed | Error}`. Terminal states
/// admit no further transitions within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    /// Created but not yet ready to process (files still arriving).
    Loading,
    /// Eligible to be processed.
    Pending,
    /// A run is in flight.
    Processing,
    /// Terminal: processed successfully.
    Completed,
    /// Terminal: processing failed.
    Error,
}

impl ProcessingStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    /// Lowercase wire name, matching the serde representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored status string is not a known variant.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid processing status: {0:?}")]
pub struct ParseStatusError(pub String);

impl FromStr for ProcessingStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loading" => Ok(Self::Loading),
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "error" => Ok(Self::Error),
            other => Err(ParseStatusError(other.to_string())),
        }
    }
}

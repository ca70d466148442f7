//! Error types for the docs-to-voice pipeline

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while turning text into audio and timelines
#[derive(Error, Debug)]
pub enum VoiceError {
    /// Input text had nothing to synthesize
    #[error("No text content found for {0}.")]
    NoContent(&'static str),

    /// A setting could not be parsed or validated
    #[error("{0}")]
    InvalidSetting(String),

    /// Destination file already exists and overwrite was not requested
    #[error("Output already exists: {} (use --force to overwrite)", .0.display())]
    OutputExists(PathBuf),

    /// Backend returned a response we cannot use
    #[error("{0}")]
    Protocol(String),

    /// Chunks in one run came back in different audio formats
    #[error("API returned inconsistent chunk formats ({expected} vs {actual}).")]
    FormatMismatch { expected: String, actual: String },

    /// Synthesis request failed (transport or backend-reported)
    #[error("{0}")]
    Synthesis(String),

    /// Downloading a synthesized audio URL failed
    #[error("Failed to download audio URL: {0}")]
    Download(String),

    /// A required executable is not installed
    #[error("{hint}")]
    MissingTool { tool: &'static str, hint: String },

    /// An external process exited unsuccessfully
    #[error("{tool} failed: {detail}")]
    ToolFailed { tool: &'static str, detail: String },

    /// An external process exceeded its time budget
    #[error("{tool} timed out after {seconds}s")]
    ToolTimeout { tool: &'static str, seconds: u64 },

    /// Audio chunks cannot be merged without changing their sample format
    #[error("{0}")]
    AudioFormat(String),

    /// The run was interrupted before it finished
    #[error("Interrupted; temporary files were removed.")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl VoiceError {
    /// Errors that must abort concatenation instead of trying another strategy
    pub fn is_fatal_mismatch(&self) -> bool {
        matches!(
            self,
            VoiceError::AudioFormat(_) | VoiceError::FormatMismatch { .. }
        )
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, VoiceError>;

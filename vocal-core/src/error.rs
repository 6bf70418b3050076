//! Error types for the vocal coach core.

use thiserror::Error;

/// Failures surfaced by sessions, configuration and persistence.
///
/// "No pitch" is not an error: the detector and note mapper report it as
/// `None` and sessions treat it as a tick without progress.
#[derive(Debug, Error)]
pub enum CoachError {
    /// Microphone permission denied or device acquisition failed.
    #[error("audio input unavailable: {0}")]
    InputUnavailable(String),

    /// Exercise level outside the supported sequence lengths.
    #[error("invalid exercise level {0}, expected 2..=5 notes")]
    InvalidLevel(usize),

    /// Operation not allowed in the current session state.
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: &'static str,
    },

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Result type for vocal coach operations
pub type Result<T> = std::result::Result<T, CoachError>;

use crate::player::TrackKind;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the playback facade and its bridge.
///
/// Argument errors (`Invalid*`, `NotFound`) are returned before anything is
/// sent to the engine. `Engine` errors only ever arrive through the bus.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlaybinError {
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("{code}: {message}")]
    Engine { code: String, message: String },

    #[error("Invalid position {position:?} (duration is {duration:?})")]
    InvalidPosition {
        position: Duration,
        duration: Duration,
    },

    #[error("Invalid {kind} track index {index} ({count} available)")]
    InvalidIndex {
        kind: TrackKind,
        index: usize,
        count: usize,
    },

    #[error("Invalid volume {0} (expected 0.0 to 1.0)")]
    InvalidVolume(f64),

    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Not available: {0}")]
    NotAvailable(&'static str),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Request cancelled")]
    Cancelled,
}

impl PlaybinError {
    pub(crate) fn engine(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Engine {
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlaybinError>;

//! Common types shared by the facade, the bridge and engine backends
use crate::utils::PlaybinError;
use std::fmt;

/// Playback state mirrored from confirmed engine transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Paused,
    Playing,
}

impl PlaybackState {
    /// Maps an engine state onto the three states the facade exposes.
    pub fn from_engine(state: EngineState) -> Self {
        match state {
            EngineState::Playing => PlaybackState::Playing,
            EngineState::Paused => PlaybackState::Paused,
            EngineState::Ready | EngineState::Null => PlaybackState::Stopped,
        }
    }
}

/// Native element states, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EngineState {
    Null,
    Ready,
    Paused,
    Playing,
}

/// Successful outcome of a native state-change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    /// The element reached the target state before returning.
    Success,
    /// The element will post the transition on its bus later.
    Async,
    /// Live source: the target was reached but no preroll happened.
    NoPreroll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Subtitle,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Audio => f.write_str("audio"),
            TrackKind::Subtitle => f.write_str("subtitle"),
        }
    }
}

/// Metadata for one audio or subtitle stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackDescriptor {
    pub index: usize,
    pub kind: TrackKind,
    /// ISO 639 language code from the stream tags, if tagged.
    pub language: Option<String>,
    pub codec: Option<String>,
}

impl TrackDescriptor {
    /// Human readable label, e.g. `Subtitle 2 (fre)`.
    pub fn label(&self) -> String {
        let name = match self.kind {
            TrackKind::Audio => "Audio Track",
            TrackKind::Subtitle => "Subtitle",
        };
        match (&self.language, &self.codec) {
            (Some(lang), _) => format!("{} {} ({})", name, self.index + 1, lang),
            (None, Some(codec)) => format!("{} {} [{}]", name, self.index + 1, codec),
            (None, None) => format!("{} {}", name, self.index + 1),
        }
    }
}

/// A notification posted by the engine on its bus.
#[derive(Debug, Clone, PartialEq)]
pub enum BusMessage {
    /// The top-level element changed state.
    StateChanged { old: EngineState, new: EngineState },
    /// An asynchronous operation (preroll, flushing seek) completed.
    AsyncDone,
    Error {
        code: String,
        message: String,
        debug: Option<String>,
    },
    EndOfStream,
    DurationChanged,
}

impl BusMessage {
    pub fn is_error(&self) -> bool {
        matches!(self, BusMessage::Error { .. })
    }

    /// The structured error carried by an `Error` message.
    pub fn error(&self) -> Option<PlaybinError> {
        match self {
            BusMessage::Error {
                code,
                message,
                debug,
            } => Some(PlaybinError::Engine {
                code: code.clone(),
                message: match debug {
                    Some(debug) => format!("{} ({})", message, debug),
                    None => message.clone(),
                },
            }),
            _ => None,
        }
    }
}

/// Push-style notifications for consumers that prefer events to polling.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybinEvent {
    StateChanged(PlaybackState),
    EndOfStream,
    /// An engine error nobody was waiting for.
    AsyncError(PlaybinError),
    DurationChanged,
}

//! Awaitable playback on top of GStreamer's `playbin`.
//!
//! The engine's bus is drained by an [`EventLoop`] on its own thread; a
//! [`Playbin`] turns each command plus its bus confirmation into one future.

pub mod config;
pub mod player;
pub mod utils;

pub use config::Config;
pub use player::{
    Engine, EventLoop, GstEngine, MessagePump, MessageSink, PlaybackState, Playbin, PlaybinEvent,
    TrackDescriptor, TrackKind, Tracks,
};
pub use utils::{PlaybinError, Result};

pub mod adapter;
pub mod event_loop;
pub mod gstreamer;
pub mod playbin;
pub mod traits;
pub mod types;

pub use adapter::{Command, CommandAdapter, Completion, Intake, Issued, RequestKind};
pub use event_loop::{EventLoop, MessageSink};
pub use self::gstreamer::GstEngine;
pub use playbin::{Playbin, Tracks};
pub use traits::{Engine, MessagePump};
pub use types::{
    BusMessage, EngineState, PlaybackState, PlaybinEvent, StateChange, TrackDescriptor, TrackKind,
};

use crate::player::event_loop::MessageSink;
use crate::player::types::{EngineState, StateChange, TrackDescriptor, TrackKind};
use crate::utils::Result;
use std::sync::Arc;
use std::time::Duration;

/// The native playback element.
///
/// Every method is synchronous and returns as soon as the native call does.
/// Completion of asynchronous work is reported through the engine's
/// [`MessagePump`], never through these return values.
pub trait Engine: Send + Sync + 'static {
    /// The pump that drains this engine's bus on the bridge thread.
    fn pump(&self) -> Arc<dyn MessagePump>;

    /// Sets the media URI and enables audio and subtitle rendering.
    /// Only valid while the element is in NULL or READY.
    fn set_uri(&self, uri: &str) -> Result<()>;
    fn set_state(&self, state: EngineState) -> Result<StateChange>;
    /// Best-effort abort of an in-flight asynchronous state change.
    fn abort_state(&self);
    /// Flushing, key-unit seek. Completion is signalled by `AsyncDone`.
    fn seek(&self, position: Duration) -> Result<()>;

    fn position(&self) -> Option<Duration>;
    fn duration(&self) -> Option<Duration>;

    fn volume(&self) -> f64;
    fn set_volume(&self, volume: f64);

    fn track_count(&self, kind: TrackKind) -> usize;
    /// Descriptor for `index`, which must be below `track_count(kind)`.
    fn track(&self, kind: TrackKind, index: usize) -> TrackDescriptor;
    /// `None` when rendering of that kind is disabled.
    fn current_track(&self, kind: TrackKind) -> Option<usize>;
    fn select_track(&self, kind: TrackKind, index: Option<usize>) -> Result<()>;

    fn subtitle_uri(&self) -> Option<String>;
    fn set_subtitle_uri(&self, uri: &str) -> Result<()>;
}

/// The native event loop, driven from a dedicated thread by
/// [`EventLoop`](crate::player::EventLoop).
pub trait MessagePump: Send + Sync + 'static {
    /// Runs the native loop on the calling thread until [`quit`](Self::quit).
    ///
    /// `on_ready` must be called once the pump is able to deliver messages.
    /// An error returned before that makes `EventLoop::start` fail.
    fn run(&self, sink: MessageSink, on_ready: &dyn Fn()) -> Result<()>;

    /// Asks a running (or about to run) loop to return. Callable from any thread.
    fn quit(&self);
}

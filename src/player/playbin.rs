use crate::config::PlaybackConfig;
use crate::player::adapter::{Command, CommandAdapter, Intake, Issued, RequestKind};
use crate::player::event_loop::MessageSink;
use crate::player::traits::Engine;
use crate::player::types::{
    BusMessage, EngineState, PlaybackState, PlaybinEvent, StateChange, TrackDescriptor, TrackKind,
};
use crate::utils::{PlaybinError, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};
use url::Url;

const EVENT_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the facade and the bus dispatcher task.
struct Shared {
    engine: Arc<dyn Engine>,
    adapter: CommandAdapter,
    // Serializes mutating calls into the engine; never held across an await
    engine_lock: Mutex<()>,
    state: watch::Sender<PlaybackState>,
    // Last state requested from the engine; transitions elsewhere are not mirrored
    target: Mutex<EngineState>,
    // Bumped by stop(); state changes issued under an older epoch are cancelled
    stop_epoch: AtomicU64,
    events: broadcast::Sender<PlaybinEvent>,
    source: Mutex<Option<String>>,
    duration: Mutex<Option<Duration>>,
    end_of_stream: AtomicBool,
    async_error: Mutex<Option<PlaybinError>>,
    timeout: Mutex<Option<Duration>>,
}

impl Shared {
    fn lock_engine(&self) -> MutexGuard<'_, ()> {
        lock(&self.engine_lock)
    }

    fn timeout(&self) -> Option<Duration> {
        *lock(&self.timeout)
    }

    fn set_state(&self, new_state: PlaybackState) {
        let changed = self.state.send_if_modified(|state| {
            if *state == new_state {
                false
            } else {
                *state = new_state;
                true
            }
        });
        if changed {
            debug!("Playback state is now {:?}", new_state);
            let _ = self.events.send(PlaybinEvent::StateChanged(new_state));
        }
    }

    fn check_epoch(&self, epoch: u64) -> Result<()> {
        if self.stop_epoch.load(Ordering::SeqCst) == epoch {
            Ok(())
        } else {
            debug!("State change superseded by stop()");
            Err(PlaybinError::Cancelled)
        }
    }

    /// Requests `target` with the engine lock already held.
    fn issue_state_locked(&self, target: EngineState) -> Result<Issued> {
        let previous = std::mem::replace(&mut *lock(&self.target), target);
        let change = match self.engine.set_state(target) {
            Ok(change) => change,
            Err(e) => {
                *lock(&self.target) = previous;
                return Err(e);
            }
        };
        match change {
            StateChange::Async => Ok(Issued::Pending),
            StateChange::Success | StateChange::NoPreroll => {
                // Synchronous success is the engine's own confirmation
                self.set_state(PlaybackState::from_engine(target));
                Ok(Issued::Completed)
            }
        }
    }

    fn issue_state(&self, target: EngineState) -> Result<Issued> {
        let _engine = self.lock_engine();
        self.issue_state_locked(target)
    }

    /// Drops the engine back to NULL after a failure.
    fn reset(&self) {
        {
            let _engine = self.lock_engine();
            *lock(&self.target) = EngineState::Null;
            // Runs on the dispatcher task; playbin reaches NULL synchronously
            if let Err(e) = self.engine.set_state(EngineState::Null) {
                warn!("Failed to reset engine to NULL: {}", e);
            }
        }
        *lock(&self.duration) = None;
        self.set_state(PlaybackState::Stopped);
    }

    /// Mirrors what a bus message says about the engine.
    fn observe(&self, msg: &BusMessage) {
        match msg {
            BusMessage::StateChanged { old, new } => {
                trace!("Engine state changed from {:?} to {:?}", old, new);
                let target = *lock(&self.target);
                let mirrored = PlaybackState::from_engine(*new);
                if mirrored == PlaybackState::from_engine(target) {
                    self.set_state(mirrored);
                } else {
                    trace!("Not mirroring {:?} while heading for {:?}", new, target);
                }
            }
            BusMessage::EndOfStream => {
                info!("End of stream");
                self.end_of_stream.store(true, Ordering::SeqCst);
                let _ = self.events.send(PlaybinEvent::EndOfStream);
            }
            BusMessage::DurationChanged => {
                *lock(&self.duration) = None;
                let _ = self.events.send(PlaybinEvent::DurationChanged);
            }
            BusMessage::Error { code, message, .. } => {
                error!("Engine error {}: {}", code, message);
                self.reset();
            }
            BusMessage::AsyncDone => {}
        }
    }

    /// Handles a message no pending request claimed.
    fn unsolicited(&self, msg: BusMessage) {
        match msg.error() {
            Some(err) => {
                warn!("Unexpected async error: {}", err);
                *lock(&self.async_error) = Some(err.clone());
                let _ = self.events.send(PlaybinEvent::AsyncError(err));
            }
            None => trace!("Dropping unclaimed bus message {:?}", msg),
        }
    }
}

/// Feeds bus messages to the adapter on the host runtime.
async fn dispatch(shared: Arc<Shared>, mut messages: mpsc::UnboundedReceiver<BusMessage>) {
    while let Some(msg) = messages.recv().await {
        shared.observe(&msg);
        if let Intake::Unmatched(msg) = shared.adapter.intake(msg) {
            shared.unsolicited(msg);
        }
    }

    debug!("Bus channel closed, failing pending requests");
    shared
        .adapter
        .fail_all(PlaybinError::EngineUnavailable("event loop stopped".to_string()));
}

/// Awaitable playback on top of an [`Engine`].
///
/// Create it inside a tokio runtime, then hand [`bus_sink`](Self::bus_sink)
/// to the [`EventLoop`](crate::player::EventLoop) that pumps the engine's
/// bus. Methods take `&self`; wrap it in an `Arc` to drive it from several
/// tasks at once.
pub struct Playbin {
    shared: Arc<Shared>,
    sink: MessageSink,
    dispatcher: JoinHandle<()>,
}

impl Playbin {
    pub fn new(engine: Arc<dyn Engine>, config: &PlaybackConfig) -> Result<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            PlaybinError::EngineUnavailable("no tokio runtime to dispatch bus messages".to_string())
        })?;

        if config.initial_volume.is_finite() && (0.0..=1.0).contains(&config.initial_volume) {
            engine.set_volume(config.initial_volume);
        } else {
            warn!("Ignoring invalid initial volume {}", config.initial_volume);
        }

        let (sink, messages) = MessageSink::channel();
        let (state, _) = watch::channel(PlaybackState::Stopped);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let shared = Arc::new(Shared {
            engine,
            adapter: CommandAdapter::new(),
            engine_lock: Mutex::new(()),
            state,
            target: Mutex::new(EngineState::Null),
            stop_epoch: AtomicU64::new(0),
            events,
            source: Mutex::new(None),
            duration: Mutex::new(None),
            end_of_stream: AtomicBool::new(false),
            async_error: Mutex::new(None),
            timeout: Mutex::new(config.command_timeout()),
        });

        let dispatcher = runtime.spawn(dispatch(shared.clone(), messages));

        Ok(Self {
            shared,
            sink,
            dispatcher,
        })
    }

    /// Where the event loop should deliver this engine's bus messages.
    pub fn bus_sink(&self) -> MessageSink {
        self.sink.clone()
    }

    /// Timeout applied to awaitable calls issued from now on. `None` waits forever.
    pub fn set_command_timeout(&self, timeout: Option<Duration>) {
        *lock(&self.shared.timeout) = timeout;
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.shared.timeout()
    }

    /// URI of the loaded source, if any.
    pub fn source(&self) -> Option<String> {
        lock(&self.shared.source).clone()
    }

    fn require_source(&self) -> Result<()> {
        if lock(&self.shared.source).is_some() {
            Ok(())
        } else {
            Err(PlaybinError::NotAvailable("no source loaded"))
        }
    }

    async fn change_state(&self, target: EngineState) -> Result<()> {
        let shared = &self.shared;
        let epoch = shared.stop_epoch.load(Ordering::SeqCst);
        let engine = shared.engine.clone();
        let command = Command::new(RequestKind::StateChange, move |msg| {
            matches!(msg, BusMessage::StateChanged { new, .. } if *new == target)
        })
        .timeout(shared.timeout())
        .on_cancel(move || engine.abort_state());

        shared
            .adapter
            .invoke(command, || {
                shared.check_epoch(epoch)?;
                shared.issue_state(target)
            })
            .await
            .map(|_| ())
    }

    /// Loads `source` and starts playing it.
    ///
    /// `source` is either a URI or a local path. Resolves once the engine
    /// reports PLAYING; on failure the engine is reset and the state is
    /// [`PlaybackState::Stopped`].
    pub async fn play_source(&self, source: &str) -> Result<()> {
        let epoch = self.shared.stop_epoch.load(Ordering::SeqCst);
        let uri = resolve_source(source).await?;
        info!("Playing {}", uri);

        let shared = &self.shared;
        shared.end_of_stream.store(false, Ordering::SeqCst);
        *lock(&shared.duration) = None;
        *lock(&shared.source) = Some(uri.clone());

        let engine = shared.engine.clone();
        let command = Command::new(RequestKind::StateChange, |msg| {
            matches!(
                msg,
                BusMessage::StateChanged {
                    new: EngineState::Playing,
                    ..
                }
            )
        })
        .timeout(shared.timeout())
        .on_cancel(move || engine.abort_state());

        let result = shared
            .adapter
            .invoke(command, || {
                shared.check_epoch(epoch)?;
                let _engine = shared.lock_engine();
                shared.issue_state_locked(EngineState::Null)?;
                shared.set_state(PlaybackState::Stopped);
                shared.engine.set_uri(&uri)?;
                shared.issue_state_locked(EngineState::Playing)
            })
            .await;

        match result {
            Ok(_) => Ok(()),
            // stop() took over; it owns the reset
            Err(PlaybinError::Cancelled) => Err(PlaybinError::Cancelled),
            Err(e) => {
                error!("Failed to play {}: {}", uri, e);
                shared.reset();
                *lock(&shared.source) = None;
                Err(e)
            }
        }
    }

    /// Resumes (or restarts after `stop`) the loaded source.
    pub async fn play(&self) -> Result<()> {
        self.require_source()?;
        debug!("Resuming playback");
        self.change_state(EngineState::Playing).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.require_source()?;
        debug!("Pausing playback");
        self.change_state(EngineState::Paused).await
    }

    /// Stops playback and releases native resources.
    ///
    /// Any pending or queued play/pause is resolved with
    /// [`PlaybinError::Cancelled`] before the engine is stopped. Idempotent; the source stays loaded.
    pub async fn stop(&self) -> Result<()> {
        let shared = &self.shared;
        // Requests still queued for the lane see the new epoch and bail out
        shared.stop_epoch.fetch_add(1, Ordering::SeqCst);
        let preempted = shared.adapter.cancel_kind(RequestKind::StateChange);
        if preempted > 0 {
            debug!("stop() preempted {} pending state change(s)", preempted);
        }

        let command = Command::new(RequestKind::StateChange, |msg| {
            matches!(
                msg,
                BusMessage::StateChanged {
                    new: EngineState::Null | EngineState::Ready,
                    ..
                }
            )
        })
        .timeout(shared.timeout());

        shared
            .adapter
            .invoke(command, || shared.issue_state(EngineState::Null))
            .await?;

        shared.end_of_stream.store(false, Ordering::SeqCst);
        *lock(&shared.duration) = None;
        shared.set_state(PlaybackState::Stopped);
        info!("Playback stopped");
        Ok(())
    }

    /// Seeks to `position`, which must lie within `[0, duration]`.
    pub async fn seek(&self, position: Duration) -> Result<()> {
        let duration = self.duration()?;
        if position > duration {
            return Err(PlaybinError::InvalidPosition { position, duration });
        }

        debug!("Seeking to {:?}", position);
        let shared = &self.shared;
        shared.end_of_stream.store(false, Ordering::SeqCst);

        let command = Command::new(RequestKind::Seek, |msg| {
            matches!(msg, BusMessage::AsyncDone)
        })
        .timeout(shared.timeout());

        shared
            .adapter
            .invoke(command, || {
                let _engine = shared.lock_engine();
                shared.engine.seek(position)?;
                Ok(Issued::Pending)
            })
            .await
            .map(|_| ())
    }

    /// Seeks `delta` back from the current position, stopping at the start.
    pub async fn rewind(&self, delta: Duration) -> Result<()> {
        let duration = self.duration()?;
        let target = self.position()?.saturating_sub(delta).min(duration);
        self.seek(target).await
    }

    /// Seeks `delta` ahead of the current position, stopping at the end.
    pub async fn forward(&self, delta: Duration) -> Result<()> {
        let duration = self.duration()?;
        let target = self.position()?.saturating_add(delta).min(duration);
        self.seek(target).await
    }

    pub fn position(&self) -> Result<Duration> {
        self.require_source()?;
        self.shared
            .engine
            .position()
            .ok_or(PlaybinError::NotAvailable("position"))
    }

    /// Stream duration, cached until the engine reports a change.
    pub fn duration(&self) -> Result<Duration> {
        self.require_source()?;
        let mut cached = lock(&self.shared.duration);
        if let Some(duration) = *cached {
            return Ok(duration);
        }
        let duration = self
            .shared
            .engine
            .duration()
            .ok_or(PlaybinError::NotAvailable("duration"))?;
        *cached = Some(duration);
        Ok(duration)
    }

    /// A fresh snapshot of the subtitle streams.
    pub fn subtitle_tracks(&self) -> Tracks {
        Tracks::new(self.shared.engine.clone(), TrackKind::Subtitle)
    }

    /// A fresh snapshot of the audio streams.
    pub fn audio_tracks(&self) -> Tracks {
        Tracks::new(self.shared.engine.clone(), TrackKind::Audio)
    }

    pub fn subtitle_track(&self) -> Option<usize> {
        self.shared.engine.current_track(TrackKind::Subtitle)
    }

    pub fn audio_track(&self) -> Option<usize> {
        self.shared.engine.current_track(TrackKind::Audio)
    }

    /// Selects a subtitle stream, or disables subtitles with `None`.
    pub async fn set_subtitle_track(&self, index: Option<usize>) -> Result<()> {
        self.select_track(TrackKind::Subtitle, index)
    }

    /// Selects an audio stream, or disables audio with `None`.
    pub async fn set_audio_track(&self, index: Option<usize>) -> Result<()> {
        self.select_track(TrackKind::Audio, index)
    }

    fn select_track(&self, kind: TrackKind, index: Option<usize>) -> Result<()> {
        if let Some(index) = index {
            let count = self.shared.engine.track_count(kind);
            if index >= count {
                return Err(PlaybinError::InvalidIndex { kind, index, count });
            }
        }

        let _engine = self.shared.lock_engine();
        self.shared.engine.select_track(kind, index)?;
        match index {
            Some(index) => info!("Selected {} track {}", kind, index),
            None => info!("Disabled {} tracks", kind),
        }
        Ok(())
    }

    /// Uses an external subtitle file for the next source that starts.
    pub async fn set_subtitle_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Err(e) = tokio::fs::File::open(path).await {
            debug!("Cannot open subtitle file {:?}: {}", path, e);
            return Err(PlaybinError::NotFound(path.to_path_buf()));
        }
        let uri = file_uri(path)?;

        let _engine = self.shared.lock_engine();
        self.shared.engine.set_subtitle_uri(&uri)?;
        info!("Subtitle file set to {}", uri);
        Ok(())
    }

    pub fn subtitle_file(&self) -> Option<PathBuf> {
        let uri = self.shared.engine.subtitle_uri()?;
        Url::parse(&uri).ok()?.to_file_path().ok()
    }

    pub fn volume(&self) -> f64 {
        self.shared.engine.volume()
    }

    /// Sets the volume. Values outside `[0.0, 1.0]` are rejected, not clamped.
    pub async fn set_volume(&self, level: f64) -> Result<()> {
        if !level.is_finite() || !(0.0..=1.0).contains(&level) {
            return Err(PlaybinError::InvalidVolume(level));
        }
        let _engine = self.shared.lock_engine();
        self.shared.engine.set_volume(level);
        debug!("Volume set to {}", level);
        Ok(())
    }

    pub fn state(&self) -> PlaybackState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<PlaybackState> {
        self.shared.state.subscribe()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybinEvent> {
        self.shared.events.subscribe()
    }

    /// Whether the engine reported end of stream since the last play/seek/stop.
    pub fn end_of_stream(&self) -> bool {
        self.shared.end_of_stream.load(Ordering::SeqCst)
    }

    /// The last engine error nobody was awaiting.
    pub fn async_error(&self) -> Option<PlaybinError> {
        lock(&self.shared.async_error).clone()
    }

    pub fn take_async_error(&self) -> Option<PlaybinError> {
        lock(&self.shared.async_error).take()
    }
}

impl Drop for Playbin {
    fn drop(&mut self) {
        self.dispatcher.abort();
    }
}

/// Lazily queried track descriptors.
///
/// The count is fixed when the iterator is created; each descriptor is read
/// from the engine as it is yielded.
pub struct Tracks {
    engine: Arc<dyn Engine>,
    kind: TrackKind,
    next: usize,
    count: usize,
}

impl Tracks {
    fn new(engine: Arc<dyn Engine>, kind: TrackKind) -> Self {
        let count = engine.track_count(kind);
        Self {
            engine,
            kind,
            next: 0,
            count,
        }
    }
}

impl Iterator for Tracks {
    type Item = TrackDescriptor;

    fn next(&mut self) -> Option<TrackDescriptor> {
        if self.next >= self.count {
            return None;
        }
        let track = self.engine.track(self.kind, self.next);
        self.next += 1;
        Some(track)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.next;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Tracks {}

/// Turns a URI or a local path into a URI the engine understands.
async fn resolve_source(source: &str) -> Result<String> {
    // Single-letter schemes are Windows drive letters, not URIs
    if let Ok(url) = Url::parse(source)
        && url.scheme().len() > 1
    {
        return Ok(url.into());
    }

    let path = Path::new(source);
    if tokio::fs::metadata(path).await.is_err() {
        return Err(PlaybinError::NotFound(path.to_path_buf()));
    }
    file_uri(path)
}

fn file_uri(path: &Path) -> Result<String> {
    let absolute =
        std::path::absolute(path).map_err(|_| PlaybinError::NotFound(path.to_path_buf()))?;
    Url::from_file_path(&absolute)
        .map(String::from)
        .map_err(|_| PlaybinError::NotFound(absolute))
}

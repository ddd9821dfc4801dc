use async_playbin::player::types::{EngineState, StateChange};
use async_playbin::player::{BusMessage, Engine, MessagePump, MessageSink};
use async_playbin::utils::{PlaybinError, Result};
use async_playbin::{TrackDescriptor, TrackKind};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

enum PumpCommand {
    Post(BusMessage),
    Panic(String),
    Quit,
}

/// A bus that delivers whatever the test (or the mock engine) posts.
pub struct MockPump {
    sender: Mutex<mpsc::Sender<PumpCommand>>,
    receiver: Mutex<mpsc::Receiver<PumpCommand>>,
}

impl MockPump {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender: Mutex::new(sender),
            receiver: Mutex::new(receiver),
        }
    }

    pub fn post(&self, msg: BusMessage) {
        let _ = self.sender.lock().unwrap().send(PumpCommand::Post(msg));
    }

    /// Makes message conversion panic on the loop thread.
    pub fn post_panic(&self, reason: &str) {
        let _ = self
            .sender
            .lock()
            .unwrap()
            .send(PumpCommand::Panic(reason.to_string()));
    }
}

impl MessagePump for MockPump {
    fn run(&self, sink: MessageSink, on_ready: &dyn Fn()) -> Result<()> {
        let receiver = self.receiver.lock().unwrap();
        on_ready();
        while let Ok(command) = receiver.recv() {
            match command {
                PumpCommand::Post(msg) => {
                    sink.forward(|| Some(msg));
                }
                PumpCommand::Panic(reason) => {
                    sink.forward(|| panic!("{}", reason));
                }
                PumpCommand::Quit => break,
            }
        }
        Ok(())
    }

    fn quit(&self) {
        let _ = self.sender.lock().unwrap().send(PumpCommand::Quit);
    }
}

/// How the mock answers asynchronous requests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reply {
    /// Post the confirmation straight away.
    Confirm,
    /// Post nothing; the test posts by hand.
    Hold,
}

struct TrackList {
    tracks: Vec<TrackDescriptor>,
    current: usize,
    enabled: bool,
}

struct MockState {
    engine_state: EngineState,
    uri: Option<String>,
    suburi: Option<String>,
    position: Duration,
    duration: Option<Duration>,
    volume: f64,
    state_reply: Reply,
    seek_reply: Reply,
    /// Posted instead of confirming the next asynchronous state change.
    next_error: Option<BusMessage>,
    fail_set_state: bool,
    audio: TrackList,
    subtitles: TrackList,
    calls: Vec<String>,
}

/// In-memory engine that answers on a [`MockPump`] like `playbin` would.
pub struct MockEngine {
    pump: Arc<MockPump>,
    state: Mutex<MockState>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            pump: Arc::new(MockPump::new()),
            state: Mutex::new(MockState {
                engine_state: EngineState::Null,
                uri: None,
                suburi: None,
                position: Duration::ZERO,
                duration: Some(Duration::from_secs(120)),
                volume: 1.0,
                state_reply: Reply::Confirm,
                seek_reply: Reply::Confirm,
                next_error: None,
                fail_set_state: false,
                audio: TrackList {
                    tracks: Vec::new(),
                    current: 0,
                    enabled: true,
                },
                subtitles: TrackList {
                    tracks: Vec::new(),
                    current: 0,
                    enabled: true,
                },
                calls: Vec::new(),
            }),
        }
    }

    pub fn mock_pump(&self) -> Arc<MockPump> {
        self.pump.clone()
    }

    pub fn with_tracks(self, kind: TrackKind, languages: &[Option<&str>]) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let tracks = languages
                .iter()
                .enumerate()
                .map(|(index, language)| TrackDescriptor {
                    index,
                    kind,
                    language: language.map(str::to_string),
                    codec: None,
                })
                .collect();
            match kind {
                TrackKind::Audio => state.audio.tracks = tracks,
                TrackKind::Subtitle => state.subtitles.tracks = tracks,
            }
        }
        self
    }

    pub fn set_duration(&self, duration: Option<Duration>) {
        self.state.lock().unwrap().duration = duration;
    }

    pub fn set_state_reply(&self, reply: Reply) {
        self.state.lock().unwrap().state_reply = reply;
    }

    pub fn set_seek_reply(&self, reply: Reply) {
        self.state.lock().unwrap().seek_reply = reply;
    }

    pub fn fail_next_state_change(&self, code: &str, message: &str) {
        self.state.lock().unwrap().next_error = Some(BusMessage::Error {
            code: code.to_string(),
            message: message.to_string(),
            debug: None,
        });
    }

    pub fn reject_state_changes(&self, reject: bool) {
        self.state.lock().unwrap().fail_set_state = reject;
    }

    /// Posts the confirmation a held state change is waiting for.
    pub fn confirm_state(&self) {
        let msg = {
            let state = self.state.lock().unwrap();
            BusMessage::StateChanged {
                old: EngineState::Paused,
                new: state.engine_state,
            }
        };
        self.pump.post(msg);
    }

    pub fn post(&self, msg: BusMessage) {
        self.pump.post(msg);
    }

    pub fn engine_state(&self) -> EngineState {
        self.state.lock().unwrap().engine_state
    }

    pub fn uri(&self) -> Option<String> {
        self.state.lock().unwrap().uri.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    fn tracks(state: &mut MockState, kind: TrackKind) -> &mut TrackList {
        match kind {
            TrackKind::Audio => &mut state.audio,
            TrackKind::Subtitle => &mut state.subtitles,
        }
    }
}

impl Engine for MockEngine {
    fn pump(&self) -> Arc<dyn MessagePump> {
        self.pump.clone()
    }

    fn set_uri(&self, uri: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("set_uri({uri})"));
        state.uri = Some(uri.to_string());
        state.audio.enabled = true;
        state.subtitles.enabled = true;
        Ok(())
    }

    fn set_state(&self, target: EngineState) -> Result<StateChange> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("set_state({target:?})"));

        if state.fail_set_state && target != EngineState::Null {
            return Err(PlaybinError::Engine {
                code: "state-change".to_string(),
                message: "rejected".to_string(),
            });
        }

        let old = state.engine_state;
        state.engine_state = target;

        // Downward transitions to NULL/READY complete synchronously, as in GStreamer
        if target <= EngineState::Ready || old == target {
            return Ok(StateChange::Success);
        }

        if let Some(error) = state.next_error.take() {
            state.engine_state = EngineState::Null;
            self.pump.post(error);
        } else if state.state_reply == Reply::Confirm {
            self.pump.post(BusMessage::StateChanged { old, new: target });
        }
        Ok(StateChange::Async)
    }

    fn abort_state(&self) {
        self.state.lock().unwrap().calls.push("abort_state".to_string());
    }

    fn seek(&self, position: Duration) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("seek({position:?})"));
        state.position = position;
        if state.seek_reply == Reply::Confirm {
            self.pump.post(BusMessage::AsyncDone);
        }
        Ok(())
    }

    fn position(&self) -> Option<Duration> {
        let state = self.state.lock().unwrap();
        (state.engine_state >= EngineState::Paused).then_some(state.position)
    }

    fn duration(&self) -> Option<Duration> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("duration".to_string());
        if state.engine_state >= EngineState::Paused {
            state.duration
        } else {
            None
        }
    }

    fn volume(&self) -> f64 {
        self.state.lock().unwrap().volume
    }

    fn set_volume(&self, volume: f64) {
        self.state.lock().unwrap().volume = volume;
    }

    fn track_count(&self, kind: TrackKind) -> usize {
        Self::tracks(&mut self.state.lock().unwrap(), kind)
            .tracks
            .len()
    }

    fn track(&self, kind: TrackKind, index: usize) -> TrackDescriptor {
        Self::tracks(&mut self.state.lock().unwrap(), kind).tracks[index].clone()
    }

    fn current_track(&self, kind: TrackKind) -> Option<usize> {
        let mut state = self.state.lock().unwrap();
        let list = Self::tracks(&mut state, kind);
        (list.enabled && !list.tracks.is_empty()).then_some(list.current)
    }

    fn select_track(&self, kind: TrackKind, index: Option<usize>) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(format!("select_track({kind}, {index:?})"));
        let list = Self::tracks(&mut state, kind);
        match index {
            Some(index) => {
                list.enabled = true;
                list.current = index;
            }
            None => list.enabled = false,
        }
        Ok(())
    }

    fn subtitle_uri(&self) -> Option<String> {
        self.state.lock().unwrap().suburi.clone()
    }

    fn set_subtitle_uri(&self, uri: &str) -> Result<()> {
        self.state.lock().unwrap().suburi = Some(uri.to_string());
        Ok(())
    }
}

use super::bus_handler::GlibPump;
use super::stream_manager::StreamManager;
use crate::config::EngineConfig;
use crate::player::traits::{Engine, MessagePump};
use crate::player::types::{EngineState, StateChange, TrackDescriptor, TrackKind};
use crate::utils::{PlaybinError, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// [`Engine`] backed by a GStreamer `playbin` element.
pub struct GstEngine {
    playbin: gst::Element,
    streams: StreamManager,
    pump: Arc<GlibPump>,
}

impl GstEngine {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        debug!("Initializing GStreamer engine");

        if let Err(e) = gst::init() {
            error!("Failed to initialize GStreamer: {}", e);
            return Err(PlaybinError::EngineUnavailable(format!(
                "failed to initialize GStreamer: {e}"
            )));
        }

        let playbin = gst::ElementFactory::make(&config.element)
            .name("playbin")
            .build()
            .map_err(|e| {
                PlaybinError::EngineUnavailable(format!(
                    "failed to create {} element: {e}",
                    config.element
                ))
            })?;

        if let Some(name) = &config.audio_sink {
            playbin.set_property("audio-sink", make_sink(name)?);
            debug!("Using audio sink {}", name);
        }
        if let Some(name) = &config.video_sink {
            playbin.set_property("video-sink", make_sink(name)?);
            debug!("Using video sink {}", name);
        }

        info!("Created {} element", config.element);

        Ok(Self {
            streams: StreamManager::new(playbin.clone()),
            pump: Arc::new(GlibPump::new(playbin.clone())),
            playbin,
        })
    }
}

fn make_sink(name: &str) -> Result<gst::Element> {
    gst::ElementFactory::make(name).build().map_err(|e| {
        PlaybinError::EngineUnavailable(format!("failed to create sink {name}: {e}"))
    })
}

fn gst_state(state: EngineState) -> gst::State {
    match state {
        EngineState::Null => gst::State::Null,
        EngineState::Ready => gst::State::Ready,
        EngineState::Paused => gst::State::Paused,
        EngineState::Playing => gst::State::Playing,
    }
}

impl Engine for GstEngine {
    fn pump(&self) -> Arc<dyn MessagePump> {
        self.pump.clone()
    }

    fn set_uri(&self, uri: &str) -> Result<()> {
        self.playbin.set_property("uri", uri);
        self.streams.enable_all()
    }

    fn set_state(&self, state: EngineState) -> Result<StateChange> {
        match self.playbin.set_state(gst_state(state)) {
            Ok(gst::StateChangeSuccess::Success) => Ok(StateChange::Success),
            Ok(gst::StateChangeSuccess::Async) => Ok(StateChange::Async),
            Ok(gst::StateChangeSuccess::NoPreroll) => Ok(StateChange::NoPreroll),
            Err(e) => {
                warn!("Failed to set playbin to {:?}: {:?}", state, e);
                Err(PlaybinError::engine(
                    "state-change",
                    format!("failed to change state to {:?}", state),
                ))
            }
        }
    }

    fn abort_state(&self) {
        debug!("Aborting pending state change");
        self.playbin.abort_state();
    }

    fn seek(&self, position: Duration) -> Result<()> {
        let nanos = u64::try_from(position.as_nanos()).unwrap_or(u64::MAX);
        let target = gst::ClockTime::from_nseconds(nanos);
        debug!("Seeking to {}", target.display());

        self.playbin
            .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::KEY_UNIT, target)
            .map_err(|e| PlaybinError::engine("seek", e.to_string()))
    }

    fn position(&self) -> Option<Duration> {
        self.playbin
            .query_position::<gst::ClockTime>()
            .map(|pos| Duration::from_nanos(pos.nseconds()))
    }

    fn duration(&self) -> Option<Duration> {
        self.playbin
            .query_duration::<gst::ClockTime>()
            .map(|dur| Duration::from_nanos(dur.nseconds()))
    }

    fn volume(&self) -> f64 {
        self.playbin.property::<f64>("volume")
    }

    fn set_volume(&self, volume: f64) {
        self.playbin.set_property("volume", volume);
    }

    fn track_count(&self, kind: TrackKind) -> usize {
        self.streams.track_count(kind)
    }

    fn track(&self, kind: TrackKind, index: usize) -> TrackDescriptor {
        self.streams.track(kind, index)
    }

    fn current_track(&self, kind: TrackKind) -> Option<usize> {
        self.streams.current_track(kind)
    }

    fn select_track(&self, kind: TrackKind, index: Option<usize>) -> Result<()> {
        self.streams.select_track(kind, index)
    }

    fn subtitle_uri(&self) -> Option<String> {
        self.playbin.property::<Option<String>>("suburi")
    }

    fn set_subtitle_uri(&self, uri: &str) -> Result<()> {
        self.playbin.set_property("suburi", uri);
        Ok(())
    }
}

impl Drop for GstEngine {
    fn drop(&mut self) {
        if self.playbin.set_state(gst::State::Null).is_err() {
            warn!("Failed to set playbin to NULL on drop");
        }
    }
}

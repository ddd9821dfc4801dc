use crate::player::event_loop::MessageSink;
use crate::player::traits::MessagePump;
use crate::player::types::{BusMessage, EngineState};
use crate::utils::{PlaybinError, Result};
use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, error, trace, warn};

/// Translates a native bus message into the crate's vocabulary.
///
/// Returns `None` for messages nobody upstream cares about. State changes
/// of child elements are dropped; only `playbin` itself is mirrored.
pub fn convert_message(msg: &gst::Message, playbin: &gst::Element) -> Option<BusMessage> {
    use gst::MessageView;

    match msg.view() {
        MessageView::StateChanged(state_changed) => {
            let from_playbin = msg
                .src()
                .is_some_and(|src| src == playbin.upcast_ref::<gst::Object>());
            if !from_playbin {
                return None;
            }
            let old = engine_state(state_changed.old());
            let new = engine_state(state_changed.current());
            trace!("Playbin state changed from {:?} to {:?}", old, new);
            Some(BusMessage::StateChanged { old, new })
        }
        MessageView::AsyncDone(_) => {
            debug!("AsyncDone");
            Some(BusMessage::AsyncDone)
        }
        MessageView::Eos(_) => Some(BusMessage::EndOfStream),
        MessageView::DurationChanged(_) => Some(BusMessage::DurationChanged),
        MessageView::Error(err) => {
            error!(
                "Bus error from {:?}: {} ({:?})",
                err.src().map(|s| s.path_string()),
                err.error(),
                err.debug()
            );
            let gerror = err.error();
            Some(BusMessage::Error {
                code: error_code(&gerror),
                message: gerror.message().to_string(),
                debug: err.debug().map(|d| d.to_string()),
            })
        }
        MessageView::Warning(warning) => {
            warn!(
                "Bus warning from {:?}: {}",
                warning.src().map(|s| s.path_string()),
                warning.error()
            );
            None
        }
        _ => None,
    }
}

fn engine_state(state: gst::State) -> EngineState {
    match state {
        gst::State::Playing => EngineState::Playing,
        gst::State::Paused => EngineState::Paused,
        gst::State::Ready => EngineState::Ready,
        _ => EngineState::Null,
    }
}

/// `domain:Kind`, e.g. `resource:NotFound`.
fn error_code(err: &glib::Error) -> String {
    if let Some(kind) = err.kind::<gst::ResourceError>() {
        format!("resource:{:?}", kind)
    } else if let Some(kind) = err.kind::<gst::StreamError>() {
        format!("stream:{:?}", kind)
    } else if let Some(kind) = err.kind::<gst::CoreError>() {
        format!("core:{:?}", kind)
    } else if let Some(kind) = err.kind::<gst::LibraryError>() {
        format!("library:{:?}", kind)
    } else {
        err.domain().as_str().to_string()
    }
}

#[derive(Default)]
struct LoopState {
    running: Option<(glib::MainContext, glib::MainLoop)>,
    quit_requested: bool,
}

/// Drains a `playbin` bus with a private GLib main loop.
pub struct GlibPump {
    playbin: gst::Element,
    state: Mutex<LoopState>,
}

impl GlibPump {
    pub fn new(playbin: gst::Element) -> Self {
        Self {
            playbin,
            state: Mutex::new(LoopState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl MessagePump for GlibPump {
    fn run(&self, sink: MessageSink, on_ready: &dyn Fn()) -> Result<()> {
        let bus = self
            .playbin
            .bus()
            .ok_or_else(|| PlaybinError::EngineUnavailable("playbin has no bus".to_string()))?;

        let context = glib::MainContext::new();
        let main_loop = glib::MainLoop::new(Some(&context), false);

        let outcome = context.with_thread_default(|| -> Result<()> {
            let playbin = self.playbin.clone();
            // Removed again when the guard drops at the end of this closure
            let _watch = bus
                .add_watch(move |_, msg| {
                    if sink.forward(|| convert_message(msg, &playbin)) {
                        glib::ControlFlow::Continue
                    } else {
                        debug!("Message sink closed, removing bus watch");
                        glib::ControlFlow::Break
                    }
                })
                .map_err(|e| {
                    PlaybinError::EngineUnavailable(format!("failed to watch bus: {e}"))
                })?;

            {
                let mut state = self.state();
                if std::mem::take(&mut state.quit_requested) {
                    debug!("Quit requested before the loop started");
                    return Ok(());
                }
                state.running = Some((context.clone(), main_loop.clone()));
            }

            on_ready();
            main_loop.run();
            self.state().running = None;
            Ok(())
        });

        outcome.map_err(|e| {
            PlaybinError::EngineUnavailable(format!("main context busy: {e}"))
        })?
    }

    fn quit(&self) {
        let mut state = self.state();
        match state.running.take() {
            Some((context, main_loop)) => {
                // Queued on the loop's own context so a quit racing run() is not lost
                context.invoke(move || main_loop.quit());
            }
            None => state.quit_requested = true,
        }
    }
}

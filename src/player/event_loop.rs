use crate::config::EngineConfig;
use crate::player::traits::MessagePump;
use crate::player::types::BusMessage;
use crate::utils::{PlaybinError, Result};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Thread-safe hand-off from the native loop thread into the host runtime.
#[derive(Debug, Clone)]
pub struct MessageSink {
    sender: mpsc::UnboundedSender<BusMessage>,
}

impl MessageSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BusMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Queues a message for the host side. Returns `false` once nobody listens.
    pub fn send(&self, msg: BusMessage) -> bool {
        self.sender.send(msg).is_ok()
    }

    /// Converts one native message and forwards the result.
    ///
    /// A panic inside `convert` is caught here and forwarded as an
    /// `internal` error message instead of unwinding through the native loop.
    pub fn forward<F>(&self, convert: F) -> bool
    where
        F: FnOnce() -> Option<BusMessage>,
    {
        match panic::catch_unwind(AssertUnwindSafe(convert)) {
            Ok(Some(msg)) => self.send(msg),
            Ok(None) => !self.sender.is_closed(),
            Err(payload) => {
                let reason = panic_message(payload.as_ref());
                error!("Native message handling panicked: {}", reason);
                self.send(internal_error(reason))
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

fn internal_error(message: String) -> BusMessage {
    BusMessage::Error {
        code: "internal".to_string(),
        message,
        debug: None,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic in native event loop".to_string()
    }
}

struct Running {
    thread: JoinHandle<()>,
    exited: std_mpsc::Receiver<()>,
}

/// Hosts a [`MessagePump`] on its own OS thread.
///
/// The owning application starts it before issuing commands and stops it on
/// the way out. There is no process-wide instance.
pub struct EventLoop {
    pump: Arc<dyn MessagePump>,
    running: Option<Running>,
    startup_timeout: Duration,
    shutdown_timeout: Duration,
}

impl EventLoop {
    pub fn new(pump: Arc<dyn MessagePump>) -> Self {
        Self {
            pump,
            running: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn from_config(pump: Arc<dyn MessagePump>, config: &EngineConfig) -> Self {
        Self::new(pump).with_timeouts(config.startup_timeout(), config.shutdown_timeout())
    }

    pub fn with_timeouts(mut self, startup: Duration, shutdown: Duration) -> Self {
        self.startup_timeout = startup;
        self.shutdown_timeout = shutdown;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Starts pumping native messages into `sink`.
    ///
    /// Calling this while already running is a no-op.
    pub fn start(&mut self, sink: MessageSink) -> Result<()> {
        if self.running.is_some() {
            debug!("Event loop already running, ignoring start()");
            return Ok(());
        }

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (exit_tx, exit_rx) = std_mpsc::channel::<()>();
        let pump = self.pump.clone();

        let thread = thread::Builder::new()
            .name("playbin-event-loop".to_string())
            .spawn(move || {
                let ready = AtomicBool::new(false);
                let on_ready = || {
                    if !ready.swap(true, Ordering::SeqCst) {
                        let _ = ready_tx.send(Ok(()));
                    }
                };

                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| pump.run(sink.clone(), &on_ready)));
                let failure = match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e),
                    Err(payload) => Some(PlaybinError::EngineUnavailable(panic_message(
                        payload.as_ref(),
                    ))),
                };

                if let Some(err) = failure {
                    if ready.load(Ordering::SeqCst) {
                        // start() already returned; route it to whoever is waiting
                        error!("Event loop died: {}", err);
                        sink.send(internal_error(err.to_string()));
                    } else {
                        let _ = ready_tx.send(Err(err));
                    }
                }

                debug!("Event loop thread exiting");
                let _ = exit_tx.send(());
            })
            .map_err(|e| {
                PlaybinError::EngineUnavailable(format!("failed to spawn event loop thread: {e}"))
            })?;

        match ready_rx.recv_timeout(self.startup_timeout) {
            Ok(Ok(())) => {
                info!("Event loop started");
                self.running = Some(Running {
                    thread,
                    exited: exit_rx,
                });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                error!("Event loop failed to start: {}", e);
                Err(match e {
                    PlaybinError::EngineUnavailable(_) => e,
                    other => PlaybinError::EngineUnavailable(other.to_string()),
                })
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                self.pump.quit();
                warn!(
                    "Event loop not ready after {:?}, detaching thread",
                    self.startup_timeout
                );
                Err(PlaybinError::EngineUnavailable(format!(
                    "event loop not ready after {:?}",
                    self.startup_timeout
                )))
            }
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                let _ = thread.join();
                Err(PlaybinError::EngineUnavailable(
                    "event loop exited during startup".to_string(),
                ))
            }
        }
    }

    /// Quits the native loop and waits (bounded) for its thread.
    ///
    /// Safe to call when never started, and more than once.
    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };

        debug!("Stopping event loop");
        self.pump.quit();

        match running.exited.recv_timeout(self.shutdown_timeout) {
            Ok(()) | Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                if running.thread.join().is_err() {
                    warn!("Event loop thread panicked during shutdown");
                }
                info!("Event loop stopped");
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {
                warn!(
                    "Event loop did not exit within {:?}, detaching thread",
                    self.shutdown_timeout
                );
            }
        }
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

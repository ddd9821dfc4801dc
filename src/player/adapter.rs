use crate::player::types::BusMessage;
use crate::utils::{PlaybinError, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as Lane, oneshot};
use tracing::{debug, trace, warn};

/// Independent request lanes. At most one request per kind is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    StateChange,
    Seek,
}

/// What the native call reported when it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Issued {
    /// Done synchronously, nothing to wait for on the bus.
    Completed,
    /// The outcome will be posted on the bus.
    Pending,
}

/// How an awaited request was satisfied.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Immediate,
    Message(BusMessage),
}

/// Result of feeding one bus message to the adapter.
#[derive(Debug, PartialEq)]
pub enum Intake {
    Resolved(RequestKind),
    /// Nobody was waiting for this message.
    Unmatched(BusMessage),
}

type Matcher = Box<dyn Fn(&BusMessage) -> bool + Send>;
type AbortHook = Box<dyn FnOnce() + Send>;

/// Describes one awaitable command.
pub struct Command {
    kind: RequestKind,
    matcher: Matcher,
    timeout: Option<Duration>,
    on_cancel: Option<AbortHook>,
}

impl Command {
    pub fn new<M>(kind: RequestKind, matcher: M) -> Self
    where
        M: Fn(&BusMessage) -> bool + Send + 'static,
    {
        Self {
            kind,
            matcher: Box::new(matcher),
            timeout: None,
            on_cancel: None,
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Hook run when the caller drops the future while the request is pending.
    pub fn on_cancel<F>(mut self, hook: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_cancel = Some(Box::new(hook));
        self
    }
}

struct PendingRequest {
    id: u64,
    kind: RequestKind,
    matcher: Matcher,
    respond_to: oneshot::Sender<Result<BusMessage>>,
}

/// Turns "issue a native call, wait for the bus to confirm it" into one future.
///
/// Pending requests are kept in issuance order. Messages are matched against
/// them in arrival order; error messages fail the oldest pending request.
/// Requests of the same kind queue behind each other.
pub struct CommandAdapter {
    pending: Mutex<Vec<PendingRequest>>,
    next_id: AtomicU64,
    state_lane: Lane<()>,
    seek_lane: Lane<()>,
}

impl CommandAdapter {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            state_lane: Lane::new(()),
            seek_lane: Lane::new(()),
        }
    }

    fn lane(&self, kind: RequestKind) -> &Lane<()> {
        match kind {
            RequestKind::StateChange => &self.state_lane,
            RequestKind::Seek => &self.seek_lane,
        }
    }

    fn pending(&self) -> MutexGuard<'_, Vec<PendingRequest>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of requests currently waiting on the bus.
    pub fn pending_count(&self) -> usize {
        self.pending().len()
    }

    pub fn has_pending(&self, kind: RequestKind) -> bool {
        self.pending().iter().any(|p| p.kind == kind)
    }

    fn remove(&self, id: u64) -> Option<PendingRequest> {
        let mut pending = self.pending();
        let pos = pending.iter().position(|p| p.id == id)?;
        Some(pending.remove(pos))
    }

    /// Issues `issue` and waits for the bus message that confirms it.
    ///
    /// The request is registered before `issue` runs, so a confirmation that
    /// races ahead of the native call's return is never lost.
    pub async fn invoke<I>(&self, command: Command, issue: I) -> Result<Completion>
    where
        I: FnOnce() -> Result<Issued>,
    {
        let Command {
            kind,
            matcher,
            timeout,
            on_cancel,
        } = command;

        let _lane = self.lane(kind).lock().await;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (respond_to, response) = oneshot::channel();
        self.pending().push(PendingRequest {
            id,
            kind,
            matcher,
            respond_to,
        });
        trace!("Registered {:?} request #{}", kind, id);

        let mut guard = PendingGuard {
            adapter: self,
            id,
            on_cancel,
            armed: true,
        };

        match issue() {
            Ok(Issued::Pending) => {}
            Ok(Issued::Completed) => {
                guard.disarm();
                self.remove(id);
                return Ok(Completion::Immediate);
            }
            Err(e) => {
                guard.disarm();
                self.remove(id);
                debug!("{:?} request #{} failed synchronously: {}", kind, id, e);
                return Err(e);
            }
        }

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, response).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    guard.disarm();
                    self.remove(id);
                    warn!("{:?} request #{} timed out after {:?}", kind, id, limit);
                    return Err(PlaybinError::Timeout(limit));
                }
            },
            None => response.await,
        };
        guard.disarm();

        match outcome {
            Ok(result) => result.map(Completion::Message),
            // Sender dropped without an answer: the adapter was torn down
            Err(_) => Err(PlaybinError::Cancelled),
        }
    }

    /// Hands one bus message to the pending requests.
    pub fn intake(&self, msg: BusMessage) -> Intake {
        let mut pending = self.pending();

        let pos = if msg.is_error() {
            if pending.is_empty() { None } else { Some(0) }
        } else {
            pending.iter().position(|p| (p.matcher)(&msg))
        };

        let Some(pos) = pos else {
            return Intake::Unmatched(msg);
        };
        let request = pending.remove(pos);
        drop(pending);

        let result = match msg.error() {
            Some(err) => Err(err),
            None => Ok(msg),
        };

        trace!("Resolving {:?} request #{}", request.kind, request.id);
        // The receiver may have just been dropped; the guard already cleaned up then.
        let _ = request.respond_to.send(result);
        Intake::Resolved(request.kind)
    }

    /// Fails every pending request of `kind` with [`PlaybinError::Cancelled`].
    pub fn cancel_kind(&self, kind: RequestKind) -> usize {
        let cancelled: Vec<PendingRequest> = {
            let mut pending = self.pending();
            let (cancelled, kept) = pending.drain(..).partition(|p| p.kind == kind);
            *pending = kept;
            cancelled
        };

        let count = cancelled.len();
        for request in cancelled {
            debug!("Cancelling {:?} request #{}", request.kind, request.id);
            let _ = request.respond_to.send(Err(PlaybinError::Cancelled));
        }
        count
    }

    /// Fails everything still pending with `err`.
    pub fn fail_all(&self, err: PlaybinError) {
        let drained: Vec<PendingRequest> = self.pending().drain(..).collect();
        for request in drained {
            let _ = request.respond_to.send(Err(err.clone()));
        }
    }
}

impl Default for CommandAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes a pending request when the awaiting future is dropped early.
struct PendingGuard<'a> {
    adapter: &'a CommandAdapter,
    id: u64,
    on_cancel: Option<AbortHook>,
    armed: bool,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Some(request) = self.adapter.remove(self.id) {
            debug!("{:?} request #{} cancelled by caller", request.kind, request.id);
            if let Some(hook) = self.on_cancel.take() {
                hook();
            }
        }
    }
}

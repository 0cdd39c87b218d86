//! Session type and related facilities.
//!
//! A [`Session`] is one request's full mutable state, owned by the
//! [`Registry`][registry] for its registered lifetime. The driver task never
//! touches the `Session` record itself; it communicates only through the
//! completion channel, so everything here is mutated from the host thread.
//!
//! [registry]: crate::registry::Registry

use {
    crate::error::{Error, ErrorKind},
    crate::host::TimerId,
    bytes::Bytes,
    std::fmt,
    std::sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
    std::time::Instant,
    tokio::{sync::oneshot, task::JoinHandle},
};

/// Process-unique session identifier. Monotonically increasing, never reused;
/// a stale completion or timer tick that outlives its session can therefore
/// never alias a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// The request state machine's states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Issue the request, including any body.
    Send = 0,
    /// Probe the content length and pre-size the response buffer.
    Allocate = 1,
    /// Request the next chunk of response body.
    ReadChunk = 2,
    /// Append the just-read chunk to the response buffer.
    ChunkComplete = 3,
    /// Query the final status and release transport handles.
    Terminate = 4,
    /// Terminal; the only remaining action is delivering the result.
    Complete = 5,
}

impl SessionState {
    fn from_u8(raw: u8) -> SessionState {
        match raw {
            0 => SessionState::Send,
            1 => SessionState::Allocate,
            2 => SessionState::ReadChunk,
            3 => SessionState::ChunkComplete,
            4 => SessionState::Terminate,
            _ => SessionState::Complete,
        }
    }
}

/// Cross-thread view of a session's current state.
///
/// The driver task stores into this as it advances; the host thread may read
/// it at any time. It carries no synchronization obligations beyond the
/// atomic itself.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Arc<StateCell> {
        Arc::new(StateCell(AtomicU8::new(SessionState::Send as u8)))
    }

    pub fn set(&self, state: SessionState) {
        self.0.store(state as u8, Ordering::Release);
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }
}

/// The terminal result of a session, delivered to the script callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The request completed with the canonical OK status; carries the
    /// response body.
    Ok(Bytes),
    /// The request failed; carries a classification and a human-readable
    /// diagnostic in place of the body.
    Err { kind: ErrorKind, message: String },
}

impl Outcome {
    /// Build a failed outcome from an engine error, classifying by the
    /// error's own kind when it has one and by `fallback` (the step that
    /// produced it) otherwise.
    pub fn failure(fallback: ErrorKind, error: &Error) -> Outcome {
        Outcome::Err {
            kind: error.intrinsic_kind().unwrap_or(fallback),
            message: error.to_string(),
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    /// The boolean-plus-text shape of the script binding surface.
    pub fn into_parts(self) -> (bool, Bytes) {
        match self {
            Outcome::Ok(body) => (true, body),
            Outcome::Err { message, .. } => (false, message.into()),
        }
    }
}

/// A script-level completion callback. Invoked at most once, and only ever on
/// the host thread.
pub type Callback = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// The receiving half of a session's completion signal.
///
/// The driver task sends the final [`Outcome`] exactly once; the host thread
/// either polls without blocking (completion pump) or awaits with a deadline
/// (synchronous mode).
#[derive(Debug)]
pub struct PendingTransfer {
    // NB: a channel rather than the task's `JoinHandle`, so that the host
    // thread can poll without blocking.
    receiver: oneshot::Receiver<Outcome>,
}

impl PendingTransfer {
    pub fn new(receiver: oneshot::Receiver<Outcome>) -> Self {
        Self { receiver }
    }

    /// Check whether the final outcome happens to be available.
    ///
    /// This function does _not_ block, nor does it require being in an
    /// `async` context.
    pub fn poll(&mut self) -> Option<Outcome> {
        match self.receiver.try_recv() {
            // The driver task ended without sending; only an abort can cause
            // this, and an aborted session is already unregistered. Treated
            // as a cancellation for the benefit of defensive callers.
            Err(oneshot::error::TryRecvError::Closed) => Some(Outcome::Err {
                kind: ErrorKind::Cancelled,
                message: Error::Cancelled.to_string(),
            }),
            // The request is still in flight.
            Err(oneshot::error::TryRecvError::Empty) => None,
            Ok(outcome) => Some(outcome),
        }
    }

    /// Await the outcome. Used by the synchronous dispatch path, under a
    /// caller-specified deadline.
    pub async fn wait(self) -> Outcome {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::Err {
                kind: ErrorKind::Cancelled,
                message: Error::Cancelled.to_string(),
            },
        }
    }
}

/// One in-flight or completed request.
pub struct Session {
    id: SessionId,
    /// Where the state machine currently is; written by the driver task.
    state: Arc<StateCell>,
    /// The completion signal; `None` once moved out for a synchronous wait.
    pending: Option<PendingTransfer>,
    /// The script callback; taken exactly once, on delivery.
    callback: Option<Callback>,
    /// The driver task, retained so explicit cancellation can hard-abort it.
    driver: JoinHandle<()>,
    /// The recurring pump timer for asynchronous sessions.
    timer: Option<TimerId>,
    /// Set by cancellation; once set, no delivery path will run.
    cancelled: bool,
    /// Host-clock start time, for delivery latency logging.
    started: Instant,
}

impl Session {
    pub fn new(
        state: Arc<StateCell>,
        receiver: oneshot::Receiver<Outcome>,
        callback: Callback,
        driver: JoinHandle<()>,
        started: Instant,
    ) -> Self {
        Self {
            // Assigned at registration.
            id: SessionId(0),
            state,
            pending: Some(PendingTransfer::new(receiver)),
            callback: Some(callback),
            driver,
            timer: None,
            cancelled: false,
            started,
        }
    }

    pub(crate) fn assign_id(&mut self, id: SessionId) {
        self.id = id;
    }

    pub fn timer(&self) -> Option<TimerId> {
        self.timer
    }

    pub fn set_timer(&mut self, timer: TimerId) {
        self.timer = Some(timer);
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Poll the completion signal without blocking. `None` while the request
    /// is still in flight, or if the signal was moved out for a synchronous
    /// wait.
    pub fn poll(&mut self) -> Option<Outcome> {
        self.pending.as_mut()?.poll()
    }

    /// Move the completion signal out for a synchronous wait.
    pub(crate) fn take_pending(&mut self) -> Option<PendingTransfer> {
        self.pending.take()
    }

    /// Take the callback for delivery. Succeeds at most once per session.
    pub(crate) fn take_callback(&mut self) -> Option<Callback> {
        if self.cancelled {
            return None;
        }
        self.callback.take()
    }

    /// Hard-abort the driver task, dropping transport handles, and ensure the
    /// callback can never fire.
    pub(crate) fn cancel(&mut self) {
        self.cancelled = true;
        self.callback = None;
        self.driver.abort();
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state.get())
            .field("cancelled", &self.cancelled)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

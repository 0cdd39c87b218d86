//! The dispatch surface: engine construction, `request`, `request_sync`,
//! and cancellation.

use {
    crate::{
        config::EngineConfig,
        driver,
        error::{Error, ErrorKind},
        headers::apply_user_agent,
        host::HostLoop,
        pump,
        registry::Registry,
        session::{Callback, Outcome, Session, SessionId, StateCell},
        transport::{hyper::HyperTransport, Connection, RequestSpec, Transport},
    },
    std::sync::{Arc, Mutex},
    std::time::Duration,
    tokio::sync::oneshot,
    tracing::{event, Level},
};

/// The asynchronous network-request engine.
///
/// One engine owns its session registry, its transport, and a small runtime
/// whose worker threads stand in for the OS completion thread pool. All
/// state is instance-owned: dropping the engine tears everything down, and
/// tests can run engines in isolation.
///
/// Callbacks are invoked only from the thread that calls [`Engine::request`],
/// [`Engine::request_sync`], and the host loop's timer ticks; the engine
/// assumes those are all the same, single, host thread.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

pub(crate) struct EngineInner {
    config: EngineConfig,
    registry: Registry,
    transport: Arc<dyn Transport>,
    host: Arc<dyn HostLoop>,
    runtime: tokio::runtime::Runtime,
}

impl Engine {
    /// Build an engine over an explicit transport.
    pub fn new(
        config: EngineConfig,
        transport: Arc<dyn Transport>,
        host: Arc<dyn HostLoop>,
    ) -> Result<Self, Error> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_threads.max(1))
            .thread_name("hostbridge-worker")
            .enable_all()
            .build()?;

        Ok(Self {
            inner: Arc::new(EngineInner {
                config,
                registry: Registry::new(),
                transport,
                host,
                runtime,
            }),
        })
    }

    /// Build an engine over the hyper transport with default configuration.
    pub fn with_defaults(host: Arc<dyn HostLoop>) -> Result<Self, Error> {
        let transport = Arc::new(HyperTransport::new()?);
        Self::new(EngineConfig::default(), transport, host)
    }

    /// Issue a request.
    ///
    /// A negative `timeout_seconds` selects asynchronous mode: the call
    /// returns a live [`SessionHandle`] immediately and `callback` runs on a
    /// later host-loop tick. A non-negative `timeout_seconds` selects
    /// synchronous mode: the calling thread blocks on the completion signal
    /// for at most that long, `callback` is invoked inline before this
    /// returns, and no handle is returned.
    ///
    /// Failures that occur before the request is in flight (open or connect
    /// errors) are also delivered through `callback`, inline, with no handle
    /// returned; the callback is the sole result channel in both modes.
    pub fn request(
        &self,
        mut spec: RequestSpec,
        timeout_seconds: f64,
        callback: Callback,
    ) -> Option<SessionHandle> {
        apply_user_agent(spec.headers_mut(), &self.inner.config.user_agent);

        let conn = match self.inner.open_and_connect(&spec) {
            Ok(conn) => conn,
            Err(e) => {
                event!(Level::WARN, error = %e, url = %spec.url(), "connect failed");
                callback(Outcome::failure(ErrorKind::Connection, &e));
                return None;
            }
        };

        let state = StateCell::new();
        let (sender, receiver) = oneshot::channel();
        let driver = {
            let state = Arc::clone(&state);
            let spec = spec.clone();
            let chunk_size = self.inner.config.read_chunk_size;
            self.inner.runtime.spawn(async move {
                let outcome = driver::drive(conn, spec, chunk_size, state).await;
                // A failed send means the receiver is gone: the session was
                // cancelled, or timed out and detached. Discard silently.
                let _ = sender.send(outcome);
            })
        };

        let session = Session::new(state, receiver, callback, driver, self.inner.host.now());
        let id = self.inner.registry.register(session);
        event!(
            Level::INFO,
            %id,
            method = %spec.method(),
            url = %spec.url(),
            sync = timeout_seconds >= 0.0,
            "request dispatched"
        );

        if timeout_seconds < 0.0 {
            let timer = {
                let inner = Arc::clone(&self.inner);
                self.inner.host.schedule_recurring(
                    self.inner.config.pump_interval,
                    Box::new(move || pump::pump_tick(&inner.registry, &*inner.host, id)),
                )
            };
            let _ = self
                .inner
                .registry
                .with_session(id, |session| session.set_timer(timer));
            Some(SessionHandle {
                shared: Arc::new(HandleShared {
                    inner: Arc::clone(&self.inner),
                    id,
                }),
            })
        } else {
            self.inner.deliver_sync(id, timeout_seconds);
            None
        }
    }

    /// Issue a request and return the outcome directly, for call sites with
    /// no durable script state to hold a handle or a callback.
    ///
    /// Negative timeouts are clamped to zero; this surface is always
    /// synchronous.
    pub fn request_sync(&self, spec: RequestSpec, timeout_seconds: f64) -> Outcome {
        let slot = Arc::new(Mutex::new(None));
        let cb_slot = Arc::clone(&slot);
        let handle = self.request(
            spec,
            timeout_seconds.max(0.0),
            Box::new(move |outcome| {
                *cb_slot.lock().expect("outcome slot poisoned") = Some(outcome);
            }),
        );
        debug_assert!(handle.is_none());

        let outcome = slot.lock().expect("outcome slot poisoned").take();
        outcome.unwrap_or(Outcome::Err {
            kind: ErrorKind::Cancelled,
            message: Error::Cancelled.to_string(),
        })
    }

    /// Cancel a pending session. Equivalent to [`SessionHandle::cancel`].
    pub fn cancel(&self, handle: &SessionHandle) {
        handle.cancel();
    }

    /// Number of live sessions, for shutdown accounting.
    pub fn pending_sessions(&self) -> usize {
        self.inner.registry.len()
    }
}

impl EngineInner {
    fn open_and_connect(&self, spec: &RequestSpec) -> Result<Box<dyn Connection>, Error> {
        let mut conn = self.transport.open()?;
        conn.connect(spec)?;
        Ok(conn)
    }

    /// Synchronous delivery: block on the completion signal up to the
    /// deadline, then invoke the callback inline on this (host) thread.
    ///
    /// On timeout the session is detached, not aborted: it is unregistered
    /// and its callback withdrawn, but the driver task runs to natural
    /// completion, whereupon its result is discarded because the receiving
    /// half of the completion signal is gone.
    fn deliver_sync(&self, id: SessionId, timeout_seconds: f64) {
        // Scripts can supply any double here: negative and NaN clamp to an
        // immediate deadline, oversized and infinite to effectively forever.
        let deadline = Duration::try_from_secs_f64(timeout_seconds.max(0.0))
            .unwrap_or(Duration::MAX);
        let pending = self
            .registry
            .with_session(id, |session| session.take_pending())
            .flatten();

        let outcome = match pending {
            Some(pending) => self.runtime.block_on(async move {
                match tokio::time::timeout(deadline, pending.wait()).await {
                    Ok(outcome) => outcome,
                    Err(_elapsed) => Outcome::failure(ErrorKind::Timeout, &Error::Timeout),
                }
            }),
            // Unreachable in practice: nothing else can touch the session
            // between registration and this call on the host thread.
            None => Outcome::failure(ErrorKind::Cancelled, &Error::Cancelled),
        };

        let callback = self
            .registry
            .unregister(id)
            .and_then(|mut session| session.take_callback());
        if let Some(callback) = callback {
            event!(
                Level::INFO,
                %id,
                success = outcome.success(),
                "delivering sync completion"
            );
            callback(outcome);
        }
    }

    /// Hard-abort cancellation: abort the driver task (dropping transport
    /// handles), retire the pump timer, and remove the session so that no
    /// later tick or completion can see it. Idempotent.
    pub(crate) fn cancel_session(&self, id: SessionId) {
        if let Some(mut session) = self.registry.unregister(id) {
            session.cancel();
            if let Some(timer) = session.timer() {
                self.host.cancel_recurring(timer);
            }
            event!(Level::INFO, %id, "session cancelled");
        }
    }
}

struct HandleShared {
    inner: Arc<EngineInner>,
    id: SessionId,
}

impl Drop for HandleShared {
    fn drop(&mut self) {
        // Dropping the last clone of a handle withdraws the callback's
        // validity, exactly like an explicit cancel.
        self.inner.cancel_session(self.id);
    }
}

/// Caller-visible, reference-counted proxy for an asynchronous session.
///
/// The handle, not the session, is what extends the callback's validity: the
/// callback fires only while at least one clone of the handle is alive. The
/// binding layer maps host-runtime finalization onto dropping (or explicitly
/// cancelling) this handle.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<HandleShared>,
}

impl SessionHandle {
    /// The session's process-unique id.
    pub fn id(&self) -> SessionId {
        self.shared.id
    }

    /// Whether the session is still registered (neither delivered nor
    /// cancelled).
    pub fn is_pending(&self) -> bool {
        self.shared.inner.registry.contains(self.shared.id)
    }

    /// Cancel the session: no callback will fire after this returns, even if
    /// the underlying request is still in flight.
    pub fn cancel(&self) {
        self.shared.inner.cancel_session(self.shared.id);
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.shared.id)
            .field("pending", &self.is_pending())
            .finish()
    }
}

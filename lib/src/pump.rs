//! Host-thread completion pump.
//!
//! The embedding host is not thread-safe and provides no native awaiting, so
//! completions raised on runtime worker threads are bridged back by a
//! recurring tick on the host's own cooperative loop. Each tick polls the
//! session's completion signal without blocking; only when the signal is set
//! does the tick remove the session from the registry and invoke the script
//! callback, on the host thread, exactly once.

use {
    crate::{
        host::{HostLoop, Tick},
        registry::Registry,
        session::SessionId,
    },
    tracing::{event, Level},
};

/// One pump tick for `id`. Runs on the host thread.
///
/// A registry miss means the session was already delivered or cancelled; the
/// tick stands down silently and retires its timer. This is the path that
/// discards stale timer callbacks after cancellation.
pub(crate) fn pump_tick(registry: &Registry, host: &dyn HostLoop, id: SessionId) -> Tick {
    match registry.with_session(id, |session| session.poll()) {
        // Session gone: delivered or cancelled out from under the timer.
        None => {
            event!(Level::DEBUG, %id, "stale pump tick, session already gone");
            Tick::Stop
        }
        // Still in flight; let the host loop continue.
        Some(None) => Tick::Continue,
        Some(Some(outcome)) => {
            let Some(mut session) = registry.unregister(id) else {
                return Tick::Stop;
            };
            if let Some(timer) = session.timer() {
                host.cancel_recurring(timer);
            }
            let elapsed = host.now().saturating_duration_since(session.started());
            match session.take_callback() {
                Some(callback) => {
                    event!(
                        Level::INFO,
                        %id,
                        success = outcome.success(),
                        elapsed_ms = elapsed.as_millis() as u64,
                        "delivering async completion"
                    );
                    callback(outcome);
                }
                None => {
                    event!(Level::DEBUG, %id, "completion discarded, callback withdrawn");
                }
            }
            Tick::Stop
        }
    }
}

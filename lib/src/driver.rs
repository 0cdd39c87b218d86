//! The request state machine.
//!
//! [`drive`] takes one session's transport connection through the fixed
//! `Send` → `Allocate` → `ReadChunk` ⇄ `ChunkComplete` → `Terminate` →
//! `Complete` sequence. It runs inside a spawned runtime task; every `await`
//! on a transport step is a suspension point, so a step that cannot complete
//! immediately parks the task instead of blocking any thread. Any step error
//! short-circuits to `Terminate`'s error path; the engine never retries.

use {
    crate::{
        error::{Error, ErrorKind},
        session::{Outcome, SessionState, StateCell},
        transport::{Connection, RequestSpec},
    },
    bytes::BytesMut,
    std::sync::Arc,
    tracing::{event, Level},
};

/// The canonical "OK" status; anything else terminates with a diagnostic
/// message in place of the body.
pub const HTTP_STATUS_OK: u16 = 200;

/// What just happened in the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// The request was issued and the response header is available.
    Sent,
    /// The buffer was pre-sized (or the length probe came up empty).
    Allocated,
    /// A chunk read returned data.
    Data,
    /// A chunk read returned zero bytes: end of body.
    EndOfBody,
    /// The chunk was appended to the response buffer.
    Appended,
    /// Transport handles were released and the outcome recorded.
    Closed,
    /// The step failed terminally.
    Failed,
}

/// The legal transition table. `None` means the pair is illegal; the driver
/// never produces one, and [`advance`] treats it as abandoning the transfer.
pub(crate) fn successor(state: SessionState, step: Step) -> Option<SessionState> {
    use SessionState::*;
    match (state, step) {
        (Send, Step::Sent) => Some(Allocate),
        (Send, Step::Failed) => Some(Terminate),
        (Allocate, Step::Allocated) => Some(ReadChunk),
        (ReadChunk, Step::Data) => Some(ChunkComplete),
        (ReadChunk, Step::EndOfBody) => Some(Terminate),
        (ReadChunk, Step::Failed) => Some(Terminate),
        (ChunkComplete, Step::Appended) => Some(ReadChunk),
        (Terminate, Step::Closed) => Some(Complete),
        _ => None,
    }
}

fn advance(cell: &StateCell, step: Step) -> SessionState {
    // Out-of-order steps abandon the transfer rather than panicking a
    // runtime worker.
    let next = successor(cell.get(), step).unwrap_or(SessionState::Terminate);
    cell.set(next);
    next
}

/// Drive one connection to a terminal [`Outcome`].
///
/// The connection has already been opened and connected by the dispatch
/// surface; this function owns it from the send onward and releases it in
/// `Terminate` exactly once.
pub(crate) async fn drive(
    mut conn: Box<dyn Connection>,
    spec: RequestSpec,
    chunk_size: usize,
    state: Arc<StateCell>,
) -> Outcome {
    let mut buffer = BytesMut::new();
    let mut chunk = None;
    let mut outcome_slot: Option<Outcome> = None;

    loop {
        match state.get() {
            SessionState::Send => match conn.send(&spec).await {
                Ok(()) => {
                    advance(&state, Step::Sent);
                }
                Err(e) => {
                    event!(Level::DEBUG, error = %e, "send step failed");
                    outcome_slot = Some(Outcome::failure(ErrorKind::Send, &e));
                    advance(&state, Step::Failed);
                }
            },

            SessionState::Allocate => {
                // Best-effort: an unknown length only means no pre-sizing.
                if let Some(len) = conn.content_length() {
                    buffer.reserve(len as usize);
                }
                advance(&state, Step::Allocated);
            }

            SessionState::ReadChunk => match conn.read_chunk(chunk_size).await {
                Ok(bytes) if bytes.is_empty() => {
                    advance(&state, Step::EndOfBody);
                }
                Ok(bytes) => {
                    chunk = Some(bytes);
                    advance(&state, Step::Data);
                }
                Err(e) => {
                    event!(Level::DEBUG, error = %e, "read step failed");
                    outcome_slot = Some(Outcome::failure(ErrorKind::Read, &e));
                    advance(&state, Step::Failed);
                }
            },

            SessionState::ChunkComplete => {
                if let Some(bytes) = chunk.take() {
                    buffer.extend_from_slice(&bytes);
                }
                advance(&state, Step::Appended);
            }

            SessionState::Terminate => {
                let outcome = match outcome_slot.take() {
                    Some(outcome) => outcome,
                    None => match conn.status_code() {
                        Ok(HTTP_STATUS_OK) => Outcome::Ok(buffer.split().freeze()),
                        // A completed response with a non-success status
                        // always yields the diagnostic line, never a raw
                        // truncated body.
                        Ok(code) => Outcome::failure(ErrorKind::Status, &Error::Status(code)),
                        Err(e) => Outcome::failure(ErrorKind::Read, &e),
                    },
                };
                conn.close();
                advance(&state, Step::Closed);
                outcome_slot = Some(outcome);
            }

            SessionState::Complete => {
                return outcome_slot.take().unwrap_or_else(|| Outcome::Err {
                    kind: ErrorKind::Cancelled,
                    message: Error::Cancelled.to_string(),
                });
            }
        }
    }
}

//! hostbridge: an asynchronous HTTP request engine for single-threaded,
//! non-reentrant embedding script hosts.
//!
//! The embedding host owns script execution on one cooperative thread and
//! offers no preemption and no native awaiting; the platform networking
//! stack completes work on arbitrary worker threads. This crate bridges the
//! two: requests are driven by a state machine on a small runtime, and
//! completions are handed back to the host thread either by blocking with a
//! deadline (synchronous mode) or via a recurring tick on the host's own
//! loop (asynchronous mode). Script-level callbacks only ever run on the
//! host thread, and fire at most once per session.

// When building the project in release mode:
//   (1): Promote warnings into errors.
//   (2): Deny broken documentation links.
//   (3): Deny invalid codeblock attributes in documentation.
#![cfg_attr(not(debug_assertions), deny(warnings))]
#![cfg_attr(not(debug_assertions), deny(clippy::all))]
#![cfg_attr(not(debug_assertions), deny(rustdoc::broken_intra_doc_links))]
#![cfg_attr(not(debug_assertions), deny(rustdoc::invalid_codeblock_attributes))]

pub mod config;
pub mod error;
pub mod host;
pub mod session;
pub mod transport;

mod driver;
mod engine;
mod headers;
mod pump;
mod registry;

pub use {
    config::EngineConfig,
    engine::{Engine, SessionHandle},
    error::{Error, ErrorKind},
    host::{HostLoop, Tick, TickFn, TimerId},
    registry::Registry,
    session::{Callback, Outcome, SessionId, SessionState},
    transport::{hyper::HyperTransport, Connection, RequestSpec, Transport},
};

//! Error types.

use std::io;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The request URL did not contain a host component, so there is nothing
    /// to connect to.
    #[error("Request URL has no host: {0}")]
    MissingHost(String),

    /// The binding surface only admits `get` and `post`.
    #[error("Unsupported request method: {0}")]
    UnsupportedMethod(String),

    /// Could not load the platform trust roots needed for an `https` URL.
    #[error("Could not load native certificates: {0}")]
    BadCerts(io::Error),

    /// The URL host was not usable as a TLS server name.
    #[error("Invalid server name for TLS: {0}")]
    InvalidServerName(String),

    /// A transport step was invoked before the step that produces its input,
    /// e.g. a chunk read before the request was sent.
    #[error("Transport response is not ready")]
    ResponseNotReady,

    /// The synchronous deadline elapsed while the request was still in
    /// flight.
    #[error("Request timed out.")]
    Timeout,

    /// The caller cancelled the session before it completed.
    #[error("Request was cancelled.")]
    Cancelled,

    /// The response completed but carried a non-success status.
    #[error("Request returned status {0}.")]
    Status(u16),

    #[error(transparent)]
    HyperError(#[from] hyper::Error),

    #[error(transparent)]
    HttpError(#[from] http::Error),

    #[error(transparent)]
    InvalidUri(#[from] http::uri::InvalidUri),

    #[error(transparent)]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    #[error(transparent)]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error(transparent)]
    IoError(#[from] io::Error),

    /// An escape hatch for third-party [`Transport`][transport]
    /// implementations with error types of their own.
    ///
    /// [transport]: crate::transport::Transport
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// The callback-facing classification for this error, when the error
    /// itself determines it.
    ///
    /// Step-dependent errors (a hyper failure during a send vs. during a
    /// chunk read) are classified by the state machine, which knows which
    /// step produced them; those return `None` here.
    pub fn intrinsic_kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Timeout => Some(ErrorKind::Timeout),
            Error::Cancelled => Some(ErrorKind::Cancelled),
            Error::Status(_) => Some(ErrorKind::Status),
            Error::MissingHost(_)
            | Error::UnsupportedMethod(_)
            | Error::InvalidUri(_)
            | Error::InvalidHeaderName(_)
            | Error::InvalidHeaderValue(_) => Some(ErrorKind::Argument),
            Error::BadCerts(_) | Error::InvalidServerName(_) => Some(ErrorKind::Connection),
            Error::HyperError(e) if e.is_connect() => Some(ErrorKind::Connection),
            _ => None,
        }
    }
}

/// Classification of a terminal request failure, delivered alongside the
/// diagnostic message in a failed [`Outcome`][outcome].
///
/// [outcome]: crate::session::Outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Opening or connecting the transport failed.
    Connection,
    /// Dispatching the request failed.
    Send,
    /// Reading a chunk of the response body failed.
    Read,
    /// The synchronous deadline elapsed with the request still outstanding.
    Timeout,
    /// The caller cancelled the session.
    Cancelled,
    /// The response carried a non-success HTTP status.
    Status,
    /// The request itself was malformed before any transport work began.
    Argument,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Connection => "connection error",
            ErrorKind::Send => "send error",
            ErrorKind::Read => "read error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Status => "status error",
            ErrorKind::Argument => "invalid argument",
        };
        f.write_str(name)
    }
}

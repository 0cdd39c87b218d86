//! The abstract transport that the request state machine drives.
//!
//! Each method on [`Connection`] corresponds to one step of the state
//! machine. Steps that map to genuinely asynchronous platform operations are
//! `async`; an await that does not resolve immediately is the engine's
//! "operation pending" suspension point. The production implementation lives
//! in [`hyper`][hyper-transport]; tests substitute scripted connections.
//!
//! [hyper-transport]: crate::transport::hyper::HyperTransport

pub mod hyper;

use {
    crate::error::Error,
    ::hyper::{HeaderMap, Method, Uri},
    async_trait::async_trait,
    bytes::Bytes,
    http::header::{HeaderName, HeaderValue},
};

/// A validated description of one outgoing request.
///
/// Construction validates the method and URL eagerly, so every spec the
/// engine accepts names a reachable-looking target. Headers preserve the
/// caller's insertion order.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    method: Method,
    url: Uri,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl RequestSpec {
    /// Build a spec from the binding surface's method and URL strings.
    ///
    /// Only `get` and `post` are admitted (case-insensitively), matching the
    /// script-facing API.
    pub fn new(method: &str, url: &str) -> Result<Self, Error> {
        let method = if method.eq_ignore_ascii_case("get") {
            Method::GET
        } else if method.eq_ignore_ascii_case("post") {
            Method::POST
        } else {
            return Err(Error::UnsupportedMethod(method.to_owned()));
        };

        let url: Uri = url.parse()?;
        if url.host().is_none() {
            return Err(Error::MissingHost(url.to_string()));
        }

        Ok(Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        })
    }

    /// Append one header, preserving insertion order relative to other names.
    pub fn header(mut self, name: &str, value: &str) -> Result<Self, Error> {
        let name = HeaderName::try_from(name)?;
        let value = HeaderValue::try_from(value)?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Attach a request body. The engine keeps an owned copy alive until the
    /// send completes.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.body = if body.is_empty() { None } else { Some(body) };
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &Uri {
        &self.url
    }

    /// The URL's host component. Guaranteed present by construction.
    pub fn host(&self) -> &str {
        self.url.host().unwrap_or_default()
    }

    pub fn is_https(&self) -> bool {
        self.url.scheme_str() == Some("https")
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// Platform networking facility; one implementation per platform stack.
///
/// `open` is the analog of acquiring the platform's root networking handle.
/// It is synchronous and cheap; everything that can block lives on the
/// [`Connection`] it returns.
pub trait Transport: Send + Sync + 'static {
    fn open(&self) -> Result<Box<dyn Connection>, Error>;
}

/// One request's worth of transport state.
///
/// The state machine calls these methods in a fixed order: `connect`, `send`,
/// `content_length`, then `read_chunk` until it returns an empty buffer,
/// then `status_code` and `close`. Implementations may return
/// [`Error::ResponseNotReady`] if a step is invoked out of order.
#[async_trait]
pub trait Connection: Send + 'static {
    /// Record and validate the request target.
    fn connect(&mut self, spec: &RequestSpec) -> Result<(), Error>;

    /// Issue the request, including any body. Resolves once the response
    /// header is available.
    async fn send(&mut self, spec: &RequestSpec) -> Result<(), Error>;

    /// Best-effort content length of the response body. `None` is not an
    /// error; it only means the buffer cannot be pre-sized.
    fn content_length(&self) -> Option<u64>;

    /// Read up to `max` bytes of response body. An empty buffer signals the
    /// end of the body.
    async fn read_chunk(&mut self, max: usize) -> Result<Bytes, Error>;

    /// The final HTTP status code.
    fn status_code(&self) -> Result<u16, Error>;

    /// Release transport handles. Idempotent; also implied by drop.
    fn close(&mut self);
}

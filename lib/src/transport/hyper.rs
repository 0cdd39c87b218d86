//! Production transport built on hyper, with scheme-driven TLS.

use {
    super::{Connection, RequestSpec, Transport},
    crate::{error::Error, headers::filter_outgoing_headers},
    ::hyper::{
        client::{Client, HttpConnector},
        header::HeaderValue,
        Body, Request, StatusCode, Uri,
    },
    async_trait::async_trait,
    bytes::Bytes,
    futures::Future,
    http_body::Body as HttpBody,
    rustls::{ClientConfig, RootCertStore, ServerName},
    std::{
        io,
        pin::Pin,
        sync::Arc,
        task::{self, Context, Poll},
    },
    tokio::{
        io::{AsyncRead, AsyncWrite, ReadBuf},
        net::TcpStream,
    },
    tokio_rustls::{client::TlsStream, TlsConnector},
};

/// A custom hyper connector. Hyper's default connector would dial the host in
/// the request URI over plain TCP; we instead dial the target recorded at
/// `connect` time, wrapping the stream in TLS when the target's scheme calls
/// for it.
#[derive(Clone)]
pub struct UrlConnector {
    target_uri: Uri,
    http: HttpConnector,
    tls_config: Arc<ClientConfig>,
}

impl UrlConnector {
    pub fn new(target_uri: Uri, tls_config: Arc<ClientConfig>) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);

        Self {
            target_uri,
            http,
            tls_config,
        }
    }
}

type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub enum TransportStream {
    Http(TcpStream),
    Https(Box<TlsStream<TcpStream>>),
}

impl ::hyper::service::Service<Uri> for UrlConnector {
    type Response = TransportStream;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, BoxError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut task::Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.http.poll_ready(cx).map_err(Into::into)
    }

    // We ignore the URI argument and instead dial the target recorded at
    // `connect` time. NB this does _not_ affect the URI in the request itself.
    fn call(&mut self, _: Uri) -> Self::Future {
        let uri = self.target_uri.clone();
        let config = self.tls_config.clone();
        let hostname = uri.host().unwrap_or_default().to_string();
        let is_https = uri.scheme_str() == Some("https");

        let connect_fut = self.http.call(uri);
        Box::pin(async move {
            let tcp = connect_fut.await.map_err(Box::new)?;

            if is_https {
                let connector = TlsConnector::from(config);
                let dnsname = ServerName::try_from(hostname.as_str())
                    .map_err(|_| Box::new(Error::InvalidServerName(hostname.clone())))?;
                let tls = connector.connect(dnsname, tcp).await.map_err(Box::new)?;
                Ok(TransportStream::Https(Box::new(tls)))
            } else {
                Ok(TransportStream::Http(tcp))
            }
        })
    }
}

/// Load the platform trust roots once, at transport construction.
fn native_tls_config() -> Result<Arc<ClientConfig>, Error> {
    let mut roots = RootCertStore::empty();
    for cert in rustls_native_certs::load_native_certs().map_err(Error::BadCerts)? {
        roots
            .add(&rustls::Certificate(cert.0))
            .map_err(|e| Error::BadCerts(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    }

    let config = ClientConfig::builder()
        .with_safe_defaults()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Arc::new(config))
}

/// The hyper-backed [`Transport`].
pub struct HyperTransport {
    tls_config: Arc<ClientConfig>,
}

impl HyperTransport {
    /// Build the transport, loading native trust roots for `https` targets.
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            tls_config: native_tls_config()?,
        })
    }

    /// Build the transport over an explicit TLS configuration, e.g. for
    /// pinned roots or environments without a native certificate store.
    pub fn with_tls_config(tls_config: Arc<ClientConfig>) -> Self {
        Self { tls_config }
    }
}

impl Transport for HyperTransport {
    fn open(&self) -> Result<Box<dyn Connection>, Error> {
        Ok(Box::new(HyperConnection {
            tls_config: self.tls_config.clone(),
            target: None,
            response: None,
            leftover: Bytes::new(),
        }))
    }
}

struct ResponseState {
    status: StatusCode,
    content_length: Option<u64>,
    body: Body,
}

/// One request's transport handles: the canonical target, and once `send`
/// resolves, the response header and body stream.
struct HyperConnection {
    tls_config: Arc<ClientConfig>,
    target: Option<Uri>,
    response: Option<ResponseState>,
    /// Bytes received from hyper beyond what the last `read_chunk` asked for.
    leftover: Bytes,
}

impl HyperConnection {
    fn canonical_host(spec: &RequestSpec) -> HeaderValue {
        spec.headers()
            .get(::hyper::header::HOST)
            .cloned()
            .or_else(|| {
                spec.url()
                    .authority()
                    .and_then(|auth| HeaderValue::from_str(auth.as_str()).ok())
            })
            .unwrap_or_else(|| HeaderValue::from_static(""))
    }
}

#[async_trait]
impl Connection for HyperConnection {
    fn connect(&mut self, spec: &RequestSpec) -> Result<(), Error> {
        // `RequestSpec` construction guarantees a host is present; all that is
        // left is recording the canonical target for the dialer.
        self.target = Some(spec.url().clone());
        Ok(())
    }

    async fn send(&mut self, spec: &RequestSpec) -> Result<(), Error> {
        let target = self.target.clone().ok_or(Error::ResponseNotReady)?;
        let connector = UrlConnector::new(target, self.tls_config.clone());

        let host = Self::canonical_host(spec);
        let body = match spec.body_bytes() {
            Some(bytes) => Body::from(bytes.clone()),
            None => Body::empty(),
        };

        let mut req = Request::builder()
            .method(spec.method().clone())
            .uri(spec.url().clone())
            .body(body)?;
        *req.headers_mut() = spec.headers().clone();
        filter_outgoing_headers(req.headers_mut());
        req.headers_mut().insert(::hyper::header::HOST, host);

        let resp = Client::builder()
            .set_host(false)
            .build(connector)
            .request(req)
            .await?;

        let content_length = resp
            .headers()
            .get(::hyper::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .or_else(|| resp.body().size_hint().exact());

        self.response = Some(ResponseState {
            status: resp.status(),
            content_length,
            body: resp.into_body(),
        });
        Ok(())
    }

    fn content_length(&self) -> Option<u64> {
        self.response.as_ref().and_then(|r| r.content_length)
    }

    async fn read_chunk(&mut self, max: usize) -> Result<Bytes, Error> {
        if !self.leftover.is_empty() {
            let take = self.leftover.len().min(max);
            return Ok(self.leftover.split_to(take));
        }

        let response = self.response.as_mut().ok_or(Error::ResponseNotReady)?;
        loop {
            match response.body.data().await {
                None => return Ok(Bytes::new()),
                // hyper may yield empty frames; an empty buffer is reserved
                // for end-of-body, so skip them.
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(mut chunk)) => {
                    if chunk.len() > max {
                        self.leftover = chunk.split_off(max);
                    }
                    return Ok(chunk);
                }
                Some(Err(e)) => return Err(e.into()),
            }
        }
    }

    fn status_code(&self) -> Result<u16, Error> {
        self.response
            .as_ref()
            .map(|r| r.status.as_u16())
            .ok_or(Error::ResponseNotReady)
    }

    fn close(&mut self) {
        self.response = None;
        self.target = None;
        self.leftover = Bytes::new();
    }
}

// Boilerplate forwarding implementations for `TransportStream`:

impl ::hyper::client::connect::Connection for TransportStream {
    fn connected(&self) -> ::hyper::client::connect::Connected {
        ::hyper::client::connect::Connected::new()
    }
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<Result<(), io::Error>> {
        match Pin::get_mut(self) {
            TransportStream::Http(s) => Pin::new(s).poll_read(cx, buf),
            TransportStream::Https(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        match Pin::get_mut(self) {
            TransportStream::Http(s) => Pin::new(s).poll_write(cx, buf),
            TransportStream::Https(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match Pin::get_mut(self) {
            TransportStream::Http(s) => Pin::new(s).poll_flush(cx),
            TransportStream::Https(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        match Pin::get_mut(self) {
            TransportStream::Http(s) => Pin::new(s).poll_shutdown(cx),
            TransportStream::Https(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

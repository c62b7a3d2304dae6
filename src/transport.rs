//! HTTP transport abstraction and the default reqwest implementation.

use crate::error::TransportError;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use http::HeaderMap;
use reqwest::Url;
use std::time::Duration;

/// A request to open one event stream.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub url: Url,
    pub headers: HeaderMap,
}

/// What a transport reports about an open request, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Response headers arrived.
    Headers { status: u16 },
    /// A chunk of the response body.
    Data(Bytes),
    /// The request finished. `None` means the body ended normally.
    Complete(Option<TransportError>),
}

/// Event sequence for one request. Dropping it cancels the request.
pub type TransportStream = BoxStream<'static, TransportEvent>;

/// Issues streaming HTTP requests on behalf of an [`EventSource`](crate::EventSource).
///
/// The returned stream must yield `Headers` before any `Data`, and should end
/// with `Complete`. A stream that simply ends is treated as `Complete(None)`.
pub trait Transport: Send + Sync + 'static {
    fn open(&self, request: StreamRequest) -> TransportStream;
}

/// [`Transport`] backed by a pooled `reqwest::Client`.
///
/// No total request timeout is set, since event streams stay open indefinitely.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    inner: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport builder for customization.
    pub fn builder() -> HttpTransportBuilder {
        HttpTransportBuilder::new()
    }

    /// Wrap an existing client. Its timeout settings apply to every stream.
    pub fn from_client(client: reqwest::Client) -> Self {
        Self { inner: client }
    }
}

enum Phase {
    Start(reqwest::RequestBuilder),
    Body(reqwest::Response),
    Done,
}

impl Transport for HttpTransport {
    fn open(&self, request: StreamRequest) -> TransportStream {
        let req = self.inner.get(request.url).headers(request.headers);

        stream::unfold(Phase::Start(req), |phase| async move {
            match phase {
                Phase::Start(req) => match req.send().await {
                    Ok(resp) => {
                        let status = resp.status().as_u16();
                        Some((TransportEvent::Headers { status }, Phase::Body(resp)))
                    }
                    Err(e) => Some((TransportEvent::Complete(Some(e.into())), Phase::Done)),
                },
                Phase::Body(mut resp) => match resp.chunk().await {
                    Ok(Some(chunk)) => Some((TransportEvent::Data(chunk), Phase::Body(resp))),
                    Ok(None) => Some((TransportEvent::Complete(None), Phase::Done)),
                    Err(e) => Some((TransportEvent::Complete(Some(e.into())), Phase::Done)),
                },
                Phase::Done => None,
            }
        })
        .boxed()
    }
}

/// Builder for configuring an [`HttpTransport`].
#[must_use = "builders do nothing unless you call .build()"]
pub struct HttpTransportBuilder {
    connect_timeout: Option<Duration>,
    pool_idle_timeout: Duration,
    tcp_keepalive: Option<Duration>,
}

impl HttpTransportBuilder {
    pub fn new() -> Self {
        Self {
            connect_timeout: None,
            pool_idle_timeout: Duration::from_secs(90),
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }

    /// Set the TCP connect timeout. The stream itself never times out.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Set how long idle pooled connections are kept.
    pub fn pool_idle_timeout(mut self, timeout: Duration) -> Self {
        self.pool_idle_timeout = timeout;
        self
    }

    /// Set the TCP keepalive interval, or `None` to disable it.
    pub fn tcp_keepalive(mut self, interval: Option<Duration>) -> Self {
        self.tcp_keepalive = interval;
        self
    }

    /// Build the transport.
    ///
    /// Returns an error if the underlying HTTP client fails to build
    /// (e.g., due to TLS configuration issues).
    pub fn build(self) -> Result<HttpTransport, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(self.pool_idle_timeout)
            .tcp_keepalive(self.tcp_keepalive);

        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }

        Ok(HttpTransport {
            inner: builder.build()?,
        })
    }
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

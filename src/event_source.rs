//! Event source handle and connection lifecycle.

use crate::dispatch::{Dispatcher, EventHandler};
use crate::error::{EventSourceError, InvalidHeaderError, TransportError};
use crate::executor::{CallbackExecutor, Job, SerialExecutor};
use crate::framer::ByteFramer;
use crate::storage::{persistence_key, LastEventIdStore, MemoryStore, DEFAULT_KEY_NAMESPACE};
use crate::transport::{HttpTransport, StreamRequest, Transport, TransportEvent};
use crate::types::{MessageEvent, ReadyState};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::StreamExt;
use http::header::{HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL};
use http::HeaderMap;
use parking_lot::Mutex;
use reqwest::Url;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Retry interval used until the server sends a `retry` field.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(3000);

const HEADER_LAST_EVENT_ID: &str = "last-event-id";

/// Type alias for the open callback.
pub type OpenHandler = Arc<dyn Fn() + Send + Sync>;
/// Type alias for the error callback.
pub type ErrorHandler = Arc<dyn Fn(EventSourceError) + Send + Sync>;
/// Type alias for a dynamic header provider.
pub type HeaderProvider = Arc<dyn Fn() -> HeaderMap + Send + Sync>;

/// A Server-Sent Events subscription.
///
/// The handle is cloneable; clones control the same subscription. Nothing is
/// sent until [`connect`](Self::connect). Once connected, the subscription
/// keeps running (and reconnecting) until [`close`](Self::close) is called,
/// even if every handle is dropped.
///
/// All callbacks run on the configured [`CallbackExecutor`], in the order the
/// events arrived.
#[derive(Clone)]
pub struct EventSource {
    inner: Arc<Inner>,
}

struct Inner {
    url: Url,
    headers: HeaderMap,
    header_provider: Option<HeaderProvider>,
    reconnect_on_server_error: bool,
    transport: Arc<dyn Transport>,
    executor: Arc<dyn CallbackExecutor>,
    runtime: Handle,
    dispatcher: Dispatcher,
    session: Mutex<Session>,
    callbacks: Mutex<Callbacks>,
}

#[derive(Default)]
struct Session {
    ready_state: ReadyState,
    // Bumped by connect() and close(); a driver acts only while its
    // generation is current.
    generation: u64,
    driver: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Callbacks {
    on_open: Option<OpenHandler>,
    on_error: Option<ErrorHandler>,
    // First error raised while no error handler was registered.
    pending_error: Option<EventSourceError>,
}

impl std::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSource")
            .field("url", &self.inner.url.as_str())
            .field("ready_state", &self.ready_state())
            .field("dispatcher", &self.inner.dispatcher)
            .finish()
    }
}

impl EventSource {
    /// Create an event source with default settings.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(url: impl Into<String>) -> Result<Self, EventSourceError> {
        EventSourceBuilder::new(url).build()
    }

    /// Create a builder for customization.
    pub fn builder(url: impl Into<String>) -> EventSourceBuilder {
        EventSourceBuilder::new(url)
    }

    /// Build a basic-auth `Authorization` header value.
    ///
    /// # Example
    /// ```
    /// use resumable_sse::EventSource;
    /// assert_eq!(
    ///     EventSource::basic_auth_header("user", "password"),
    ///     "Basic dXNlcjpwYXNzd29yZA=="
    /// );
    /// ```
    pub fn basic_auth_header(username: &str, password: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
    }

    /// Get the subscription URL.
    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn ready_state(&self) -> ReadyState {
        self.inner.session.lock().ready_state
    }

    /// Delay before the next reconnection attempt.
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_millis())
    }

    pub fn retry_interval_millis(&self) -> u64 {
        self.inner.dispatcher.retry_interval_millis()
    }

    /// The last event id on record for this URL.
    ///
    /// An empty id is kept on record but not sent as `Last-Event-Id`.
    pub fn last_event_id(&self) -> Option<String> {
        self.inner.dispatcher.last_event_id()
    }

    /// Start the subscription.
    ///
    /// Does nothing while already connecting or open. From `Closed` this always
    /// starts a fresh session, including after a fatal error, a 204 response,
    /// or [`close`](Self::close).
    pub fn connect(&self) {
        let mut session = self.inner.session.lock();
        if !session.ready_state.is_closed() {
            debug!(url = %self.inner.url, state = %session.ready_state, "Already connected");
            return;
        }

        // A closed session may still own a driver waiting to reconnect.
        if let Some(driver) = session.driver.take() {
            driver.abort();
        }

        session.generation += 1;
        session.ready_state = ReadyState::Connecting;
        let generation = session.generation;
        let inner = Arc::clone(&self.inner);
        session.driver = Some(self.inner.runtime.spawn(drive(inner, generation)));
    }

    /// Close the subscription.
    ///
    /// The state is `Closed` when this returns. The transport is cancelled and
    /// no further callbacks from it are delivered.
    pub fn close(&self) {
        let mut session = self.inner.session.lock();
        session.generation += 1;
        session.ready_state = ReadyState::Closed;
        if let Some(driver) = session.driver.take() {
            driver.abort();
            info!(url = %self.inner.url, "Event source closed");
        }
    }

    /// Set the handler fired when response headers arrive.
    pub fn on_open<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.callbacks.lock().on_open = Some(Arc::new(handler));
    }

    /// Set the error handler.
    ///
    /// If an error occurred before any error handler was set, the first such
    /// error is delivered to `handler` right away.
    pub fn on_error<F>(&self, handler: F)
    where
        F: Fn(EventSourceError) + Send + Sync + 'static,
    {
        let handler: ErrorHandler = Arc::new(handler);
        let pending = {
            let mut callbacks = self.inner.callbacks.lock();
            callbacks.on_error = Some(Arc::clone(&handler));
            callbacks.pending_error.take()
        };

        if let Some(err) = pending {
            self.inner.executor.execute(Box::new(move || handler(err)));
        }
    }

    /// Set the handler for events without an `event` field.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(MessageEvent) + Send + Sync + 'static,
    {
        self.inner.dispatcher.set_on_message(Arc::new(handler));
    }

    /// Set the handler for events named `name`, replacing any previous one.
    pub fn add_event_listener<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(MessageEvent) + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(handler);
        self.inner.dispatcher.add_event_listener(name, handler);
    }

    /// Remove the handler for `name`. Unknown names are ignored.
    pub fn remove_event_listener(&self, name: &str) {
        self.inner.dispatcher.remove_event_listener(name);
    }

    /// Names with a registered listener.
    pub fn event_names(&self) -> Vec<String> {
        self.inner.dispatcher.event_names()
    }
}

impl Inner {
    fn is_current(&self, generation: u64) -> bool {
        self.session.lock().generation == generation
    }

    /// Set the ready state if `generation` is still current.
    fn transition(&self, generation: u64, state: ReadyState) -> bool {
        let mut session = self.session.lock();
        if session.generation != generation {
            return false;
        }
        session.ready_state = state;
        true
    }

    fn build_request(&self) -> StreamRequest {
        let mut headers = self.headers.clone();
        if let Some(provider) = &self.header_provider {
            for (key, value) in provider().iter() {
                headers.insert(key.clone(), value.clone());
            }
        }
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        if let Some(id) = self.dispatcher.last_event_id().filter(|id| !id.is_empty()) {
            match HeaderValue::from_str(&id) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static(HEADER_LAST_EVENT_ID), value);
                }
                Err(_) => warn!(last_event_id = %id, "Last event id is not a valid header value"),
            }
        }

        StreamRequest {
            url: self.url.clone(),
            headers,
        }
    }

    fn notify_open(self: &Arc<Self>, generation: u64) {
        let handler = self.callbacks.lock().on_open.clone();
        if let Some(handler) = handler {
            self.session_executor(generation).execute(Box::new(move || handler()));
        }
    }

    fn report_error(self: &Arc<Self>, generation: u64, err: EventSourceError) {
        let handler = {
            let mut callbacks = self.callbacks.lock();
            match callbacks.on_error.clone() {
                Some(handler) => handler,
                None => {
                    if callbacks.pending_error.is_none() {
                        callbacks.pending_error = Some(err);
                    }
                    return;
                }
            }
        };
        self.session_executor(generation).execute(Box::new(move || handler(err)));
    }

    fn session_executor(self: &Arc<Self>, generation: u64) -> SessionExecutor {
        SessionExecutor {
            inner: Arc::clone(self),
            generation,
        }
    }
}

/// Forwards jobs to the application executor, dropping them if the session
/// was closed or replaced before they run.
struct SessionExecutor {
    inner: Arc<Inner>,
    generation: u64,
}

impl CallbackExecutor for SessionExecutor {
    fn execute(&self, job: Job) {
        let inner = Arc::clone(&self.inner);
        let generation = self.generation;
        self.inner.executor.execute(Box::new(move || {
            if inner.is_current(generation) {
                job();
            }
        }));
    }
}

/// How a finished connection is handled.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    /// Stay closed without telling anyone.
    Silent,
    /// Report and stay closed.
    Fatal(EventSourceError),
    /// Report and reconnect after the retry interval.
    Retry(EventSourceError),
}

fn classify(
    status: Option<u16>,
    error: Option<TransportError>,
    reconnect_on_server_error: bool,
) -> Outcome {
    match (status, error) {
        (Some(204), _) => Outcome::Silent,
        (Some(status), _) if status >= 400 => {
            let err = EventSourceError::from_status(status);
            if reconnect_on_server_error && err.is_retryable() {
                Outcome::Retry(err)
            } else {
                Outcome::Fatal(err)
            }
        }
        (_, Some(TransportError::Cancelled)) => Outcome::Silent,
        (_, Some(err)) => Outcome::Retry(err.into()),
        (_, None) => Outcome::Retry(EventSourceError::StreamEnded),
    }
}

/// Connection task for one session: connect, pump events, reconnect.
async fn drive(inner: Arc<Inner>, generation: u64) {
    let mut framer = ByteFramer::new();

    loop {
        if !inner.transition(generation, ReadyState::Connecting) {
            return;
        }
        framer.reset();
        let request = inner.build_request();
        info!(
            url = %inner.url,
            last_event_id = ?request.headers.get(HEADER_LAST_EVENT_ID),
            "Event source connecting"
        );

        let mut events = inner.transport.open(request);
        let mut status = None;
        let error = loop {
            let Some(event) = events.next().await else {
                break None;
            };
            if !inner.is_current(generation) {
                return;
            }

            match event {
                TransportEvent::Headers { status: code } => {
                    status = Some(code);
                    if code == 204 {
                        info!(url = %inner.url, "Server answered 204, closing for good");
                        inner.transition(generation, ReadyState::Closed);
                        return;
                    }
                    inner.transition(generation, ReadyState::Open);
                    debug!(url = %inner.url, status = code, "Event source open");
                    inner.notify_open(generation);
                }
                TransportEvent::Data(chunk) => {
                    if inner.session.lock().ready_state != ReadyState::Open {
                        debug!(len = chunk.len(), "Ignoring data received before open");
                        continue;
                    }
                    let blocks = framer.feed(&chunk);
                    if !blocks.is_empty() {
                        let emit = inner.session_executor(generation);
                        inner.dispatcher.process_blocks(blocks, &emit);
                    }
                }
                TransportEvent::Complete(error) => break error,
            }
        };
        drop(events);

        if !inner.transition(generation, ReadyState::Closed) {
            return;
        }

        match classify(status, error, inner.reconnect_on_server_error) {
            Outcome::Silent => {
                debug!(url = %inner.url, "Event source cancelled");
                return;
            }
            Outcome::Fatal(err) => {
                warn!(url = %inner.url, error = %err, "Event source failed, not reconnecting");
                inner.report_error(generation, err);
                return;
            }
            Outcome::Retry(err) => {
                let delay = Duration::from_millis(inner.dispatcher.retry_interval_millis());
                warn!(
                    url = %inner.url,
                    error = %err,
                    retry_ms = delay.as_millis() as u64,
                    "Event source disconnected, reconnecting after retry interval"
                );
                inner.report_error(generation, err);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Builder for configuring an [`EventSource`].
#[must_use = "builders do nothing unless you call .build()"]
pub struct EventSourceBuilder {
    url: String,
    headers: HeaderMap,
    header_provider: Option<HeaderProvider>,
    retry_interval: Duration,
    store: Option<Arc<dyn LastEventIdStore>>,
    key_namespace: String,
    executor: Option<Arc<dyn CallbackExecutor>>,
    transport: Option<Arc<dyn Transport>>,
    reconnect_on_server_error: bool,
}

impl EventSourceBuilder {
    /// Create a new builder for `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HeaderMap::new(),
            header_provider: None,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            store: None,
            key_namespace: DEFAULT_KEY_NAMESPACE.to_string(),
            executor: None,
            transport: None,
            reconnect_on_server_error: true,
        }
    }

    /// Add a header sent with every connection attempt.
    ///
    /// Invalid header names or values are silently ignored. Use
    /// [`try_header`](Self::try_header) if you need error handling.
    pub fn header(mut self, key: &str, value: &str) -> Self {
        if let (Ok(name), Ok(val)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(name, val);
        }
        self
    }

    /// Add a header, returning an error if the name or value is invalid.
    pub fn try_header(mut self, key: &str, value: &str) -> Result<Self, EventSourceError> {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|_| InvalidHeaderError::InvalidName(key.to_string()))?;
        let val = HeaderValue::from_str(value)
            .map_err(|_| InvalidHeaderError::InvalidValue(value.to_string()))?;
        self.headers.insert(name, val);
        Ok(self)
    }

    /// Set all static headers.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set a dynamic header provider (called on every connection attempt).
    pub fn header_provider<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> HeaderMap + Send + Sync + 'static,
    {
        self.header_provider = Some(Arc::new(provider));
        self
    }

    /// Set the initial retry interval. The server may override it.
    pub fn retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    /// Set the store used to persist the last event id.
    pub fn store(mut self, store: Arc<dyn LastEventIdStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the namespace prefix of the store key.
    pub fn key_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.key_namespace = namespace.into();
        self
    }

    /// Set the executor that runs application callbacks.
    pub fn executor(mut self, executor: Arc<dyn CallbackExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Set the transport used to open streams.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Whether 5xx responses are retried (default) or treated as fatal.
    pub fn reconnect_on_server_error(mut self, enabled: bool) -> Self {
        self.reconnect_on_server_error = enabled;
        self
    }

    /// Build the event source.
    ///
    /// Fails if the URL is not an absolute http(s) URL, or when called outside
    /// a tokio runtime.
    pub fn build(self) -> Result<EventSource, EventSourceError> {
        let url = Url::parse(&self.url)
            .map_err(|e| EventSourceError::InvalidUrl(format!("{}: {e}", self.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(EventSourceError::InvalidUrl(format!(
                "{}: unsupported scheme",
                self.url
            )));
        }

        let runtime = Handle::try_current().map_err(|_| EventSourceError::NoRuntime)?;

        let executor = match self.executor {
            Some(executor) => executor,
            None => Arc::new(SerialExecutor::spawn_on(&runtime)),
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::builder().build().map_err(|e| {
                EventSourceError::Network {
                    message: format!("failed to build HTTP client: {e}"),
                }
            })?),
        };
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let store_key = persistence_key(&self.key_namespace, &url);
        let retry_ms = u64::try_from(self.retry_interval.as_millis()).unwrap_or(u64::MAX);

        Ok(EventSource {
            inner: Arc::new(Inner {
                url,
                headers: self.headers,
                header_provider: self.header_provider,
                reconnect_on_server_error: self.reconnect_on_server_error,
                transport,
                executor,
                runtime,
                dispatcher: Dispatcher::new(store, store_key, retry_ms),
                session: Mutex::new(Session::default()),
                callbacks: Mutex::new(Callbacks::default()),
            }),
        })
    }
}

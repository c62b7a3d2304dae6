//! Resumable Server-Sent Events client
//!
//! A client engine for the Server-Sent Events protocol: it frames a long-lived
//! HTTP response body into event blocks, parses the SSE field grammar, routes
//! events to application callbacks, and reconnects with `Last-Event-ID` so a
//! dropped connection resumes where it left off.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use resumable_sse::EventSource;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let source = EventSource::builder("https://api.example.com/events")
//!         .header("Authorization", &EventSource::basic_auth_header("user", "secret"))
//!         .build()?;
//!
//!     source.on_open(|| println!("connected"));
//!     source.on_message(|event| println!("{}: {}", event.event, event.data));
//!     source.add_event_listener("update", |event| println!("update {:?}", event.id));
//!     source.on_error(|err| eprintln!("error: {err}"));
//!
//!     source.connect();
//!     tokio::signal::ctrl_c().await?;
//!     source.close();
//!     Ok(())
//! }
//! ```

mod dispatch;
mod error;
mod event_source;
mod executor;
mod framer;
mod parser;
mod storage;
mod transport;
mod types;

pub use dispatch::{Dispatcher, EventHandler, EventListenerRegistry};
pub use error::{EventSourceError, InvalidHeaderError, TransportError};
pub use event_source::{
    ErrorHandler, EventSource, EventSourceBuilder, HeaderProvider, OpenHandler,
    DEFAULT_RETRY_INTERVAL,
};
pub use executor::{CallbackExecutor, Job, SerialExecutor};
pub use framer::ByteFramer;
pub use parser::{is_ignorable, parse_block, EventRecord};
pub use storage::{
    persistence_key, JsonFileStore, LastEventIdStore, MemoryStore, DEFAULT_KEY_NAMESPACE,
};
pub use transport::{
    HttpTransport, HttpTransportBuilder, StreamRequest, Transport, TransportEvent,
    TransportStream,
};
pub use types::{MessageEvent, ReadyState, DEFAULT_EVENT_TYPE};

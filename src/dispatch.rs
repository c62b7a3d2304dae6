//! Routing of parsed records to application handlers.

use crate::executor::CallbackExecutor;
use crate::parser::{is_ignorable, parse_block, EventRecord};
use crate::storage::LastEventIdStore;
use crate::types::{MessageEvent, DEFAULT_EVENT_TYPE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Handler for default messages and named events.
pub type EventHandler = Arc<dyn Fn(MessageEvent) + Send + Sync>;

/// Named-event handlers keyed by event type.
#[derive(Default)]
pub struct EventListenerRegistry {
    listeners: HashMap<String, EventHandler>,
}

impl EventListenerRegistry {
    /// Register `handler` for `name`, replacing any previous handler.
    pub fn add(&mut self, name: impl Into<String>, handler: EventHandler) {
        self.listeners.insert(name.into(), handler);
    }

    /// Remove the handler for `name`. Returns whether one was registered.
    pub fn remove(&mut self, name: &str) -> bool {
        self.listeners.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<EventHandler> {
        self.listeners.get(name).cloned()
    }

    /// Registered event names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.listeners.keys().cloned().collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for EventListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventListenerRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[derive(Default)]
struct Handlers {
    on_message: Option<EventHandler>,
    listeners: EventListenerRegistry,
}

/// Applies parsed records: persists ids, tracks the retry interval and hands
/// matching handlers to a [`CallbackExecutor`].
///
/// Handlers are cloned out of the registry before submission, so a handler
/// may add or remove listeners without deadlocking.
pub struct Dispatcher {
    handlers: Mutex<Handlers>,
    retry_interval_ms: AtomicU64,
    store: Arc<dyn LastEventIdStore>,
    store_key: String,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.lock();
        f.debug_struct("Dispatcher")
            .field("has_on_message", &handlers.on_message.is_some())
            .field("listeners", &handlers.listeners)
            .field("retry_interval_ms", &self.retry_interval_millis())
            .field("store_key", &self.store_key)
            .finish()
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn LastEventIdStore>,
        store_key: impl Into<String>,
        retry_interval_ms: u64,
    ) -> Self {
        Self {
            handlers: Mutex::new(Handlers::default()),
            retry_interval_ms: AtomicU64::new(retry_interval_ms),
            store,
            store_key: store_key.into(),
        }
    }

    pub fn set_on_message(&self, handler: EventHandler) {
        self.handlers.lock().on_message = Some(handler);
    }

    pub fn add_event_listener(&self, name: impl Into<String>, handler: EventHandler) {
        self.handlers.lock().listeners.add(name, handler);
    }

    /// Remove a named-event handler. Unknown names are ignored.
    pub fn remove_event_listener(&self, name: &str) {
        if !self.handlers.lock().listeners.remove(name) {
            debug!(event = name, "No listener registered for event");
        }
    }

    pub fn event_names(&self) -> Vec<String> {
        self.handlers.lock().listeners.names()
    }

    pub fn retry_interval_millis(&self) -> u64 {
        self.retry_interval_ms.load(Ordering::Acquire)
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.store.get(&self.store_key)
    }

    /// Parse and process raw blocks, skipping comment-only and blank ones.
    pub fn process_blocks<I>(&self, blocks: I, emit: &dyn CallbackExecutor)
    where
        I: IntoIterator<Item = String>,
    {
        let records = blocks
            .into_iter()
            .filter(|block| !is_ignorable(block))
            .map(|block| parse_block(&block));
        self.process(records, emit);
    }

    /// Process records in arrival order.
    pub fn process<I>(&self, records: I, emit: &dyn CallbackExecutor)
    where
        I: IntoIterator<Item = EventRecord>,
    {
        for record in records {
            self.process_one(record, emit);
        }
    }

    fn process_one(&self, record: EventRecord, emit: &dyn CallbackExecutor) {
        let EventRecord {
            id,
            event_type,
            data,
            retry,
        } = record;

        if let Some(retry_ms) = retry {
            debug!(retry_ms, "Server set retry interval");
            self.retry_interval_ms.store(retry_ms, Ordering::Release);
        }

        if let Some(id) = &id {
            self.store.set(&self.store_key, id);
        }

        let Some(data) = data else {
            return;
        };

        let (handler, event) = {
            let handlers = self.handlers.lock();
            match event_type {
                None => (handlers.on_message.clone(), DEFAULT_EVENT_TYPE.to_string()),
                Some(name) => (handlers.listeners.get(&name), name),
            }
        };

        match handler {
            Some(handler) => {
                let message = MessageEvent::new(id, event, data);
                emit.execute(Box::new(move || handler(message)));
            }
            None => debug!(event = %event, "No handler for event, dropping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Job;
    use crate::storage::MemoryStore;

    /// Queues jobs until `run_all` is called.
    #[derive(Default)]
    struct QueueExecutor {
        jobs: Mutex<Vec<Job>>,
    }

    impl QueueExecutor {
        fn run_all(&self) -> usize {
            let jobs: Vec<Job> = self.jobs.lock().drain(..).collect();
            let count = jobs.len();
            for job in jobs {
                job();
            }
            count
        }
    }

    impl CallbackExecutor for QueueExecutor {
        fn execute(&self, job: Job) {
            self.jobs.lock().push(job);
        }
    }

    type Seen = Arc<Mutex<Vec<MessageEvent>>>;

    fn recorder(seen: &Seen) -> EventHandler {
        let seen = seen.clone();
        Arc::new(move |event: MessageEvent| seen.lock().push(event))
    }

    fn dispatcher() -> (Dispatcher, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (Dispatcher::new(store.clone(), "key", 3000), store)
    }

    fn blocks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_default_message_handler() {
        let (dispatcher, _) = dispatcher();
        let executor = QueueExecutor::default();
        let seen = Seen::default();
        dispatcher.set_on_message(recorder(&seen));

        dispatcher.process_blocks(blocks(&["data: hello\ndata: world"]), &executor);
        assert!(seen.lock().is_empty(), "handlers must not run inline");

        assert_eq!(executor.run_all(), 1);
        assert_eq!(
            *seen.lock(),
            vec![MessageEvent::new(None, "message", "hello\nworld".into())]
        );
    }

    #[test]
    fn test_named_event_then_default_message() {
        let (dispatcher, store) = dispatcher();
        let executor = QueueExecutor::default();
        let messages = Seen::default();
        let updates = Seen::default();
        dispatcher.set_on_message(recorder(&messages));
        dispatcher.add_event_listener("update", recorder(&updates));

        dispatcher.process_blocks(
            blocks(&["event: update\nid: 5\ndata: x", "data: y"]),
            &executor,
        );
        executor.run_all();

        assert_eq!(
            *updates.lock(),
            vec![MessageEvent::new(Some("5".into()), "update", "x".into())]
        );
        assert_eq!(
            *messages.lock(),
            vec![MessageEvent::new(None, "message", "y".into())]
        );
        assert_eq!(store.get("key").as_deref(), Some("5"));
    }

    #[test]
    fn test_retry_only_block() {
        let (dispatcher, _) = dispatcher();
        let executor = QueueExecutor::default();
        dispatcher.set_on_message(recorder(&Seen::default()));

        dispatcher.process_blocks(blocks(&["retry: 500"]), &executor);
        assert_eq!(dispatcher.retry_interval_millis(), 500);
        assert_eq!(executor.run_all(), 0);
    }

    #[test]
    fn test_retry_with_data_still_dispatches() {
        let (dispatcher, _) = dispatcher();
        let executor = QueueExecutor::default();
        let seen = Seen::default();
        dispatcher.set_on_message(recorder(&seen));

        dispatcher.process_blocks(blocks(&["retry: 1200\ndata: payload"]), &executor);
        executor.run_all();
        assert_eq!(dispatcher.retry_interval_millis(), 1200);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn test_comment_and_blank_blocks_are_ignored() {
        let (dispatcher, store) = dispatcher();
        let executor = QueueExecutor::default();
        dispatcher.set_on_message(recorder(&Seen::default()));

        dispatcher.process_blocks(blocks(&[": ping\nid: 9\ndata: hidden", "", "\n"]), &executor);
        assert_eq!(executor.run_all(), 0);
        assert_eq!(store.get("key"), None);
    }

    #[test]
    fn test_id_persisted_without_data_or_handler() {
        let (dispatcher, store) = dispatcher();
        let executor = QueueExecutor::default();

        dispatcher.process_blocks(blocks(&["id: 1"]), &executor);
        assert_eq!(store.get("key").as_deref(), Some("1"));

        dispatcher.process_blocks(blocks(&["event: unknown\nid: 2\ndata: z"]), &executor);
        assert_eq!(store.get("key").as_deref(), Some("2"));
        assert_eq!(dispatcher.last_event_id().as_deref(), Some("2"));
        assert_eq!(executor.run_all(), 0);
    }

    #[test]
    fn test_named_event_without_data_is_not_delivered() {
        let (dispatcher, _) = dispatcher();
        let executor = QueueExecutor::default();
        dispatcher.add_event_listener("tick", recorder(&Seen::default()));

        dispatcher.process_blocks(blocks(&["event: tick"]), &executor);
        assert_eq!(executor.run_all(), 0);
    }

    #[test]
    fn test_delivery_order_matches_arrival() {
        let (dispatcher, _) = dispatcher();
        let executor = QueueExecutor::default();
        let seen = Seen::default();
        dispatcher.set_on_message(recorder(&seen));
        dispatcher.add_event_listener("a", recorder(&seen));

        let input: Vec<String> = (0..20)
            .map(|i| {
                if i % 2 == 0 {
                    format!("data: {i}")
                } else {
                    format!("event: a\ndata: {i}")
                }
            })
            .collect();
        dispatcher.process_blocks(input, &executor);
        executor.run_all();

        let order: Vec<String> = seen.lock().iter().map(|e| e.data.clone()).collect();
        assert_eq!(order, (0..20).map(|i| i.to_string()).collect::<Vec<_>>());
    }

    #[test]
    fn test_listener_registry_management() {
        let (dispatcher, _) = dispatcher();
        dispatcher.remove_event_listener("never-added");
        assert!(dispatcher.event_names().is_empty());

        dispatcher.add_event_listener("b", recorder(&Seen::default()));
        dispatcher.add_event_listener("a", recorder(&Seen::default()));
        dispatcher.add_event_listener("a", recorder(&Seen::default()));
        assert_eq!(dispatcher.event_names(), vec!["a", "b"]);

        dispatcher.remove_event_listener("a");
        assert_eq!(dispatcher.event_names(), vec!["b"]);
    }
}

//! Event handler registry.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

/// Dispatched after every successful dial or redial.
pub const CONNECTION: &str = "connection";
/// Dispatched when a session ends, for any reason.
pub const DISCONNECTION: &str = "disconnection";
/// Dispatched for Socket.IO error frames addressed to the client's namespace.
pub const ERROR: &str = "error";

/// Broadcast channel capacity for inbound events.
const BROADCAST_CAPACITY: usize = 1024;

type EventHandler = Arc<dyn Fn(Value) + Send + Sync>;
type AckHandler = Arc<dyn Fn(Value) -> Value + Send + Sync>;

#[derive(Clone)]
enum Handler {
    Event(EventHandler),
    Ack(AckHandler),
}

/// An inbound event as delivered to subscribers.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub name: String,
    pub namespace: String,
    pub data: Value,
    /// Set when the server asked for an acknowledgement
    pub ack_id: Option<u64>,
}

impl Event {
    pub(crate) fn lifecycle(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_owned(),
            namespace: namespace.to_owned(),
            data: Value::Null,
            ack_id: None,
        }
    }
}

pub(crate) struct Methods {
    handlers: DashMap<String, Handler>,
    events_tx: broadcast::Sender<Event>,
}

impl fmt::Debug for Methods {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Methods")
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl Methods {
    pub(crate) fn new() -> Self {
        let (events_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            handlers: DashMap::new(),
            events_tx,
        }
    }

    pub(crate) fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.handlers
            .insert(event.to_owned(), Handler::Event(Arc::new(handler)));
    }

    pub(crate) fn on_ack<F>(&self, event: &str, handler: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.handlers
            .insert(event.to_owned(), Handler::Ack(Arc::new(handler)));
    }

    pub(crate) fn off(&self, event: &str) -> bool {
        self.handlers.remove(event).is_some()
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    /// Publish `event` and run its handler on the blocking pool.
    ///
    /// Handlers are plain closures and may block, so they never run on a runtime
    /// worker. `reply` is invoked with the handler's result when the handler was
    /// registered with `on_ack` and the server asked for an acknowledgement.
    pub(crate) fn dispatch<R>(&self, event: Event, reply: R)
    where
        R: FnOnce(Value) + Send + 'static,
    {
        _ = self.events_tx.send(event.clone());

        let Some(handler) = self.handlers.get(&event.name).map(|h| h.value().clone()) else {
            #[cfg(feature = "tracing")]
            tracing::trace!(event = %event.name, "No handler registered");
            return;
        };

        tokio::task::spawn_blocking(move || match handler {
            Handler::Event(handler) => handler(event.data),
            Handler::Ack(handler) => {
                let wants_ack = event.ack_id.is_some();
                let response = handler(event.data);
                if wants_ack {
                    reply(response);
                }
            }
        });
    }

    pub(crate) fn dispatch_lifecycle(&self, name: &str, namespace: &str) {
        self.dispatch(Event::lifecycle(name, namespace), |_| {});
    }
}

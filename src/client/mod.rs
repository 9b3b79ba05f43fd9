//! The Socket.IO client: dialing, emitting, and keeping a session alive.
//!
//! A [`Client`] owns one logical connection to one namespace. Internally each
//! physical connection runs three tasks (writer, reader, pinger) coordinated
//! through a shared channel; see [`ChannelState`] for the lifecycle.
//!
//! # Example
//!
//! ```rust, no_run
//! use serde_json::json;
//! use socketio_client::client::{Client, DialParams};
//! use socketio_client::transport::WebsocketTransport;
//! use socketio_client::websocket_url;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let url = websocket_url("localhost", 3000, false);
//!     let client = Client::dial(&url, WebsocketTransport::default(), DialParams::with_nsp("/chat")).await?;
//!
//!     client.on("message", |data| println!("got {data}"));
//!     client.emit("message", &json!({"text": "hello"}))?;
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod methods;
mod tasks;

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, broadcast, watch};
use tokio_util::sync::CancellationToken;
use url::Url;

pub use channel::ChannelState;
pub use config::{Config, DialParams, ReconnectConfig};
pub use methods::{CONNECTION, DISCONNECTION, ERROR, Event};

use self::channel::Channel;
use self::methods::Methods;
use crate::Result;
use crate::error::{AckError, Error, Kind, ReconnectExhausted, SessionError};
use crate::protocol::{Frame, Handshake};
use crate::transport::{Connection, Transport};

/// Handle to a Socket.IO session. Cheap to clone; clones share the session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    url: String,
    params: DialParams,
    transport: Arc<dyn Transport>,
    config: Config,
    channel: Arc<Channel>,
    methods: Arc<Methods>,
    /// Serializes dial, redial and close so only one connection is ever installed
    lifecycle: Mutex<()>,
    /// Stops the auto-reconnect supervisor
    supervisor: CancellationToken,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.supervisor.cancel();
        self.channel.shutdown(None);
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("url", &self.inner.url)
            .field("namespace", &self.inner.params.nsp)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Connect to `url` and start a session with default [`Config`].
    ///
    /// When `params.nsp` is non-empty, the namespace-open frame is written before any
    /// other frame.
    pub async fn dial<T: Transport>(url: &str, transport: T, params: DialParams) -> Result<Self> {
        Self::dial_with_config(url, transport, params, Config::default()).await
    }

    pub async fn dial_with_config<T: Transport>(
        url: &str,
        transport: T,
        params: DialParams,
        config: Config,
    ) -> Result<Self> {
        config.validate()?;
        validate_url(url)?;

        let auto_reconnect = config.auto_reconnect;
        let channel = Arc::new(Channel::new(&params.nsp));
        let client = Self {
            inner: Arc::new(ClientInner {
                url: url.to_owned(),
                params,
                transport: Arc::new(transport),
                config,
                channel,
                methods: Arc::new(Methods::new()),
                lifecycle: Mutex::new(()),
                supervisor: CancellationToken::new(),
            }),
        };

        {
            let _guard = client.inner.lifecycle.lock().await;
            client.establish().await?;
        }

        if auto_reconnect {
            client.spawn_supervisor();
        }

        Ok(client)
    }

    /// Tear down the current connection and connect again with the original URL
    /// and parameters.
    ///
    /// Pending acks from the old connection are cancelled. Attempts are bounded by
    /// [`ReconnectConfig::max_attempts`] with exponential backoff in between; when
    /// all fail, the returned error has kind [`Kind::Connect`] and wraps
    /// [`ReconnectExhausted`].
    pub async fn redial(&self) -> Result<()> {
        self.reconnect(None).await
    }

    /// Stop the session and release the connection. Idempotent.
    ///
    /// Returns once all session tasks have exited. Also stops auto-reconnect.
    pub async fn close(&self) {
        self.inner.supervisor.cancel();
        let _guard = self.inner.lifecycle.lock().await;
        self.close_session().await;
    }

    /// Queue an event on the current connection. Never blocks on I/O.
    ///
    /// Frames from one caller reach the peer in call order. Fails with
    /// [`SessionError::ChannelClosed`] once the session is closing.
    pub fn emit<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> Result<()> {
        let data = serde_json::to_value(data)?;
        let frame = Frame::event(self.namespace(), event, &data, None);
        self.inner.channel.enqueue(frame)?;
        Ok(())
    }

    /// Emit an event and wait for the server's acknowledgement, up to
    /// [`Config::ack_timeout`].
    pub async fn emit_with_ack<T: Serialize + ?Sized>(&self, event: &str, data: &T) -> Result<Value> {
        self.emit_with_ack_timeout(event, data, self.inner.config.ack_timeout)
            .await
    }

    pub async fn emit_with_ack_timeout<T: Serialize + ?Sized>(
        &self,
        event: &str,
        data: &T,
        timeout: Duration,
    ) -> Result<Value> {
        let data = serde_json::to_value(data)?;
        let nsp = self.namespace();
        let (generation, id, rx) = self
            .inner
            .channel
            .enqueue_with_ack(|id| Frame::event(nsp, event, &data, Some(id)))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(AckError::Cancelled.into()),
            Err(_) => {
                self.inner.channel.forget_ack(generation, id);
                Err(AckError::Timeout(timeout).into())
            }
        }
    }

    /// Register `handler` for `event`, replacing any previous one.
    ///
    /// Handlers run on their own task. The reserved names [`CONNECTION`],
    /// [`DISCONNECTION`] and [`ERROR`] receive lifecycle notifications.
    pub fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.inner.methods.on(event, handler);
    }

    /// Register a handler whose return value is sent back when the server asks
    /// for an acknowledgement.
    pub fn on_ack<F>(&self, event: &str, handler: F)
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.inner.methods.on_ack(event, handler);
    }

    /// Remove the handler for `event`, returning whether one was registered.
    pub fn off(&self, event: &str) -> bool {
        self.inner.methods.off(event)
    }

    /// Every inbound event and lifecycle notification, whether handled or not.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.methods.subscribe()
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.inner.channel.state()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ChannelState> {
        self.inner.channel.state_receiver()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state().is_open()
    }

    /// Why the most recent connection died, if it died of an error.
    ///
    /// Cleared whenever a new connection is installed.
    #[must_use]
    pub fn last_error(&self) -> Option<SessionError> {
        self.inner.channel.last_error()
    }

    /// The Engine.IO handshake of the current connection, once received.
    #[must_use]
    pub fn handshake(&self) -> Option<Handshake> {
        self.inner.channel.handshake()
    }

    /// Count of malformed or unexpected inbound frames since the client was dialed.
    #[must_use]
    pub fn anomalies(&self) -> u64 {
        self.inner.channel.anomalies()
    }

    /// Number of emits still waiting for an acknowledgement.
    #[must_use]
    pub fn pending_acks(&self) -> usize {
        self.inner.channel.pending_acks()
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.inner.params.nsp
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Connect once and start the session tasks.
    ///
    /// Callers must hold the lifecycle lock and have closed any previous session.
    async fn establish(&self) -> Result<()> {
        let inner = &self.inner;

        let connection: Arc<dyn Connection> = match inner.transport.connect(&inner.url).await {
            Ok(connection) => Arc::from(connection),
            Err(e) if e.kind() == Kind::Connect => return Err(e),
            Err(e) => return Err(Error::connect(e)),
        };

        let nsp = inner.params.nsp.as_str();
        if !nsp.is_empty() {
            // Written directly so it precedes anything the writer task sends.
            if let Err(e) = connection.write(Frame::connect(nsp).encode()).await {
                connection.close().await;
                return Err(Error::connect(e));
            }
        }

        let opened = inner.channel.open(Arc::clone(&connection));
        let generation = opened.generation;
        let tasks = tasks::spawn_session(
            opened,
            Arc::clone(&inner.channel),
            Arc::clone(&inner.methods),
            connection,
            &inner.config,
        );
        inner.channel.attach_tasks(generation, tasks);

        #[cfg(feature = "tracing")]
        tracing::info!(url = %inner.url, namespace = nsp, generation, "Connected");

        inner.methods.dispatch_lifecycle(CONNECTION, nsp);
        Ok(())
    }

    /// Stop the current session and wait for its tasks. Callers must hold the
    /// lifecycle lock.
    async fn close_session(&self) {
        let inner = &self.inner;
        let Some(session) = inner.channel.take_session() else {
            return;
        };

        for task in session.tasks {
            if let Err(e) = task.await {
                #[cfg(feature = "tracing")]
                tracing::error!(error = %e, "Session task panicked");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }

        session.connection.close().await;
        if inner.channel.mark_closed(session.generation) {
            inner
                .methods
                .dispatch_lifecycle(DISCONNECTION, inner.channel.namespace());
        }
    }

    async fn reconnect(&self, cancel: Option<&CancellationToken>) -> Result<()> {
        let inner = &self.inner;
        let max_attempts = inner.config.reconnect.max_attempts;
        let mut backoff: ExponentialBackoff = inner.config.reconnect.clone().into();
        let mut attempt = 0_u32;

        loop {
            attempt = attempt.saturating_add(1);

            let result = {
                let _guard = inner.lifecycle.lock().await;
                if let Some(token) = cancel {
                    if token.is_cancelled() {
                        return Err(SessionError::ChannelClosed.into());
                    }
                    // An explicit redial got there first.
                    if inner.channel.state().is_open() {
                        return Ok(());
                    }
                }
                self.close_session().await;
                self.establish().await
            };

            let e = match result {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            #[cfg(feature = "tracing")]
            tracing::warn!(error = %e, attempt, max_attempts, "Reconnect attempt failed");

            if attempt >= max_attempts {
                return Err(ReconnectExhausted {
                    attempts: attempt,
                    last: e,
                }
                .into());
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(inner.config.reconnect.max_backoff);

            match cancel {
                Some(token) => {
                    tokio::select! {
                        () = token.cancelled() => return Err(SessionError::ChannelClosed.into()),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Watch the channel and redial whenever a session dies of an error.
    fn spawn_supervisor(&self) {
        let weak = Arc::downgrade(&self.inner);
        let token = self.inner.supervisor.clone();
        let mut state_rx = self.inner.channel.state_receiver();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    () = token.cancelled() => break,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }

                if *state_rx.borrow_and_update() != ChannelState::Closed {
                    continue;
                }

                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let client = Client { inner };
                if client.last_error().is_none() {
                    continue;
                }

                #[cfg(feature = "tracing")]
                tracing::info!(error = ?client.last_error(), "Session lost, reconnecting");

                if let Err(e) = client.reconnect(Some(&token)).await {
                    #[cfg(feature = "tracing")]
                    tracing::error!(error = %e, "Auto-reconnect gave up");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &e;
                    break;
                }
            }
        });
    }
}

fn validate_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        scheme => Err(Error::validation(format!(
            "unsupported URL scheme `{scheme}`"
        ))),
    }
}

#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]
#![allow(
    unused,
    reason = "Not every test binary uses every helper"
)]

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use socketio_client::Result;
use socketio_client::client::{ChannelState, Client};
use socketio_client::error::{Error, Kind};
use socketio_client::transport::{Connection, Transport};
use tokio::sync::mpsc;
use tokio::time::timeout;

pub const URL: &str = "ws://mock:3000/socket.io/?EIO=3&transport=websocket";

pub const WAIT: Duration = Duration::from_secs(2);

enum Inbound {
    Text(String),
    Fail(String),
    Close,
}

/// In-memory [`Transport`]. Every successful connect creates a [`MockPeer`] that the
/// test drives as the server side.
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<TransportState>,
}

#[derive(Default)]
struct TransportState {
    connects: AtomicUsize,
    fail_connects: AtomicUsize,
    fail_next_write: AtomicBool,
    auto_pong: AtomicBool,
    peers: Mutex<Vec<Arc<MockPeer>>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every client ping with a pong.
    #[must_use]
    pub fn with_auto_pong(self) -> Self {
        self.state.auto_pong.store(true, Ordering::SeqCst);
        self
    }

    /// Refuse the next `n` connection attempts.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.fail_connects.store(n, Ordering::SeqCst);
    }

    /// Fail the first write on the next connection.
    pub fn fail_next_first_write(&self) {
        self.state.fail_next_write.store(true, Ordering::SeqCst);
    }

    /// Connection attempts so far, failed ones included.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn peer_count(&self) -> usize {
        self.state.peers.lock().unwrap().len()
    }

    #[must_use]
    pub fn peer(&self, index: usize) -> Arc<MockPeer> {
        Arc::clone(&self.state.peers.lock().unwrap()[index])
    }

    /// Wait until `count` connections have been established.
    pub async fn wait_for_peers(&self, count: usize) {
        timeout(WAIT, async {
            while self.peer_count() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, _url: &str) -> Result<Box<dyn Connection>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);

        let refuse = self
            .state
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refuse {
            return Err(Error::connect(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock connection refused",
            )));
        }

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_next_write: AtomicBool::new(self.state.fail_next_write.swap(false, Ordering::SeqCst)),
            auto_pong: self.state.auto_pong.load(Ordering::SeqCst),
            stale_writes: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        });

        let peer = Arc::new(MockPeer {
            inbound_tx: inbound_tx.clone(),
            outbound_rx: tokio::sync::Mutex::new(outbound_rx),
            shared: Arc::clone(&shared),
        });
        self.state.peers.lock().unwrap().push(peer);

        Ok(Box::new(MockConnection {
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            outbound_tx,
            shared,
        }))
    }
}

struct Shared {
    closed: AtomicBool,
    fail_writes: AtomicBool,
    fail_next_write: AtomicBool,
    auto_pong: bool,
    stale_writes: AtomicUsize,
    writes: AtomicUsize,
}

struct MockConnection {
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
}

fn io_error(message: &str) -> Error {
    Error::with_source(Kind::WebSocket, io::Error::other(message.to_owned()))
}

#[async_trait]
impl Connection for MockConnection {
    async fn write(&self, text: String) -> Result<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            self.shared.stale_writes.fetch_add(1, Ordering::SeqCst);
            return Err(io_error("write after close"));
        }
        if self.shared.fail_writes.load(Ordering::SeqCst)
            || self.shared.fail_next_write.swap(false, Ordering::SeqCst)
        {
            return Err(io_error("broken pipe"));
        }

        self.shared.writes.fetch_add(1, Ordering::SeqCst);
        if self.shared.auto_pong && text == "2" {
            drop(self.inbound_tx.send(Inbound::Text("3".to_owned())));
        }
        drop(self.outbound_tx.send(text));
        Ok(())
    }

    async fn read(&self) -> Result<Option<String>> {
        match self.inbound_rx.lock().await.recv().await {
            Some(Inbound::Text(text)) => Ok(Some(text)),
            Some(Inbound::Fail(message)) => Err(io_error(&message)),
            Some(Inbound::Close) | None => Ok(None),
        }
    }

    async fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
    }
}

/// Server side of one mock connection.
pub struct MockPeer {
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    outbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<String>>,
    shared: Arc<Shared>,
}

impl MockPeer {
    /// Deliver a raw frame to the client.
    pub fn send(&self, text: &str) {
        drop(self.inbound_tx.send(Inbound::Text(text.to_owned())));
    }

    /// Close the connection from the server side.
    pub fn close(&self) {
        drop(self.inbound_tx.send(Inbound::Close));
    }

    /// Make the client's next read fail.
    pub fn fail_read(&self, message: &str) {
        drop(self.inbound_tx.send(Inbound::Fail(message.to_owned())));
    }

    /// Make every further client write fail.
    pub fn fail_writes(&self) {
        self.shared.fail_writes.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Writes attempted after the client closed this connection.
    #[must_use]
    pub fn stale_writes(&self) -> usize {
        self.shared.stale_writes.load(Ordering::SeqCst)
    }

    /// Next frame written by the client, or `None` after [`WAIT`].
    pub async fn next_written(&self) -> Option<String> {
        let mut rx = self.outbound_rx.lock().await;
        timeout(WAIT, rx.recv()).await.ok().flatten()
    }

    /// Next frame written by the client that is not a heartbeat.
    pub async fn next_message(&self) -> Option<String> {
        loop {
            let text = self.next_written().await?;
            if text != "2" && text != "3" {
                return Some(text);
            }
        }
    }

    /// Everything written so far without waiting.
    pub async fn drain_written(&self) -> Vec<String> {
        let mut rx = self.outbound_rx.lock().await;
        let mut written = Vec::new();
        while let Ok(text) = rx.try_recv() {
            written.push(text);
        }
        written
    }
}

pub async fn wait_for_state<F>(client: &Client, predicate: F)
where
    F: Fn(&ChannelState) -> bool,
{
    let mut rx = client.state_receiver();
    timeout(WAIT, rx.wait_for(|state| predicate(state)))
        .await
        .expect("timed out waiting for channel state")
        .expect("state sender dropped");
}

pub async fn wait_closed(client: &Client) {
    wait_for_state(client, |state| *state == ChannelState::Closed).await;
}

//! The concurrency hub shared by the writer, reader and pinger of a session.
//!
//! A [`Channel`] lives as long as its client. Each connection gets a new
//! generation: a fresh outgoing queue, a fresh cancellation token and an empty ack
//! table. Tasks carry the generation they were spawned for, and every mutation they
//! request is ignored once that generation has been replaced.

#![expect(
    clippy::module_name_repetitions,
    reason = "Channel types intentionally mirror the module name for clarity"
)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::error::{ProtocolError, SessionError};
use crate::protocol::{Frame, Handshake};
use crate::transport::Connection;

/// Liveness of the current connection.
///
/// Within one connection the state only moves forward: `Open`, `Closing`, `Closed`.
/// A redial starts over at `Open` with a new generation.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// No connection has been established yet
    Idle,
    /// Tasks are running against a live connection
    Open {
        /// When the connection was installed
        since: Instant,
        /// Connection counter, incremented on every (re)connect
        generation: u64,
    },
    /// Shutdown was signalled; tasks are winding down
    Closing,
    /// All tasks have stopped and the connection was released
    Closed,
}

impl ChannelState {
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

struct PendingAck {
    generation: u64,
    tx: oneshot::Sender<Value>,
}

/// Everything owned by one connection lifetime.
pub(crate) struct Session {
    pub(crate) generation: u64,
    pub(crate) connection: Arc<dyn Connection>,
    pub(crate) tasks: Vec<JoinHandle<()>>,
    outgoing_tx: mpsc::UnboundedSender<Frame>,
    token: CancellationToken,
}

/// Handed to the session tasks when a connection is installed.
pub(crate) struct Opened {
    pub(crate) generation: u64,
    pub(crate) outgoing_rx: mpsc::UnboundedReceiver<Frame>,
    pub(crate) token: CancellationToken,
}

pub(crate) struct Channel {
    namespace: String,
    state_tx: watch::Sender<ChannelState>,
    state_rx: watch::Receiver<ChannelState>,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    acks: DashMap<u64, PendingAck>,
    next_ack_id: AtomicU64,
    last_pong: watch::Sender<time::Instant>,
    last_error: RwLock<Option<SessionError>>,
    handshake: RwLock<Option<Handshake>>,
    anomalies: AtomicU64,
}

impl Channel {
    pub(crate) fn new(namespace: &str) -> Self {
        let (state_tx, state_rx) = watch::channel(ChannelState::Idle);
        let (last_pong, _) = watch::channel(time::Instant::now());

        Self {
            namespace: namespace.to_owned(),
            state_tx,
            state_rx,
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
            acks: DashMap::new(),
            next_ack_id: AtomicU64::new(0),
            last_pong,
            last_error: RwLock::new(None),
            handshake: RwLock::new(None),
            anomalies: AtomicU64::new(0),
        }
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn state(&self) -> ChannelState {
        *self.state_rx.borrow()
    }

    pub(crate) fn state_receiver(&self) -> watch::Receiver<ChannelState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Install a new connection, replacing all per-connection state.
    ///
    /// The previous session must already have been taken with [`Self::take_session`].
    pub(crate) fn open(&self, connection: Arc<dyn Connection>) -> Opened {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.acks.clear();
        self.next_ack_id.store(0, Ordering::Release);
        self.last_pong.send_replace(time::Instant::now());
        *self.last_error.write().unwrap_or_else(PoisonError::into_inner) = None;
        *self.handshake.write().unwrap_or_else(PoisonError::into_inner) = None;

        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        *session = Some(Session {
            generation,
            connection,
            tasks: Vec::new(),
            outgoing_tx,
            token: token.clone(),
        });

        _ = self.state_tx.send(ChannelState::Open {
            since: Instant::now(),
            generation,
        });

        Opened {
            generation,
            outgoing_rx,
            token,
        }
    }

    pub(crate) fn attach_tasks(&self, generation: u64, tasks: Vec<JoinHandle<()>>) {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        match session.as_mut() {
            Some(current) if current.generation == generation => current.tasks = tasks,
            // Closed before the tasks were attached; they exit on their own.
            _ => drop(tasks),
        }
    }

    /// Queue a frame on the current connection.
    pub(crate) fn enqueue(&self, frame: Frame) -> Result<(), SessionError> {
        self.push(None, frame)
    }

    /// Queue a frame only if `generation` is still the live connection.
    pub(crate) fn enqueue_for(&self, generation: u64, frame: Frame) -> Result<(), SessionError> {
        self.push(Some(generation), frame)
    }

    fn push(&self, generation: Option<u64>, frame: Frame) -> Result<(), SessionError> {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let session = live(session.as_ref(), generation).ok_or(SessionError::ChannelClosed)?;

        session
            .outgoing_tx
            .send(frame)
            .map_err(|_e| SessionError::ChannelClosed)
    }

    /// Register an ack waiter and queue the frame carrying its id, atomically with
    /// respect to shutdown and connection replacement.
    pub(crate) fn enqueue_with_ack<F>(
        &self,
        build: F,
    ) -> Result<(u64, u64, oneshot::Receiver<Value>), SessionError>
    where
        F: FnOnce(u64) -> Frame,
    {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let session = live(session.as_ref(), None).ok_or(SessionError::ChannelClosed)?;

        let id = self.next_ack_id.fetch_add(1, Ordering::AcqRel);
        let (tx, rx) = oneshot::channel();
        self.acks.insert(
            id,
            PendingAck {
                generation: session.generation,
                tx,
            },
        );

        if session.outgoing_tx.send(build(id)).is_err() {
            self.acks.remove(&id);
            return Err(SessionError::ChannelClosed);
        }

        Ok((session.generation, id, rx))
    }

    /// Deliver an ack payload. Returns `false` when nobody is waiting for `id`.
    pub(crate) fn resolve_ack(&self, generation: u64, id: u64, data: Value) -> bool {
        match self
            .acks
            .remove_if(&id, |_, pending| pending.generation == generation)
        {
            Some((_, pending)) => {
                // The waiter may have timed out in the meantime.
                _ = pending.tx.send(data);
                true
            }
            None => false,
        }
    }

    pub(crate) fn forget_ack(&self, generation: u64, id: u64) {
        self.acks
            .remove_if(&id, |_, pending| pending.generation == generation);
    }

    pub(crate) fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    pub(crate) fn record_pong(&self) {
        self.last_pong.send_replace(time::Instant::now());
    }

    pub(crate) fn since_last_pong(&self) -> Duration {
        self.last_pong.borrow().elapsed()
    }

    pub(crate) fn record_anomaly(&self, error: &ProtocolError) {
        let total = self.anomalies.fetch_add(1, Ordering::Relaxed) + 1;

        #[cfg(feature = "tracing")]
        tracing::warn!(%error, total, "Protocol anomaly");
        #[cfg(not(feature = "tracing"))]
        let _ = (error, total);
    }

    pub(crate) fn anomalies(&self) -> u64 {
        self.anomalies.load(Ordering::Relaxed)
    }

    pub(crate) fn set_handshake(&self, generation: u64, handshake: Handshake) {
        if generation == self.current_generation() {
            *self.handshake.write().unwrap_or_else(PoisonError::into_inner) = Some(handshake);
        }
    }

    pub(crate) fn handshake(&self) -> Option<Handshake> {
        self.handshake
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn last_error(&self) -> Option<SessionError> {
        self.last_error
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record why `generation` died and signal its tasks to stop.
    ///
    /// Only the first failure of a connection is kept.
    pub(crate) fn fail(&self, generation: u64, error: SessionError) {
        if generation != self.current_generation() {
            return;
        }

        {
            let mut last = self.last_error.write().unwrap_or_else(PoisonError::into_inner);
            if last.is_none() {
                #[cfg(feature = "tracing")]
                tracing::warn!(%error, generation, "Session failed");
                *last = Some(error);
            }
        }

        self.shutdown(Some(generation));
    }

    /// Signal shutdown to the tasks of `generation` (or of whatever is live when
    /// `None`). Idempotent.
    pub(crate) fn shutdown(&self, generation: Option<u64>) {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = live(session.as_ref(), generation) {
            session.token.cancel();
            self.begin_closing();
        }
    }

    /// Signal shutdown and hand the session to the caller so it can join the tasks.
    pub(crate) fn take_session(&self) -> Option<Session> {
        let mut slot = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let session = slot.take()?;
        if !session.token.is_cancelled() {
            session.token.cancel();
            self.begin_closing();
        }
        Some(session)
    }

    fn begin_closing(&self) {
        self.state_tx.send_if_modified(|state| {
            if state.is_open() {
                *state = ChannelState::Closing;
                true
            } else {
                false
            }
        });
    }

    /// Move `generation` to `Closed` and drop its pending acks.
    ///
    /// Returns `true` only for the call that performed the transition.
    pub(crate) fn mark_closed(&self, generation: u64) -> bool {
        if generation != self.current_generation() {
            return false;
        }

        let transitioned = self.state_tx.send_if_modified(|state| {
            if matches!(state, ChannelState::Closed) {
                false
            } else {
                *state = ChannelState::Closed;
                true
            }
        });

        if transitioned {
            self.acks
                .retain(|_, pending| pending.generation != generation);
        }

        transitioned
    }
}

/// The session if it is still accepting frames, optionally pinned to a generation.
fn live(session: Option<&Session>, generation: Option<u64>) -> Option<&Session> {
    session.filter(|s| {
        !s.token.is_cancelled() && generation.is_none_or(|generation| generation == s.generation)
    })
}

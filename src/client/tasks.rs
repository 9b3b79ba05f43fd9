//! The three tasks that run for each connection: writer, reader and pinger.
//!
//! Every task watches the session's cancellation token and exits once it fires.
//! Any task that stops signals shutdown to its siblings, and the last one to stop
//! releases the connection.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use super::channel::{Channel, Opened};
use super::config::Config;
use super::methods::{DISCONNECTION, ERROR, Event, Methods};
use crate::error::{ProtocolError, SessionError};
use crate::protocol::{Frame, FrameType, Handshake};
use crate::transport::Connection;

const SESSION_TASKS: usize = 3;

/// Shared by the tasks of one connection.
#[derive(Clone)]
struct TaskContext {
    generation: u64,
    channel: Arc<Channel>,
    methods: Arc<Methods>,
    connection: Arc<dyn Connection>,
    token: CancellationToken,
    remaining: Arc<AtomicUsize>,
}

impl TaskContext {
    fn fail(&self, error: SessionError) {
        self.channel.fail(self.generation, error);
    }

    async fn finish(self) {
        self.channel.shutdown(Some(self.generation));

        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.connection.close().await;
            if self.channel.mark_closed(self.generation) {
                #[cfg(feature = "tracing")]
                tracing::debug!(generation = self.generation, "Session closed");
                self.methods
                    .dispatch_lifecycle(DISCONNECTION, self.channel.namespace());
            }
        }
    }
}

/// Spawn the writer, reader and pinger for a freshly opened connection.
pub(crate) fn spawn_session(
    opened: Opened,
    channel: Arc<Channel>,
    methods: Arc<Methods>,
    connection: Arc<dyn Connection>,
    config: &Config,
) -> Vec<JoinHandle<()>> {
    let Opened {
        generation,
        outgoing_rx,
        token,
    } = opened;

    let session = TaskContext {
        generation,
        channel,
        methods,
        connection,
        token,
        remaining: Arc::new(AtomicUsize::new(SESSION_TASKS)),
    };

    vec![
        tokio::spawn(out_loop(session.clone(), outgoing_rx)),
        tokio::spawn(in_loop(session.clone())),
        tokio::spawn(pinger(session, config.clone())),
    ]
}

/// Drain the outgoing queue onto the connection, one frame at a time.
async fn out_loop(session: TaskContext, mut outgoing_rx: mpsc::UnboundedReceiver<Frame>) {
    loop {
        let frame = tokio::select! {
            biased;

            () = session.token.cancelled() => break,
            frame = outgoing_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let text = frame.encode();
        #[cfg(feature = "tracing")]
        tracing::trace!(frame = %text, "Sending frame");

        let result = tokio::select! {
            biased;

            () = session.token.cancelled() => break,
            result = session.connection.write(text) => result,
        };

        if let Err(e) = result {
            session.fail(SessionError::Write(e.to_string()));
            break;
        }
    }

    session.finish().await;
}

/// Read frames until the connection ends, routing each one.
async fn in_loop(session: TaskContext) {
    loop {
        let read = tokio::select! {
            biased;

            () = session.token.cancelled() => break,
            read = session.connection.read() => read,
        };

        match read {
            Ok(Some(text)) => {
                if handle_frame(&session, &text).is_break() {
                    break;
                }
            }
            Ok(None) => {
                session.fail(SessionError::PeerClosed);
                break;
            }
            Err(e) => {
                session.fail(SessionError::Read(e.to_string()));
                break;
            }
        }
    }

    session.finish().await;
}

fn handle_frame(session: &TaskContext, text: &str) -> ControlFlow<()> {
    #[cfg(feature = "tracing")]
    tracing::trace!(frame = %text, "Received frame");

    let channel = &session.channel;
    let frame = match Frame::decode(text) {
        Ok(frame) => frame,
        Err(e) => {
            channel.record_anomaly(&e);
            return ControlFlow::Continue(());
        }
    };

    match frame.frame_type {
        FrameType::Pong => channel.record_pong(),
        FrameType::Ping => {
            let mut pong = Frame::pong();
            pong.payload = frame.payload.clone();
            _ = channel.enqueue_for(session.generation, pong);
        }
        FrameType::Open => match Handshake::from_frame(&frame) {
            Ok(handshake) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(sid = %handshake.sid, "Handshake received");
                channel.set_handshake(session.generation, handshake);
            }
            Err(e) => channel.record_anomaly(&e),
        },
        FrameType::Close => {
            session.fail(SessionError::PeerClosed);
            return ControlFlow::Break(());
        }
        FrameType::Upgrade | FrameType::Noop => {}
        _ if !frame.in_namespace(channel.namespace()) => {
            #[cfg(feature = "tracing")]
            tracing::trace!(
                namespace = frame.namespace_or_default(),
                "Ignoring frame for another namespace"
            );
        }
        FrameType::Connect => {
            #[cfg(feature = "tracing")]
            tracing::debug!(namespace = channel.namespace(), "Namespace joined");
        }
        FrameType::Disconnect => {
            session.fail(SessionError::PeerClosed);
            return ControlFlow::Break(());
        }
        FrameType::Event => dispatch_event(session, &frame),
        FrameType::Ack => {
            let Some(id) = frame.ack_id else {
                return ControlFlow::Continue(());
            };
            match frame.ack_data() {
                Ok(data) => {
                    if !channel.resolve_ack(session.generation, id, data) {
                        channel.record_anomaly(&ProtocolError::UnmatchedAck(id));
                    }
                }
                Err(e) => channel.record_anomaly(&e),
            }
        }
        FrameType::Error => {
            let data = frame
                .json()
                .unwrap_or_else(|_| frame.payload.clone().map(Value::String).unwrap_or_default());
            let event = Event {
                data,
                ..Event::lifecycle(ERROR, channel.namespace())
            };
            session.methods.dispatch(event, |_| {});
        }
    }

    ControlFlow::Continue(())
}

fn dispatch_event(session: &TaskContext, frame: &Frame) {
    let (name, data) = match frame.event_parts() {
        Ok(parts) => parts,
        Err(e) => {
            session.channel.record_anomaly(&e);
            return;
        }
    };

    let event = Event {
        name,
        namespace: frame.namespace_or_default().to_owned(),
        data,
        ack_id: frame.ack_id,
    };

    let channel = Arc::clone(&session.channel);
    let generation = session.generation;
    let ack_id = frame.ack_id;
    session.methods.dispatch(event, move |response| {
        if let Some(id) = ack_id {
            let reply = Frame::ack(channel.namespace(), id, &response);
            _ = channel.enqueue_for(generation, reply);
        }
    });
}

/// Enqueue a ping every interval and fail the session when pongs stop arriving.
async fn pinger(session: TaskContext, config: Config) {
    let timeout = config.heartbeat_timeout();
    let mut ticker = interval(config.heartbeat_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;

            () = session.token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let elapsed = session.channel.since_last_pong();
        if elapsed >= timeout {
            #[cfg(feature = "tracing")]
            tracing::warn!(?elapsed, "Heartbeat timeout");
            session.fail(SessionError::HeartbeatTimeout { elapsed });
            break;
        }

        if session
            .channel
            .enqueue_for(session.generation, Frame::ping())
            .is_err()
        {
            break;
        }
    }

    session.finish().await;
}

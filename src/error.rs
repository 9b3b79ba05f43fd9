#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::backtrace::Backtrace;
use std::error::Error as StdError;
use std::fmt;
use std::time::Duration;

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// The transport could not establish a connection, or the namespace handshake failed
    Connect,
    /// A running session ended (write/read failure, peer close, heartbeat timeout)
    Session,
    /// A frame could not be decoded or did not make sense in context
    Protocol,
    /// An acknowledgement was not delivered
    Ack,
    /// Error related to invalid input or client configuration
    Validation,
    /// Internal error from dependencies
    Internal,
    /// Error from the WebSocket transport
    WebSocket,
}

#[derive(Debug)]
pub struct Error {
    kind: Kind,
    source: Option<Box<dyn StdError + Send + Sync + 'static>>,
    backtrace: Backtrace,
}

impl Error {
    pub fn with_source<S: StdError + Send + Sync + 'static>(kind: Kind, source: S) -> Self {
        Self {
            kind,
            source: Some(Box::new(source)),
            backtrace: Backtrace::capture(),
        }
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    pub fn inner(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.source.as_deref()
    }

    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        let e = self.source.as_deref()?;
        e.downcast_ref::<E>()
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Validation {
            reason: message.into(),
        }
        .into()
    }

    /// Wraps a transport failure that happened while establishing a connection.
    pub fn connect<S: StdError + Send + Sync + 'static>(source: S) -> Self {
        Self::with_source(Kind::Connect, source)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(src) => write!(f, "{:?}: {}", self.kind, src),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}

/// Reasons a running session was torn down.
///
/// These never travel up a call stack: the session tasks run detached, so the
/// value is recorded on the channel and exposed through `Client::last_error`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Writing a frame to the connection failed
    Write(String),
    /// Reading from the connection failed
    Read(String),
    /// The peer closed the connection (or sent a close/disconnect frame)
    PeerClosed,
    /// No pong was observed within the configured window
    HeartbeatTimeout {
        /// Time since the last pong (or since the session opened)
        elapsed: Duration,
    },
    /// The channel is closing or closed and accepts no more frames
    ChannelClosed,
}

impl SessionError {
    /// Whether this is a liveness failure rather than a hard I/O error.
    #[must_use]
    pub const fn is_heartbeat(&self) -> bool {
        matches!(self, Self::HeartbeatTimeout { .. })
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write(e) => write!(f, "failed to write frame: {e}"),
            Self::Read(e) => write!(f, "failed to read frame: {e}"),
            Self::PeerClosed => write!(f, "connection closed by peer"),
            Self::HeartbeatTimeout { elapsed } => {
                write!(f, "heartbeat timeout: no pong for {elapsed:?}")
            }
            Self::ChannelClosed => write!(f, "channel is closed"),
        }
    }
}

impl StdError for SessionError {}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        Error::with_source(Kind::Session, err)
    }
}

/// Malformed or unexpected frames. Never fatal to a session.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame was empty
    Empty,
    /// The leading type digit is not a known packet type
    UnknownType(char),
    /// Binary attachments are not supported over a text transport
    Unsupported(&'static str),
    /// The frame structure or payload could not be parsed
    Malformed(String),
    /// An ack frame referenced an id with no pending waiter
    UnmatchedAck(u64),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty frame"),
            Self::UnknownType(c) => write!(f, "unknown packet type {c:?}"),
            Self::Unsupported(what) => write!(f, "unsupported packet: {what}"),
            Self::Malformed(reason) => write!(f, "malformed frame: {reason}"),
            Self::UnmatchedAck(id) => write!(f, "ack {id} has no pending waiter"),
        }
    }
}

impl StdError for ProtocolError {}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::with_source(Kind::Protocol, err)
    }
}

#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckError {
    /// No ack arrived within the allotted time
    Timeout(Duration),
    /// The connection was replaced or closed while waiting
    Cancelled,
}

impl fmt::Display for AckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout(after) => write!(f, "no ack received within {after:?}"),
            Self::Cancelled => write!(f, "ack cancelled: connection was replaced or closed"),
        }
    }
}

impl StdError for AckError {}

impl From<AckError> for Error {
    fn from(err: AckError) -> Self {
        Error::with_source(Kind::Ack, err)
    }
}

/// Every reconnection attempt failed.
#[non_exhaustive]
#[derive(Debug)]
pub struct ReconnectExhausted {
    pub attempts: u32,
    pub last: Error,
}

impl fmt::Display for ReconnectExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "reconnect failed after {} attempt(s): {}",
            self.attempts, self.last
        )
    }
}

impl StdError for ReconnectExhausted {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(&self.last)
    }
}

impl From<ReconnectExhausted> for Error {
    fn from(err: ReconnectExhausted) -> Self {
        Error::with_source(Kind::Connect, err)
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct Validation {
    pub reason: String,
}

impl fmt::Display for Validation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid: {}", self.reason)
    }
}

impl StdError for Validation {}

impl From<Validation> for Error {
    fn from(err: Validation) -> Self {
        Error::with_source(Kind::Validation, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::with_source(Kind::Internal, e)
    }
}

impl From<url::ParseError> for Error {
    fn from(e: url::ParseError) -> Self {
        Error::with_source(Kind::Validation, e)
    }
}

#![expect(
    clippy::module_name_repetitions,
    reason = "Frame types expose their domain in the name for clarity"
)]

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

use crate::error::ProtocolError;

/// Engine.IO envelope digit for a Socket.IO message.
const MESSAGE_DIGIT: char = '4';

/// Frame type, covering both the Engine.IO envelope and the Socket.IO layer.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "snake_case")]
pub enum FrameType {
    /// Engine.IO handshake sent by the server right after the transport opens
    Open,
    /// Engine.IO close
    Close,
    /// Engine.IO ping
    Ping,
    /// Engine.IO pong
    Pong,
    /// Engine.IO upgrade
    Upgrade,
    /// Engine.IO noop
    Noop,
    /// Socket.IO namespace open
    Connect,
    /// Socket.IO namespace close
    Disconnect,
    /// Socket.IO event (data message)
    Event,
    /// Socket.IO acknowledgement
    Ack,
    /// Socket.IO error
    Error,
}

impl FrameType {
    /// Wire prefix written for this frame type.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Open => "0",
            Self::Close => "1",
            Self::Ping => "2",
            Self::Pong => "3",
            Self::Upgrade => "5",
            Self::Noop => "6",
            Self::Connect => "40",
            Self::Disconnect => "41",
            Self::Event => "42",
            Self::Ack => "43",
            Self::Error => "44",
        }
    }

    /// Whether this type is carried inside an Engine.IO message envelope.
    #[must_use]
    pub const fn is_message(self) -> bool {
        matches!(
            self,
            Self::Connect | Self::Disconnect | Self::Event | Self::Ack | Self::Error
        )
    }

    const fn carries_ack_id(self) -> bool {
        matches!(self, Self::Event | Self::Ack)
    }

    fn from_engine_digit(digit: char) -> Result<Option<Self>, ProtocolError> {
        Ok(Some(match digit {
            '0' => Self::Open,
            '1' => Self::Close,
            '2' => Self::Ping,
            '3' => Self::Pong,
            MESSAGE_DIGIT => return Ok(None),
            '5' => Self::Upgrade,
            '6' => Self::Noop,
            other => return Err(ProtocolError::UnknownType(other)),
        }))
    }

    fn from_socket_digit(digit: char) -> Result<Self, ProtocolError> {
        match digit {
            '0' => Ok(Self::Connect),
            '1' => Ok(Self::Disconnect),
            '2' => Ok(Self::Event),
            '3' => Ok(Self::Ack),
            '4' => Ok(Self::Error),
            '5' | '6' => Err(ProtocolError::Unsupported("binary attachments")),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

/// `""` and `"/"` both name the default namespace, which data frames never write.
#[must_use]
pub fn is_default_namespace(nsp: &str) -> bool {
    nsp.is_empty() || nsp == "/"
}

/// One discrete protocol message.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: FrameType,
    /// Namespace for Socket.IO frames; `None` means the default namespace.
    pub namespace: Option<String>,
    pub ack_id: Option<u64>,
    /// Raw payload text: JSON for Socket.IO frames, opaque for Engine.IO frames.
    pub payload: Option<String>,
}

impl Frame {
    #[must_use]
    pub fn new(frame_type: FrameType) -> Self {
        Self {
            frame_type,
            namespace: None,
            ack_id: None,
            payload: None,
        }
    }

    #[must_use]
    pub fn ping() -> Self {
        Self::new(FrameType::Ping)
    }

    #[must_use]
    pub fn pong() -> Self {
        Self::new(FrameType::Pong)
    }

    /// Namespace-open frame, `40<nsp>`. Unlike other frames the namespace is written
    /// verbatim, so `/` is sent as `40/`.
    #[must_use]
    pub fn connect(nsp: &str) -> Self {
        Self {
            namespace: (!nsp.is_empty()).then(|| nsp.to_owned()),
            ..Self::new(FrameType::Connect)
        }
    }

    #[must_use]
    pub fn disconnect(nsp: &str) -> Self {
        Self::new(FrameType::Disconnect).with_namespace(nsp)
    }

    /// Data frame with payload `[event, data]`, or `[event]` when `data` is null.
    #[must_use]
    pub fn event(nsp: &str, event: &str, data: &Value, ack_id: Option<u64>) -> Self {
        let mut items = vec![Value::String(event.to_owned())];
        if !data.is_null() {
            items.push(data.clone());
        }

        Self {
            ack_id,
            payload: Some(Value::Array(items).to_string()),
            ..Self::new(FrameType::Event).with_namespace(nsp)
        }
    }

    /// Acknowledgement response carrying `[data]`.
    #[must_use]
    pub fn ack(nsp: &str, ack_id: u64, data: &Value) -> Self {
        let items = if data.is_null() {
            Vec::new()
        } else {
            vec![data.clone()]
        };

        Self {
            ack_id: Some(ack_id),
            payload: Some(Value::Array(items).to_string()),
            ..Self::new(FrameType::Ack).with_namespace(nsp)
        }
    }

    #[must_use]
    pub fn with_namespace(mut self, nsp: &str) -> Self {
        self.namespace = (!is_default_namespace(nsp)).then(|| nsp.to_owned());
        self
    }

    /// Namespace this frame belongs to, `/` for the default one.
    #[must_use]
    pub fn namespace_or_default(&self) -> &str {
        self.namespace.as_deref().unwrap_or("/")
    }

    /// Whether this frame is addressed to `nsp`.
    #[must_use]
    pub fn in_namespace(&self, nsp: &str) -> bool {
        match &self.namespace {
            Some(own) => own == nsp,
            None => is_default_namespace(nsp),
        }
    }

    #[must_use]
    pub fn encode(&self) -> String {
        let payload = self.payload.as_deref().unwrap_or_default();
        let mut out = String::with_capacity(payload.len() + 16);
        out.push_str(self.frame_type.prefix());

        if self.frame_type.is_message() {
            if let Some(nsp) = &self.namespace {
                out.push_str(nsp);
                if self.ack_id.is_some() || !payload.is_empty() {
                    out.push(',');
                }
            }
            if let Some(id) = self.ack_id {
                out.push_str(&id.to_string());
            }
        }

        out.push_str(payload);
        out
    }

    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let mut chars = text.chars();
        let engine = chars.next().ok_or(ProtocolError::Empty)?;

        if let Some(frame_type) = FrameType::from_engine_digit(engine)? {
            // Engine.IO frames: everything after the digit is opaque payload.
            let payload = chars.as_str();
            return Ok(Self {
                payload: (!payload.is_empty()).then(|| payload.to_owned()),
                ..Self::new(frame_type)
            });
        }

        let socket_digit = chars.next().ok_or_else(|| {
            ProtocolError::Malformed("message without socket type".to_owned())
        })?;
        let frame_type = FrameType::from_socket_digit(socket_digit)?;
        let mut rest = chars.as_str();

        let mut namespace = None;
        if rest.starts_with('/') {
            let (nsp, tail) = rest.split_once(',').unwrap_or((rest, ""));
            namespace = Some(nsp.to_owned()).filter(|n| !is_default_namespace(n));
            rest = tail;
        }

        let mut ack_id = None;
        if frame_type.carries_ack_id() {
            let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
            if digits > 0 {
                let (id, tail) = rest.split_at(digits);
                ack_id = Some(
                    id.parse::<u64>()
                        .map_err(|e| ProtocolError::Malformed(format!("ack id {id}: {e}")))?,
                );
                rest = tail;
            }
        }

        if frame_type == FrameType::Ack && ack_id.is_none() {
            return Err(ProtocolError::Malformed("ack without id".to_owned()));
        }

        Ok(Self {
            frame_type,
            namespace,
            ack_id,
            payload: (!rest.is_empty()).then(|| rest.to_owned()),
        })
    }

    /// Parses the payload as JSON, `Null` when absent.
    pub fn json(&self) -> Result<Value, ProtocolError> {
        match self.payload.as_deref() {
            None => Ok(Value::Null),
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| ProtocolError::Malformed(format!("payload is not JSON: {e}"))),
        }
    }

    /// Splits an event payload into its name and data.
    ///
    /// A single argument is returned as-is, none as `Null`, several as an array.
    pub fn event_parts(&self) -> Result<(String, Value), ProtocolError> {
        let Value::Array(mut items) = self.json()? else {
            return Err(ProtocolError::Malformed(
                "event payload is not an array".to_owned(),
            ));
        };
        if items.is_empty() {
            return Err(ProtocolError::Malformed("event without a name".to_owned()));
        }
        let Value::String(name) = items.remove(0) else {
            return Err(ProtocolError::Malformed(
                "event name is not a string".to_owned(),
            ));
        };

        Ok((name, collapse_args(items)))
    }

    pub fn event_name(&self) -> Result<String, ProtocolError> {
        self.event_parts().map(|(name, _)| name)
    }

    pub fn event_data(&self) -> Result<Value, ProtocolError> {
        self.event_parts().map(|(_, data)| data)
    }

    /// Data carried by an ack frame, collapsed the same way as event arguments.
    pub fn ack_data(&self) -> Result<Value, ProtocolError> {
        match self.json()? {
            Value::Array(items) => Ok(collapse_args(items)),
            Value::Null => Ok(Value::Null),
            other => Ok(other),
        }
    }
}

fn collapse_args(mut items: Vec<Value>) -> Value {
    match items.len() {
        0 => Value::Null,
        1 => items.pop().unwrap_or_default(),
        _ => Value::Array(items),
    }
}

/// Engine.IO handshake (`0{...}`) announced by the server on open.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds
    pub ping_interval: u64,
    /// Milliseconds
    pub ping_timeout: u64,
}

impl Handshake {
    pub fn from_frame(frame: &Frame) -> Result<Self, ProtocolError> {
        let raw = frame
            .payload
            .as_deref()
            .ok_or_else(|| ProtocolError::Malformed("open frame without handshake".to_owned()))?;
        serde_json::from_str(raw)
            .map_err(|e| ProtocolError::Malformed(format!("handshake: {e}")))
    }

    #[must_use]
    pub const fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval)
    }

    #[must_use]
    pub const fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout)
    }
}

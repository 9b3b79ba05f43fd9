//! Socket.IO / Engine.IO text framing.
//!
//! A frame on the wire is a single text message:
//!
//! ```text
//! <engine digit>[<socket digit>][<namespace>[,]][<ack id>]<payload>
//! ```
//!
//! Engine.IO digits carry the envelope (`0` open, `1` close, `2` ping, `3` pong,
//! `4` message, `5` upgrade, `6` noop). A message (`4`) is followed by the Socket.IO
//! digit (`0` connect, `1` disconnect, `2` event, `3` ack, `4` error). So joining the
//! `/chat` namespace is the literal text `40/chat`, and an event on the default
//! namespace is `42["name",{"some":"data"}]`.

pub mod frame;

pub use frame::{Frame, FrameType, Handshake, is_default_namespace};

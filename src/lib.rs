#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod client;
pub mod error;
pub mod protocol;
pub mod transport;

use std::net::Ipv6Addr;

pub use client::{Client, Config, DialParams, ReconnectConfig};

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Engine.IO protocol revision requested in the connection URL.
pub const ENGINE_IO_VERSION: u8 = 3;

/// Path the Socket.IO server is mounted on by default.
pub const DEFAULT_PATH: &str = "/socket.io/";

/// Build the websocket URL for a Socket.IO server.
///
/// Produces `ws://<host>:<port>/socket.io/?EIO=3&transport=websocket`, or `wss://`
/// when `secure` is set. IPv6 literals are bracketed.
///
/// ```
/// use socketio_client::websocket_url;
///
/// assert_eq!(
///     websocket_url("localhost", 3000, false),
///     "ws://localhost:3000/socket.io/?EIO=3&transport=websocket"
/// );
/// ```
#[must_use]
pub fn websocket_url(host: &str, port: u16, secure: bool) -> String {
    let scheme = if secure { "wss" } else { "ws" };
    let host = if host.parse::<Ipv6Addr>().is_ok() {
        format!("[{host}]")
    } else {
        host.to_owned()
    };

    format!("{scheme}://{host}:{port}{DEFAULT_PATH}?EIO={ENGINE_IO_VERSION}&transport=websocket")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_secure_uses_wss() {
        assert_eq!(
            websocket_url("example.com", 443, true),
            "wss://example.com:443/socket.io/?EIO=3&transport=websocket"
        );
    }

    #[test]
    fn websocket_url_brackets_ipv6() {
        assert_eq!(
            websocket_url("::1", 8080, false),
            "ws://[::1]:8080/socket.io/?EIO=3&transport=websocket"
        );
        assert_eq!(
            websocket_url("127.0.0.1", 8080, false),
            "ws://127.0.0.1:8080/socket.io/?EIO=3&transport=websocket"
        );
    }

    #[test]
    fn websocket_url_is_parseable() {
        let url = url::Url::parse(&websocket_url("localhost", 1, false)).unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.path(), DEFAULT_PATH);
        assert_eq!(url.query(), Some("EIO=3&transport=websocket"));
    }
}

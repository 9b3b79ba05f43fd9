//! Connection primitives the session engine runs on.
//!
//! The engine only needs to open a connection from a URL and exchange raw text
//! frames over it. [`Connection`] methods take `&self` so the reader and writer
//! tasks can use the same handle concurrently.

#[cfg(feature = "websocket")]
pub mod websocket;

use async_trait::async_trait;

use crate::Result;

#[cfg(feature = "websocket")]
pub use websocket::WebsocketTransport;

/// Opens connections. Implementations are shared across reconnects.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>>;
}

/// A live transport-level session handle.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Write one text frame.
    async fn write(&self, text: String) -> Result<()>;

    /// Read the next text frame. `Ok(None)` means the peer closed the connection.
    async fn read(&self) -> Result<Option<String>>;

    /// Close the connection. Must be safe to call more than once.
    async fn close(&self);
}

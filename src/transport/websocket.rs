#![expect(
    clippy::module_name_repetitions,
    reason = "Transport types are named after the protocol they speak"
)]

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Connection, Transport};
use crate::Result;
use crate::error::{Error, Kind};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Transport`] over tokio-tungstenite.
#[derive(Debug, Clone)]
pub struct WebsocketTransport {
    connect_timeout: Duration,
}

impl Default for WebsocketTransport {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl WebsocketTransport {
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Transport for WebsocketTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>> {
        let (ws_stream, _) = timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(Error::connect)?
            .map_err(Error::connect)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(%url, "WebSocket connection established");

        let (sink, stream) = ws_stream.split();
        Ok(Box::new(WebsocketConnection {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        }))
    }
}

/// Split halves each behind their own lock so a blocked read never holds up a write.
struct WebsocketConnection {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

#[async_trait]
impl Connection for WebsocketConnection {
    async fn write(&self, text: String) -> Result<()> {
        self.sink
            .lock()
            .await
            .send(Message::Text(text.into()))
            .await?;
        Ok(())
    }

    async fn read(&self) -> Result<Option<String>> {
        let mut stream = self.stream.lock().await;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) => {
                    return Ok(None);
                }
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(_)) => {
                    // Control and binary frames are handled by tungstenite or ignored.
                }
            }
        }
    }

    async fn close(&self) {
        _ = self.sink.lock().await.close().await;
    }
}

impl From<tungstenite::Error> for Error {
    fn from(e: tungstenite::Error) -> Self {
        Error::with_source(Kind::WebSocket, e)
    }
}

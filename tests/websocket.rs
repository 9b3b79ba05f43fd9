#![cfg(feature = "websocket")]
#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

mod common;

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::json;
use socketio_client::client::{Client, DialParams};
use socketio_client::error::{Kind, SessionError};
use socketio_client::transport::{Transport as _, WebsocketTransport};
use socketio_client::websocket_url;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use crate::common::{WAIT, wait_closed};

const HANDSHAKE: &str =
    r#"0{"sid":"mock-sid","upgrades":[],"pingInterval":25000,"pingTimeout":5000}"#;

#[derive(Debug, Clone)]
enum Command {
    Send(String),
    Close,
}

/// Mock Socket.IO server speaking the websocket transport.
struct MockWsServer {
    addr: SocketAddr,
    /// Commands fanned out to ALL connected clients
    command_tx: broadcast::Sender<Command>,
    /// Text frames received from clients
    received_rx: mpsc::UnboundedReceiver<String>,
}

impl MockWsServer {
    /// Start a mock server on a random port. Each connection is greeted with the
    /// Engine.IO handshake and pings are answered with pongs.
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (command_tx, _) = broadcast::channel::<Command>(100);
        let (received_tx, received_rx) = mpsc::unbounded_channel::<String>();

        let broadcast_tx = command_tx.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let received_tx = received_tx.clone();
                let mut command_rx = broadcast_tx.subscribe();

                tokio::spawn(async move {
                    if write.send(Message::Text(HANDSHAKE.into())).await.is_err() {
                        return;
                    }

                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) if text.as_str() == "2" => {
                                        if write.send(Message::Text("3".into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Some(Ok(Message::Text(text))) => {
                                        drop(received_tx.send(text.as_str().to_owned()));
                                    }
                                    Some(Ok(_)) => {}
                                    _ => break,
                                }
                            }
                            command = command_rx.recv() => {
                                match command {
                                    Ok(Command::Send(text)) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Ok(Command::Close) | Err(_) => {
                                        drop(write.send(Message::Close(None)).await);
                                        break;
                                    }
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            command_tx,
            received_rx,
        }
    }

    fn url(&self) -> String {
        websocket_url(&self.addr.ip().to_string(), self.addr.port(), false)
    }

    fn send(&self, text: &str) {
        drop(self.command_tx.send(Command::Send(text.to_owned())));
    }

    fn close_all(&self) {
        drop(self.command_tx.send(Command::Close));
    }

    async fn recv(&mut self) -> Option<String> {
        timeout(WAIT, self.received_rx.recv()).await.ok().flatten()
    }
}

#[tokio::test]
async fn namespace_open_precedes_events_over_websocket() {
    let mut server = MockWsServer::start().await;
    let client = Client::dial(
        &server.url(),
        WebsocketTransport::default(),
        DialParams::with_nsp("/chat"),
    )
    .await
    .unwrap();

    client.emit("message", &json!({"text": "hello"})).unwrap();

    assert_eq!(server.recv().await.as_deref(), Some("40/chat"));
    assert_eq!(
        server.recv().await.as_deref(),
        Some(r#"42/chat,["message",{"text":"hello"}]"#)
    );

    client.close().await;
}

#[tokio::test]
async fn server_frames_reach_handlers_over_websocket() {
    let server = MockWsServer::start().await;
    let client = Client::dial(&server.url(), WebsocketTransport::default(), DialParams::default())
        .await
        .unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    client.on("news", move |data| drop(tx.send(data)));

    // Make sure the handler is registered before the server pushes.
    tokio::time::sleep(Duration::from_millis(20)).await;
    server.send(r#"42["news",{"headline":"rust"}]"#);

    let data = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(data, json!({"headline": "rust"}));
    assert_eq!(client.handshake().unwrap().sid, "mock-sid");

    client.close().await;
}

#[tokio::test]
async fn server_close_ends_session() {
    let server = MockWsServer::start().await;
    let client = Client::dial(&server.url(), WebsocketTransport::default(), DialParams::default())
        .await
        .unwrap();

    server.close_all();
    wait_closed(&client).await;

    assert_eq!(client.last_error(), Some(SessionError::PeerClosed));
    assert!(client.emit("late", &1).is_err());
}

#[tokio::test]
async fn connect_to_closed_port_is_a_connect_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = websocket_url("127.0.0.1", addr.port(), false);
    let Err(err) = WebsocketTransport::new(Duration::from_secs(2))
        .connect(&url)
        .await
    else {
        panic!("connecting to a closed port should fail");
    };

    assert_eq!(err.kind(), Kind::Connect);
}

//! Chat client against a Socket.IO server.
//!
//! Joins the `/chat` namespace, prints every incoming `message`, answers `ping`
//! acknowledgements, and sends a few messages of its own. Reconnects on its own
//! when the connection drops.
//!
//! Run with tracing enabled:
//! ```sh
//! RUST_LOG=info cargo run --example chat --features tracing -- localhost 3000
//! ```

use std::time::Duration;

use serde_json::json;
use socketio_client::client::{CONNECTION, Client, Config, DISCONNECTION, DialParams};
use socketio_client::transport::WebsocketTransport;
use socketio_client::websocket_url;
use tokio::time::timeout;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let host = args.next().unwrap_or_else(|| "localhost".to_owned());
    let port = args.next().map_or(Ok(3000), |p| p.parse::<u16>())?;

    let mut config = Config::default();
    config.auto_reconnect = true;

    let url = websocket_url(&host, port, false);
    let client = Client::dial_with_config(
        &url,
        WebsocketTransport::default(),
        DialParams::builder().nsp("/chat").build(),
        config,
    )
    .await?;
    info!(%url, namespace = client.namespace(), "Connected");

    client.on("message", |data| info!(event = "message", %data));
    client.on_ack("ping", |data| json!({ "pong": data }));
    client.on(CONNECTION, |_| info!("Reconnected"));
    client.on(DISCONNECTION, |_| warn!("Disconnected"));

    for i in 0..3 {
        client.emit("message", &json!({ "text": format!("hello #{i}") }))?;
    }

    match client
        .emit_with_ack_timeout("history", &json!({ "limit": 10 }), Duration::from_secs(5))
        .await
    {
        Ok(history) => info!(%history, "History"),
        Err(e) => warn!(error = %e, "No history"),
    }

    let mut events = client.subscribe();
    while let Ok(Ok(event)) = timeout(Duration::from_secs(30), events.recv()).await {
        info!(name = %event.name, data = %event.data, state = ?client.state(), "Event");
    }

    if let Some(error) = client.last_error() {
        warn!(%error, "Last session error");
    }
    client.close().await;

    Ok(())
}

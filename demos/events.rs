//! Events - watch cluster events and answer queries.
//!
//! This example demonstrates:
//! - Subscribing with `client.stream_events()`
//! - Replying to queries with `client.respond()`
//! - Firing a user event with `client.user_event()`
//!
//! # Running
//!
//! ```sh
//! cargo run --example events
//! # in another shell
//! serf event hello world
//! serf query ping
//! ```

use std::sync::Arc;

use serf_rpc::{Client, EventRecord};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

fn event_json(event: &EventRecord) -> serde_json::Value {
    let payload = event
        .payload
        .as_ref()
        .map(|p| String::from_utf8_lossy(p).into_owned());
    serde_json::json!({
        "event": event.event,
        "name": event.name,
        "ltime": event.ltime,
        "payload": payload,
        "members": event.members.iter().map(|m| &m.name).collect::<Vec<_>>(),
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let addr = std::env::var("SERF_RPC_ADDR").unwrap_or_else(|_| "127.0.0.1:7373".to_string());
    let client = Arc::new(Client::connect(addr.as_str()).await?);

    let (tx, mut rx) = mpsc::channel(64);
    let handle = client.stream_events("*", tx).await?;

    client.user_event("events-demo", b"started", false).await?;

    while let Some(event) = rx.recv().await {
        println!("{}", event_json(&event));

        if event.event == "query" && event.name == "ping" {
            let client = client.clone();
            tokio::spawn(async move {
                if let Err(e) = client.respond(event.id, b"pong").await {
                    tracing::warn!("failed to respond to query {}: {}", event.id, e);
                }
            });
        }
    }

    // The channel only closes on shutdown.
    eprintln!("stream {} ended", handle.seq());
    Ok(())
}

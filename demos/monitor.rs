//! Monitor - tail an agent's log.
//!
//! This example demonstrates:
//! - Subscribing with `client.monitor()`
//! - Stopping a subscription with `client.stop()`
//! - Reading the dropped-record counter
//!
//! # Running
//!
//! ```sh
//! cargo run --example monitor -- debug
//! ```
//!
//! Stops after Ctrl-C.

use serf_rpc::{Client, LogLevel};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let level: LogLevel = std::env::args()
        .nth(1)
        .as_deref()
        .unwrap_or("info")
        .parse()?;

    let addr = std::env::var("SERF_RPC_ADDR").unwrap_or_else(|_| "127.0.0.1:7373".to_string());
    let client = Client::connect(addr.as_str()).await?;

    let (tx, mut rx) = mpsc::channel(256);
    let handle = client.monitor(level, tx).await?;
    eprintln!("monitoring at {} (seq {})", level, handle.seq());

    loop {
        tokio::select! {
            line = rx.recv() => match line {
                Some(line) => println!("{}", line.trim_end()),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    if !client.is_closed() {
        client.stop(handle).await?;
    }
    eprintln!("dropped {} lines", client.dropped_records());

    client.close().await?;
    Ok(())
}

//! Members - list the cluster as seen by one agent.
//!
//! This example demonstrates:
//! - Connecting with `Client::builder()`
//! - One-shot commands (`members`, `members_filtered`, `stats`)
//! - Printing results as JSON
//!
//! # Running
//!
//! ```sh
//! SERF_RPC_ADDR=127.0.0.1:7373 RUST_LOG=serf_rpc=debug \
//!     cargo run --example members -- role=web
//! ```
//!
//! Each `key=regex` argument becomes a tag filter.

use std::collections::HashMap;

use serf_rpc::{Client, Member};
use tracing_subscriber::EnvFilter;

fn member_json(member: &Member) -> serde_json::Value {
    serde_json::json!({
        "name": member.name,
        "addr": member.ip().map(|ip| ip.to_string()),
        "port": member.port,
        "status": member.status,
        "tags": member.tags,
        "protocol": [member.protocol_min, member.protocol_cur, member.protocol_max],
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let addr = std::env::var("SERF_RPC_ADDR").unwrap_or_else(|_| "127.0.0.1:7373".to_string());
    let mut builder = Client::builder();
    if let Ok(key) = std::env::var("SERF_RPC_AUTH") {
        builder = builder.auth_key(key);
    }
    let client = builder.connect(addr.as_str()).await?;

    let filters: HashMap<String, String> = std::env::args()
        .skip(1)
        .filter_map(|arg| {
            let (k, v) = arg.split_once('=')?;
            Some((k.to_string(), v.to_string()))
        })
        .collect();

    let members = if filters.is_empty() {
        client.members().await?
    } else {
        client.members_filtered(&filters, "").await?
    };

    let listing: Vec<_> = members.iter().map(member_json).collect();
    println!("{}", serde_json::to_string_pretty(&listing)?);

    let stats = client.stats().await?;
    if let Some(agent) = stats.get("agent") {
        println!("agent: {}", serde_json::to_string(agent)?);
    }

    client.close().await?;
    Ok(())
}

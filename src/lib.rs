//! # serf-rpc-client
//!
//! Async Rust client for the Serf agent RPC protocol.
//!
//! One TCP connection to an agent's RPC address carries every request. Each
//! request is tagged with a sequence number and responses are routed back to
//! whoever is waiting on that number, so any number of calls can be in flight
//! from any number of tasks at once.
//!
//! ## Architecture
//!
//! - **Wire format**: MsgPack records written back to back; a header record
//!   (`Command`/`Seq` out, `Seq`/`Error` back) optionally followed by a body
//! - **Listener task**: sole reader of the socket; routes each response to a
//!   registered handler by seq
//! - **Calls**: one response, then done
//! - **Subscriptions** (`monitor`, `stream`): a setup response, then records
//!   pushed into a caller-supplied bounded channel until stopped
//!
//! ## Example
//!
//! ```ignore
//! use serf_rpc::Client;
//!
//! #[tokio::main]
//! async fn main() -> serf_rpc::Result<()> {
//!     let client = Client::connect("127.0.0.1:7373").await?;
//!
//!     let joined = client.join(&["10.0.0.2:7946"], false).await?;
//!     println!("joined {} nodes", joined);
//!
//!     client.user_event("deploy", b"v42", true).await?;
//!     client.close().await
//! }
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod transport;

mod client;
mod handler;
mod writer;

pub use client::{Client, ClientBuilder, StreamHandle};
pub use error::{ClientError, Result};
pub use protocol::{EventRecord, LogLevel, LogRecord, Member, Stats};

//! TCP dialing for the agent's RPC address.
//!
//! # Example
//!
//! ```ignore
//! use serf_rpc::transport::dial;
//!
//! let stream = dial("127.0.0.1:7373").await?;
//! let (reader, writer) = stream.into_split();
//! ```

use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::Result;

/// Connect to the agent.
///
/// Nagle is disabled: requests are small and every one is flushed as soon
/// as it is written.
pub async fn dial<A: ToSocketAddrs>(addr: A) -> Result<TcpStream> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;

    if let Ok(peer) = stream.peer_addr() {
        tracing::debug!(%peer, "connected to agent");
    }
    Ok(stream)
}

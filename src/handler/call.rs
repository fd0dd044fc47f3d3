//! One-shot handler: exactly one response, then done.

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::AsyncRead;
use tokio::sync::oneshot;

use super::Outcome;
use crate::error::Result;
use crate::protocol::{RecordDecoder, ResponseHeader};

/// What the waiting caller receives: the raw body (if the command has one),
/// or the agent's error.
pub type CallResult = Result<Option<Bytes>>;

/// Handler for a single request/response exchange.
pub struct CallHandler {
    /// Whether a body record follows the response header.
    expects_body: bool,
    /// Completion signal; taken on first use.
    tx: Mutex<Option<oneshot::Sender<CallResult>>>,
}

impl CallHandler {
    /// Create a handler and the receiver its caller waits on.
    pub fn new(expects_body: bool) -> (Self, oneshot::Receiver<CallResult>) {
        let (tx, rx) = oneshot::channel();
        let handler = Self {
            expects_body,
            tx: Mutex::new(Some(tx)),
        };
        (handler, rx)
    }

    pub(crate) async fn handle<R>(
        &self,
        header: &ResponseHeader,
        decoder: &mut RecordDecoder<R>,
    ) -> Result<Outcome>
    where
        R: AsyncRead + Unpin,
    {
        // The body is on the wire whether or not anyone is still waiting.
        let body = if self.expects_body {
            Some(decoder.next_raw().await?)
        } else {
            None
        };

        let result = header.status().map(|()| body);
        let tx = self.tx.lock().take();
        match tx {
            Some(tx) => {
                if tx.send(result).is_err() {
                    tracing::trace!(seq = header.seq, "caller gone before response");
                }
            }
            None => tracing::debug!(seq = header.seq, "duplicate response for completed call"),
        }
        Ok(Outcome::Complete)
    }

    /// Drop the completion signal so a waiting caller wakes with a closed
    /// channel.
    pub(crate) fn cleanup(&self) {
        self.tx.lock().take();
    }
}

//! Streaming handler: a setup response followed by an open-ended sequence of
//! records, each pushed into a subscriber's bounded channel.
//!
//! # States
//!
//! ```text
//! AwaitingInit ──first response──► Streaming ──cleanup──► Closed
//!      │                                                    ▲
//!      └──────────────────────cleanup───────────────────────┘
//! ```
//!
//! The listener task must never wait on a subscriber, so delivery is a
//! `try_send`: a full channel drops the record with a warning.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, oneshot};

use super::Outcome;
use crate::codec::MsgPackCodec;
use crate::error::{ClientError, Result};
use crate::protocol::{RecordDecoder, ResponseHeader};

/// Result of handing one record to a subscriber.
#[derive(Debug)]
pub enum Delivery {
    /// Record queued on the subscriber's channel.
    Sent,
    /// Channel full; record dropped.
    Full,
    /// Receiver dropped; record discarded.
    Disconnected,
    /// Record did not decode into the subscriber's type.
    Undecodable(ClientError),
}

/// Destination for a subscription's records.
pub trait RecordSink: Send {
    /// Decode one raw record and try to queue it without waiting.
    fn deliver(&mut self, raw: &[u8]) -> Delivery;
}

/// Sink that decodes records as `R`, maps them to `T` and feeds an
/// `mpsc::Sender<T>`.
pub struct TypedSink<R, T> {
    tx: mpsc::Sender<T>,
    map: fn(R) -> T,
    _record: PhantomData<fn() -> R>,
}

impl<R, T> TypedSink<R, T>
where
    R: DeserializeOwned,
    T: Send + 'static,
{
    /// Create a sink that converts each decoded record with `map`.
    pub fn new(tx: mpsc::Sender<T>, map: fn(R) -> T) -> Self {
        Self {
            tx,
            map,
            _record: PhantomData,
        }
    }
}

impl<T> TypedSink<T, T>
where
    T: DeserializeOwned + Send + 'static,
{
    /// Create a sink that forwards records unchanged.
    pub fn passthrough(tx: mpsc::Sender<T>) -> Self {
        Self::new(tx, |record| record)
    }
}

impl<R, T> RecordSink for TypedSink<R, T>
where
    R: DeserializeOwned,
    T: Send + 'static,
{
    fn deliver(&mut self, raw: &[u8]) -> Delivery {
        let record: R = match MsgPackCodec::decode(raw) {
            Ok(record) => record,
            Err(e) => return Delivery::Undecodable(e),
        };

        match self.tx.try_send((self.map)(record)) {
            Ok(()) => Delivery::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Disconnected,
        }
    }
}

enum Phase {
    AwaitingInit(oneshot::Sender<Result<()>>),
    Streaming,
    Closed,
}

struct StreamState {
    phase: Phase,
    /// Dropped on cleanup, which closes the subscriber's channel.
    sink: Option<Box<dyn RecordSink>>,
}

/// Handler for a `monitor` or `stream` subscription.
pub struct StreamHandler {
    seq: u64,
    /// Command name, for logs.
    command: &'static str,
    state: Mutex<StreamState>,
    /// Client-wide count of records dropped on full channels.
    dropped: Arc<AtomicU64>,
}

impl StreamHandler {
    /// Create a handler and the receiver that yields the setup result.
    pub fn new(
        seq: u64,
        command: &'static str,
        sink: Box<dyn RecordSink>,
        dropped: Arc<AtomicU64>,
    ) -> (Self, oneshot::Receiver<Result<()>>) {
        let (init_tx, init_rx) = oneshot::channel();
        let handler = Self {
            seq,
            command,
            state: Mutex::new(StreamState {
                phase: Phase::AwaitingInit(init_tx),
                sink: Some(sink),
            }),
            dropped,
        };
        (handler, init_rx)
    }

    pub(crate) async fn handle<R>(
        &self,
        header: &ResponseHeader,
        decoder: &mut RecordDecoder<R>,
    ) -> Result<Outcome>
    where
        R: AsyncRead + Unpin,
    {
        {
            let mut state = self.state.lock();
            if matches!(state.phase, Phase::AwaitingInit(_)) {
                if let Phase::AwaitingInit(init) =
                    std::mem::replace(&mut state.phase, Phase::Streaming)
                {
                    let _ = init.send(header.status());
                }
                return Ok(Outcome::Continue);
            }
        }

        // Always consume the record so the stream stays aligned, even if
        // the subscription was closed while we were reading.
        let raw = decoder.next_raw().await?;

        let mut state = self.state.lock();
        let Some(sink) = state.sink.as_mut() else {
            tracing::trace!(seq = self.seq, "subscription closed; discarding record");
            return Ok(Outcome::Continue);
        };

        match sink.deliver(&raw) {
            Delivery::Sent => Ok(Outcome::Continue),
            Delivery::Full => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    seq = self.seq,
                    command = self.command,
                    "dropping record, subscriber channel full"
                );
                Ok(Outcome::Continue)
            }
            Delivery::Disconnected => {
                tracing::debug!(
                    seq = self.seq,
                    command = self.command,
                    "subscriber receiver dropped; discarding record"
                );
                Ok(Outcome::Continue)
            }
            Delivery::Undecodable(e) => {
                tracing::error!(
                    seq = self.seq,
                    command = self.command,
                    "failed to decode stream record: {}",
                    e
                );
                Ok(Outcome::Undeliverable)
            }
        }
    }

    /// Close the subscription. Idempotent.
    ///
    /// A caller still waiting for setup gets `StreamClosed`; the subscriber's
    /// channel is closed in every case.
    pub(crate) fn cleanup(&self) {
        let mut state = self.state.lock();
        if let Phase::AwaitingInit(init) = std::mem::replace(&mut state.phase, Phase::Closed) {
            let _ = init.send(Err(ClientError::StreamClosed));
        }
        state.sink = None;
    }

    #[cfg(test)]
    fn is_closed(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Closed)
    }
}

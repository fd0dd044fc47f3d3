//! Handler module - response routing targets.
//!
//! Provides:
//! - [`DispatchTable`] - maps in-flight seqs to handlers
//! - [`Handler`] - the two handler kinds the listener routes to:
//!   - [`CallHandler`] - one response, then done
//!   - [`StreamHandler`] - a setup response, then records until stopped
//!
//! Every handler supports the same two operations: `handle` (invoked by the
//! listener task with the response header and the shared decoder, so the
//! handler can read its own body record) and `cleanup` (invoked exactly once
//! when the handler leaves the table).

mod call;
mod registry;
mod stream;

use std::sync::Arc;

use tokio::io::AsyncRead;

use crate::error::Result;
use crate::protocol::{RecordDecoder, ResponseHeader};

pub use call::CallHandler;
pub use registry::DispatchTable;
pub use stream::{RecordSink, StreamHandler, TypedSink};

/// What the listener should do with a handler after `handle` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Terminal response delivered; remove the handler.
    Complete,
    /// Keep the handler registered.
    Continue,
    /// The subscriber cannot take this stream's records; remove and clean up.
    Undeliverable,
}

/// A registered handler.
#[derive(Clone)]
pub enum Handler {
    Call(Arc<CallHandler>),
    Stream(Arc<StreamHandler>),
}

impl Handler {
    pub fn call(handler: CallHandler) -> Self {
        Handler::Call(Arc::new(handler))
    }

    pub fn stream(handler: StreamHandler) -> Self {
        Handler::Stream(Arc::new(handler))
    }

    /// Process one response addressed to this handler.
    ///
    /// # Errors
    ///
    /// Only transport and framing errors; these are fatal for the connection.
    pub(crate) async fn handle<R>(
        &self,
        header: &ResponseHeader,
        decoder: &mut RecordDecoder<R>,
    ) -> Result<Outcome>
    where
        R: AsyncRead + Unpin,
    {
        match self {
            Handler::Call(h) => h.handle(header, decoder).await,
            Handler::Stream(h) => h.handle(header, decoder).await,
        }
    }

    /// Release whatever the handler's caller is waiting on.
    pub fn cleanup(&self) {
        match self {
            Handler::Call(h) => h.cleanup(),
            Handler::Stream(h) => h.cleanup(),
        }
    }
}

//! Serialized write path to the agent.
//!
//! Every request is a header record plus an optional body record. Frames are
//! encoded by the caller before the lock is taken; the lock only covers the
//! buffered write and flush, so two concurrent requests can never interleave
//! their records on the wire.
//!
//! # Architecture
//!
//! ```text
//! Caller 1 ─┐
//! Caller 2 ─┼─► encode ─► Mutex<BufWriter> ─► socket write half
//! Caller N ─┘
//! ```

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::Mutex;

use crate::codec::MsgPackCodec;
use crate::error::{ClientError, Result};
use crate::protocol::RequestHeader;

/// Boxed write half of the agent connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A request ready to be written: encoded header plus optional encoded body.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// Command name, kept for logging.
    command: String,
    /// Sequence number, kept for logging.
    seq: u64,
    header: Bytes,
    body: Option<Bytes>,
}

impl OutboundFrame {
    /// Encode a header-only frame.
    pub fn new(header: &RequestHeader) -> Result<Self> {
        Ok(Self {
            command: header.command.clone(),
            seq: header.seq,
            header: Bytes::from(MsgPackCodec::encode(header)?),
            body: None,
        })
    }

    /// Attach an encoded body record.
    pub fn with_body<B: Serialize>(mut self, body: &B) -> Result<Self> {
        self.body = Some(Bytes::from(MsgPackCodec::encode(body)?));
        Ok(self)
    }

    /// Sequence number of the request.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Total encoded size (header + body).
    #[inline]
    pub fn size(&self) -> usize {
        self.header.len() + self.body.as_ref().map_or(0, |b| b.len())
    }
}

/// Owner of the connection's write half.
pub struct FrameWriter {
    /// `None` once the transport has been closed.
    inner: Mutex<Option<BufWriter<BoxedWriter>>>,
}

impl FrameWriter {
    /// Wrap a write half in a buffered, serialized writer.
    pub fn new<W>(writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let boxed: BoxedWriter = Box::new(writer);
        Self {
            inner: Mutex::new(Some(BufWriter::new(boxed))),
        }
    }

    /// Write one frame and flush it.
    ///
    /// `is_closed` is checked while the write lock is held, so no frame goes
    /// out once shutdown has been observed.
    ///
    /// # Errors
    ///
    /// Returns `ClientClosed` after shutdown, or the I/O error from the socket.
    pub async fn send<F>(&self, frame: &OutboundFrame, is_closed: F) -> Result<()>
    where
        F: FnOnce() -> bool,
    {
        let mut guard = self.inner.lock().await;
        if is_closed() {
            return Err(ClientError::ClientClosed);
        }
        let writer = guard.as_mut().ok_or(ClientError::ClientClosed)?;

        writer.write_all(&frame.header).await?;
        if let Some(body) = &frame.body {
            writer.write_all(body).await?;
        }
        writer.flush().await?;

        tracing::trace!(
            command = %frame.command,
            seq = frame.seq,
            bytes = frame.size(),
            "request sent"
        );
        Ok(())
    }

    /// Flush and shut down the write half. Idempotent.
    pub async fn close(&self) -> Result<()> {
        let writer = self.inner.lock().await.take();
        match writer {
            Some(mut writer) => {
                writer.shutdown().await?;
                Ok(())
            }
            None => Ok(()),
        }
    }

    #[cfg(test)]
    async fn is_closed(&self) -> bool {
        self.inner.lock().await.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{commands, RecordDecoder, StopRequest};
    use serde::Deserialize;
    use tokio::io::duplex;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "PascalCase")]
    struct StopBody {
        stop: u64,
    }

    #[test]
    fn test_outbound_frame_sizes() {
        let header = RequestHeader::new(commands::LEAVE, 9);
        let frame = OutboundFrame::new(&header).unwrap();
        let header_len = frame.size();
        assert!(header_len > 0);
        assert_eq!(frame.seq(), 9);

        let frame = frame.with_body(&StopRequest { stop: 3 }).unwrap();
        assert!(frame.size() > header_len);
    }

    #[tokio::test]
    async fn test_send_writes_header_then_body() {
        let (client, server) = duplex(4096);
        let writer = FrameWriter::new(client);

        let frame = OutboundFrame::new(&RequestHeader::new(commands::STOP, 2))
            .unwrap()
            .with_body(&StopRequest { stop: 1 })
            .unwrap();
        writer.send(&frame, || false).await.unwrap();

        let mut decoder = RecordDecoder::new(server);
        let header: RequestHeader = decoder.next().await.unwrap();
        let body: StopBody = decoder.next().await.unwrap();

        assert_eq!(header, RequestHeader::new(commands::STOP, 2));
        assert_eq!(body, StopBody { stop: 1 });
    }

    #[tokio::test]
    async fn test_send_refused_when_closed_flag_set() {
        let (client, _server) = duplex(4096);
        let writer = FrameWriter::new(client);
        let frame = OutboundFrame::new(&RequestHeader::new(commands::LEAVE, 1)).unwrap();

        let result = writer.send(&frame, || true).await;
        assert!(matches!(result, Err(ClientError::ClientClosed)));
    }

    #[tokio::test]
    async fn test_send_after_close() {
        let (client, _server) = duplex(4096);
        let writer = FrameWriter::new(client);
        writer.close().await.unwrap();
        writer.close().await.unwrap();
        assert!(writer.is_closed().await);

        let frame = OutboundFrame::new(&RequestHeader::new(commands::LEAVE, 1)).unwrap();
        let result = writer.send(&frame, || false).await;
        assert!(matches!(result, Err(ClientError::ClientClosed)));
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let (client, server) = duplex(64 * 1024);
        let writer = std::sync::Arc::new(FrameWriter::new(client));

        let mut tasks = Vec::new();
        for seq in 1..=32u64 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                let frame = OutboundFrame::new(&RequestHeader::new(commands::STOP, seq))
                    .unwrap()
                    .with_body(&StopRequest { stop: seq * 100 })
                    .unwrap();
                writer.send(&frame, || false).await.unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let mut decoder = RecordDecoder::new(server);
        for _ in 0..32 {
            let header: RequestHeader = decoder.next().await.unwrap();
            let body: StopBody = decoder.next().await.unwrap();
            assert_eq!(body.stop, header.seq * 100);
        }
    }
}

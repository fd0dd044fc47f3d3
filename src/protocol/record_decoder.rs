//! Incremental decoder for the agent's response stream.
//!
//! The agent writes MsgPack values back to back with no framing. The decoder
//! accumulates socket reads in a `bytes::BytesMut` and hands out one complete
//! value at a time, leaving any following bytes buffered for the next call.
//!
//! Only the listener task owns a decoder, so headers and the bodies that
//! follow them are always read in wire order.

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::codec::{MsgPackCodec, ValueScanner};
use crate::error::{ClientError, Result};

/// Default read buffer capacity (64KB).
pub const DEFAULT_READ_BUFFER_CAPACITY: usize = 64 * 1024;

/// Default upper bound on a single record (64MB).
pub const DEFAULT_MAX_RECORD_SIZE: usize = 64 * 1024 * 1024;

/// Reads whole MsgPack records off an async byte stream.
pub struct RecordDecoder<R> {
    reader: R,
    /// Bytes read but not yet handed out.
    buffer: BytesMut,
    /// Progress through the record at the front of `buffer`.
    scanner: ValueScanner,
    /// Size of the next read reservation.
    read_chunk: usize,
    /// Largest record accepted before giving up on the stream.
    max_record_size: usize,
}

impl<R: AsyncRead + Unpin> RecordDecoder<R> {
    /// Create a decoder with default settings.
    pub fn new(reader: R) -> Self {
        Self::with_limits(reader, DEFAULT_READ_BUFFER_CAPACITY, DEFAULT_MAX_RECORD_SIZE)
    }

    /// Create a decoder with a custom buffer capacity and record size limit.
    pub fn with_limits(reader: R, capacity: usize, max_record_size: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            reader,
            buffer: BytesMut::with_capacity(capacity),
            scanner: ValueScanner::new(),
            read_chunk: capacity,
            max_record_size,
        }
    }

    /// Read the next record as raw MsgPack bytes.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` if the stream ends, even mid-record
    /// - `MsgPackDecode` if the bytes are not MsgPack
    /// - `Protocol` if a record grows past the size limit
    pub async fn next_raw(&mut self) -> Result<Bytes> {
        loop {
            if let Some(len) = self.scanner.scan(&self.buffer)? {
                return Ok(self.buffer.split_to(len).freeze());
            }

            if self.buffer.len() > self.max_record_size {
                return Err(ClientError::Protocol(format!(
                    "record exceeds {} bytes",
                    self.max_record_size
                )));
            }

            self.buffer.reserve(self.read_chunk);
            let n = self.reader.read_buf(&mut self.buffer).await?;
            if n == 0 {
                if !self.buffer.is_empty() {
                    tracing::debug!(
                        buffered = self.buffer.len(),
                        "connection closed mid-record"
                    );
                }
                return Err(ClientError::ConnectionClosed);
            }
        }
    }

    /// Read the next record and decode it into `T`.
    pub async fn next<T: DeserializeOwned>(&mut self) -> Result<T> {
        let raw = self.next_raw().await?;
        MsgPackCodec::decode(&raw)
    }

    /// Number of bytes buffered but not yet consumed.
    #[inline]
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{LogRecord, ResponseHeader};
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_header_then_body() {
        let header = ResponseHeader {
            seq: 4,
            error: String::new(),
        };
        let body = LogRecord {
            log: "[INFO] agent: started".to_string(),
        };
        let mut bytes = MsgPackCodec::encode(&header).unwrap();
        bytes.extend(MsgPackCodec::encode(&body).unwrap());

        let mut decoder = RecordDecoder::new(&bytes[..]);
        let decoded_header: ResponseHeader = decoder.next().await.unwrap();
        let decoded_body: LogRecord = decoder.next().await.unwrap();

        assert_eq!(decoded_header, header);
        assert_eq!(decoded_body, body);
        assert_eq!(decoder.buffered_len(), 0);
    }

    #[tokio::test]
    async fn test_fragmented_record() {
        let header = ResponseHeader {
            seq: 77,
            error: "no such member".to_string(),
        };
        let bytes = MsgPackCodec::encode(&header).unwrap();

        let (mut tx, rx) = duplex(64);
        let mut decoder = RecordDecoder::with_limits(rx, 1, DEFAULT_MAX_RECORD_SIZE);

        let writer = tokio::spawn(async move {
            for byte in bytes {
                tx.write_all(&[byte]).await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let decoded: ResponseHeader = decoder.next().await.unwrap();
        assert_eq!(decoded, header);
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_many_records_in_one_read() {
        let mut bytes = Vec::new();
        for seq in 1..=20u64 {
            bytes.extend(
                MsgPackCodec::encode(&ResponseHeader {
                    seq,
                    error: String::new(),
                })
                .unwrap(),
            );
        }

        let mut decoder = RecordDecoder::new(&bytes[..]);
        for seq in 1..=20u64 {
            let header: ResponseHeader = decoder.next().await.unwrap();
            assert_eq!(header.seq, seq);
        }
    }

    #[tokio::test]
    async fn test_eof_is_connection_closed() {
        let mut decoder = RecordDecoder::new(&b""[..]);
        let result = decoder.next_raw().await;
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_eof_mid_record() {
        let bytes = MsgPackCodec::encode(&ResponseHeader {
            seq: 1,
            error: "truncated".to_string(),
        })
        .unwrap();
        let mut decoder = RecordDecoder::new(&bytes[..bytes.len() - 3]);

        let result = decoder.next_raw().await;
        assert!(matches!(result, Err(ClientError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_garbage_is_decode_error() {
        let mut decoder = RecordDecoder::new(&[0xc1u8, 0x00][..]);
        let result = decoder.next_raw().await;
        assert!(matches!(result, Err(ClientError::MsgPackDecode(_))));
    }

    #[tokio::test]
    async fn test_record_size_limit() {
        let big = LogRecord {
            log: "x".repeat(4096),
        };
        let bytes = MsgPackCodec::encode(&big).unwrap();
        let mut decoder = RecordDecoder::with_limits(&bytes[..], 256, 1024);

        let result = decoder.next_raw().await;
        assert!(matches!(result, Err(ClientError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_large_record_in_small_reads() {
        use crate::protocol::{Member, MembersResponse};
        use std::time::Duration;

        #[derive(serde::Serialize)]
        #[serde(rename_all = "PascalCase")]
        struct Members {
            members: Vec<Member>,
        }

        let members = (0..40_000u32)
            .map(|i| Member {
                name: format!("node-{:05}", i),
                addr: serde_bytes::ByteBuf::from(i.to_be_bytes().to_vec()),
                port: 7946,
                status: "alive".to_string(),
                tags: [("role".to_string(), "web".to_string())].into(),
                ..Default::default()
            })
            .collect();
        let bytes = MsgPackCodec::encode(&Members { members }).unwrap();
        assert!(bytes.len() > 2 * 1024 * 1024);

        let (mut tx, rx) = duplex(16 * 1024);
        let expected = bytes.len();
        let writer = tokio::spawn(async move {
            for piece in bytes.chunks(16 * 1024) {
                tx.write_all(piece).await.unwrap();
            }
        });

        let mut decoder = RecordDecoder::with_limits(rx, 64 * 1024, 64 << 20);
        let raw = tokio::time::timeout(Duration::from_secs(10), decoder.next_raw())
            .await
            .expect("framing a large record took too long")
            .unwrap();
        writer.await.unwrap();

        assert_eq!(raw.len(), expected);
        let decoded: MembersResponse = MsgPackCodec::decode(&raw).unwrap();
        assert_eq!(decoded.members.len(), 40_000);
        assert_eq!(decoded.members[39_999].name, "node-39999");
    }
}

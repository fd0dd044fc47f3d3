//! Codec module - MsgPack serialization for wire records.
//!
//! Every record on the agent connection (request/response headers and their
//! bodies) is a single MessagePack value. Values are written back to back with
//! no length prefix, so [`ValueScanner`] is what lets the stream decoder find
//! record boundaries.
//!
//! # Example
//!
//! ```
//! use serf_rpc::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! assert_eq!(MsgPackCodec::value_len(&encoded).unwrap(), Some(encoded.len()));
//! ```

mod msgpack;

pub use msgpack::{MsgPackCodec, ValueScanner};

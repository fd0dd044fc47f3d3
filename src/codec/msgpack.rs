//! MsgPack codec using `rmp-serde`.
//!
//! **Always use `to_vec_named`**. The agent decodes records by field name
//! (`Seq`, `Command`, ...), so structs must go out in map format, not as
//! positional arrays.
//!
//! # Example
//!
//! ```
//! use serf_rpc::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! #[serde(rename_all = "PascalCase")]
//! struct Header {
//!     command: String,
//!     seq: u64,
//! }
//!
//! let header = Header { command: "members".to_string(), seq: 7 };
//! let encoded = MsgPackCodec::encode(&header).unwrap();
//! let decoded: Header = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, header);
//! ```

use crate::error::Result;

/// MessagePack codec for structured records.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes in struct-as-map format.
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Length of the first complete MsgPack value in `bytes`.
    ///
    /// Returns `Ok(None)` when `bytes` holds only a prefix of a value, so the
    /// caller should read more data and try again. Use a [`ValueScanner`]
    /// when retrying on a growing buffer.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not valid MsgPack.
    pub fn value_len(bytes: &[u8]) -> Result<Option<usize>> {
        ValueScanner::new().scan(bytes)
    }
}

/// Resumable boundary finder for MsgPack values.
///
/// Walks markers and length prefixes without decoding anything. Progress is
/// kept between calls, so a value that arrives in many reads is walked once
/// in total rather than once per read.
///
/// Every call must pass the same buffer, grown only at the end, until a
/// length is returned. The scanner then resets for the next value.
#[derive(Debug, Default)]
pub struct ValueScanner {
    /// Bytes of the current value already walked.
    offset: usize,
    /// Items still owed by each open array or map, innermost last.
    open: Vec<u64>,
}

/// How a marker is laid out on the wire.
enum Shape {
    /// `extra` header bytes, then `len` payload bytes.
    Fixed { extra: usize, len: usize },
    /// `width` big-endian length bytes (plus `tag` ext type bytes), then
    /// that many payload bytes.
    Sized { width: usize, tag: usize },
    /// Container holding `items` values (a map counts keys and values).
    Container { items: u64 },
    /// Container whose count follows in `width` big-endian bytes;
    /// `per` is 2 for maps.
    SizedContainer { width: usize, per: u64 },
}

fn shape(marker: u8) -> Option<Shape> {
    let shape = match marker {
        0x00..=0x7f | 0xe0..=0xff | 0xc0 | 0xc2 | 0xc3 => Shape::Fixed { extra: 0, len: 0 },
        0x80..=0x8f => Shape::Container {
            items: u64::from(marker & 0x0f) * 2,
        },
        0x90..=0x9f => Shape::Container {
            items: u64::from(marker & 0x0f),
        },
        0xa0..=0xbf => Shape::Fixed {
            extra: 0,
            len: usize::from(marker & 0x1f),
        },
        0xc4 | 0xd9 => Shape::Sized { width: 1, tag: 0 },
        0xc5 | 0xda => Shape::Sized { width: 2, tag: 0 },
        0xc6 | 0xdb => Shape::Sized { width: 4, tag: 0 },
        0xc7 => Shape::Sized { width: 1, tag: 1 },
        0xc8 => Shape::Sized { width: 2, tag: 1 },
        0xc9 => Shape::Sized { width: 4, tag: 1 },
        0xca => Shape::Fixed { extra: 0, len: 4 },
        0xcb => Shape::Fixed { extra: 0, len: 8 },
        0xcc | 0xd0 => Shape::Fixed { extra: 0, len: 1 },
        0xcd | 0xd1 => Shape::Fixed { extra: 0, len: 2 },
        0xce | 0xd2 => Shape::Fixed { extra: 0, len: 4 },
        0xcf | 0xd3 => Shape::Fixed { extra: 0, len: 8 },
        0xd4 => Shape::Fixed { extra: 1, len: 1 },
        0xd5 => Shape::Fixed { extra: 1, len: 2 },
        0xd6 => Shape::Fixed { extra: 1, len: 4 },
        0xd7 => Shape::Fixed { extra: 1, len: 8 },
        0xd8 => Shape::Fixed { extra: 1, len: 16 },
        0xdc => Shape::SizedContainer { width: 2, per: 1 },
        0xdd => Shape::SizedContainer { width: 4, per: 1 },
        0xde => Shape::SizedContainer { width: 2, per: 2 },
        0xdf => Shape::SizedContainer { width: 4, per: 2 },
        0xc1 => return None,
    };
    Some(shape)
}

fn read_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0, |acc, &b| (acc << 8) | u64::from(b))
}

impl ValueScanner {
    /// Create a scanner positioned at the start of a value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue walking the value at the start of `bytes`.
    ///
    /// Returns the value's length once it is complete, or `Ok(None)` if more
    /// bytes are needed.
    ///
    /// # Errors
    ///
    /// Returns error on a marker that is never valid MsgPack. The scanner is
    /// reset.
    pub fn scan(&mut self, bytes: &[u8]) -> Result<Option<usize>> {
        loop {
            let Some(&marker) = bytes.get(self.offset) else {
                return Ok(None);
            };
            let Some(shape) = shape(marker) else {
                let at = self.offset;
                self.reset();
                return Err(rmp_serde::decode::Error::Syntax(format!(
                    "invalid MsgPack marker 0x{:02x} at offset {}",
                    marker, at
                ))
                .into());
            };

            let rest = &bytes[self.offset + 1..];
            let (consumed, items) = match shape {
                Shape::Fixed { extra, len } => (1 + extra + len, 0),
                Shape::Container { items } => (1, items),
                Shape::Sized { width, tag } => {
                    let Some(prefix) = rest.get(..width) else {
                        return Ok(None);
                    };
                    let len = usize::try_from(read_be(prefix)).unwrap_or(usize::MAX);
                    ((1 + width + tag).saturating_add(len), 0)
                }
                Shape::SizedContainer { width, per } => {
                    let Some(prefix) = rest.get(..width) else {
                        return Ok(None);
                    };
                    (1 + width, read_be(prefix) * per)
                }
            };

            if bytes.len() - self.offset < consumed {
                return Ok(None);
            }
            self.offset += consumed;

            if items > 0 {
                self.open.push(items);
                continue;
            }

            // A value just ended; close every container it completes.
            loop {
                match self.open.last_mut() {
                    None => {
                        let len = self.offset;
                        self.reset();
                        return Ok(Some(len));
                    }
                    Some(remaining) => {
                        *remaining -= 1;
                        if *remaining > 0 {
                            break;
                        }
                        self.open.pop();
                    }
                }
            }
        }
    }

    fn reset(&mut self) {
        self.offset = 0;
        self.open.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    #[serde(rename_all = "PascalCase")]
    struct TagsBody {
        tags: HashMap<String, String>,
        delete_tags: Vec<String>,
    }

    #[test]
    fn test_encode_decode_struct() {
        let original = TagsBody {
            tags: HashMap::from([("role".to_string(), "web".to_string())]),
            delete_tags: vec!["dc".to_string()],
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: TagsBody = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_to_vec_named_produces_map_format() {
        let body = TagsBody {
            tags: HashMap::new(),
            delete_tags: Vec::new(),
        };

        let encoded = MsgPackCodec::encode(&body).unwrap();

        // 0x82 = fixmap with 2 entries; array format would be 0x92
        assert_eq!(encoded[0], 0x82, "Expected fixmap, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_bin_payload_uses_bin_format() {
        let payload: Vec<u8> = vec![0x01, 0x02, 0x03];
        let encoded = MsgPackCodec::encode(&serde_bytes::Bytes::new(&payload)).unwrap();

        assert_eq!(encoded[0], 0xc4, "Expected bin8 format");

        let decoded: serde_bytes::ByteBuf = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded.as_ref(), &payload[..]);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let invalid = [0xc1u8]; // never-used marker
        let result: Result<TagsBody> = MsgPackCodec::decode(&invalid);
        assert!(result.is_err());
    }

    #[test]
    fn test_value_len_complete_value() {
        let encoded = MsgPackCodec::encode(&"hello").unwrap();
        assert_eq!(MsgPackCodec::value_len(&encoded).unwrap(), Some(encoded.len()));
    }

    #[test]
    fn test_value_len_stops_at_first_value() {
        let mut bytes = MsgPackCodec::encode(&42u64).unwrap();
        let first = bytes.len();
        bytes.extend(MsgPackCodec::encode(&"trailing").unwrap());

        assert_eq!(MsgPackCodec::value_len(&bytes).unwrap(), Some(first));
    }

    #[test]
    fn test_value_len_incomplete_prefix() {
        let body = TagsBody {
            tags: HashMap::from([("a".to_string(), "1".to_string())]),
            delete_tags: vec!["b".to_string()],
        };
        let encoded = MsgPackCodec::encode(&body).unwrap();

        for cut in 0..encoded.len() {
            assert_eq!(
                MsgPackCodec::value_len(&encoded[..cut]).unwrap(),
                None,
                "prefix of {} bytes should be incomplete",
                cut
            );
        }
    }

    #[test]
    fn test_value_len_rejects_garbage() {
        assert!(MsgPackCodec::value_len(&[0xc1]).is_err());
    }

    #[test]
    fn test_scanner_resumes_across_reads() {
        let body = TagsBody {
            tags: HashMap::from([
                ("role".to_string(), "web".to_string()),
                ("dc".to_string(), "eu-west".to_string()),
            ]),
            delete_tags: vec!["old".to_string(); 20],
        };
        let encoded = MsgPackCodec::encode(&body).unwrap();

        // Grow the buffer one byte at a time, as tiny socket reads would.
        let mut scanner = ValueScanner::new();
        for end in 0..encoded.len() {
            assert_eq!(scanner.scan(&encoded[..end]).unwrap(), None);
        }
        assert_eq!(scanner.scan(&encoded).unwrap(), Some(encoded.len()));

        // Reset for the next value.
        assert_eq!(scanner.scan(&encoded).unwrap(), Some(encoded.len()));
    }

    #[test]
    fn test_scanner_covers_every_wire_type() {
        #[derive(Serialize)]
        struct Everything {
            nil: Option<u8>,
            flag: bool,
            small: u8,
            negative: i8,
            wide: u64,
            signed: i64,
            float: f32,
            double: f64,
            text: String,
            long_text: String,
            #[serde(with = "serde_bytes")]
            blob: Vec<u8>,
            list: Vec<u16>,
            long_list: Vec<u8>,
            map: HashMap<String, Vec<String>>,
            empty: Vec<u8>,
        }

        let value = Everything {
            nil: None,
            flag: true,
            small: 200,
            negative: -100,
            wide: u64::MAX,
            signed: i64::MIN,
            float: 1.5,
            double: -2.25,
            text: "x".repeat(40),
            long_text: "y".repeat(70_000),
            blob: vec![7; 300],
            list: vec![1, 300, 70],
            long_list: vec![0; 20],
            map: HashMap::from([("k".to_string(), vec!["v".to_string()])]),
            empty: Vec::new(),
        };
        let mut bytes = MsgPackCodec::encode(&value).unwrap();
        let len = bytes.len();
        bytes.push(0xc0);

        assert_eq!(MsgPackCodec::value_len(&bytes).unwrap(), Some(len));
        assert_eq!(MsgPackCodec::value_len(&bytes[..len - 1]).unwrap(), None);
    }

    #[test]
    fn test_scanner_counts_map_keys_and_values() {
        // {1: [2, 3]} followed by a trailing nil
        let bytes = [0x81, 0x01, 0x92, 0x02, 0x03, 0xc0];
        assert_eq!(MsgPackCodec::value_len(&bytes).unwrap(), Some(5));
        // map16 with zero entries
        assert_eq!(MsgPackCodec::value_len(&[0xde, 0x00, 0x00]).unwrap(), Some(3));
    }
}

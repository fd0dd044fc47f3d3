//! Command-specific body records.
//!
//! Plain data carriers. Request bodies borrow from the caller where they can;
//! response bodies own their data. `nil` from the agent (Go nil maps and
//! slices) decodes as an empty collection.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_bytes::ByteBuf;

use crate::error::ClientError;

fn nil_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HandshakeRequest {
    pub version: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthRequest<'a> {
    pub auth_key: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ForceLeaveRequest<'a> {
    pub node: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinRequest<'a> {
    pub existing: Vec<&'a str>,
    pub replay: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinResponse {
    #[serde(default)]
    pub num: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MembersFilteredRequest<'a> {
    pub tags: &'a HashMap<String, String>,
    pub status: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MembersResponse {
    #[serde(default, deserialize_with = "nil_as_default")]
    pub members: Vec<Member>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventRequest<'a> {
    pub name: &'a str,
    #[serde(with = "serde_bytes")]
    pub payload: &'a [u8],
    pub coalesce: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct TagsRequest<'a> {
    pub tags: &'a HashMap<String, String>,
    pub delete_tags: &'a [String],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct MonitorRequest<'a> {
    pub log_level: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StreamRequest<'a> {
    #[serde(rename = "Type")]
    pub event_type: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct StopRequest {
    pub stop: u64,
}

#[derive(Debug, Serialize)]
pub struct RespondRequest<'a> {
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "Payload", with = "serde_bytes")]
    pub payload: &'a [u8],
}

/// Agent statistics, grouped by subsystem (`agent`, `serf`, `runtime`, ...).
pub type Stats = HashMap<String, HashMap<String, String>>;

/// A cluster member as reported by the agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Member {
    pub name: String,
    /// Raw IP bytes, 4 or 16 long. See [`Member::ip`].
    pub addr: ByteBuf,
    pub port: u16,
    #[serde(deserialize_with = "nil_as_default")]
    pub tags: HashMap<String, String>,
    pub status: String,
    pub protocol_min: u8,
    pub protocol_max: u8,
    pub protocol_cur: u8,
    pub delegate_min: u8,
    pub delegate_max: u8,
    pub delegate_cur: u8,
}

impl Member {
    /// The member's address, if the agent sent a well-formed one.
    ///
    /// IPv4-mapped IPv6 addresses (Go's 16-byte form of an IPv4 address)
    /// come back as [`IpAddr::V4`].
    pub fn ip(&self) -> Option<IpAddr> {
        match self.addr.len() {
            4 => {
                let b: [u8; 4] = self.addr.as_slice().try_into().ok()?;
                Some(IpAddr::V4(Ipv4Addr::from(b)))
            }
            16 => {
                let b: [u8; 16] = self.addr.as_slice().try_into().ok()?;
                let v6 = Ipv6Addr::from(b);
                Some(match v6.to_ipv4_mapped() {
                    Some(v4) => IpAddr::V4(v4),
                    None => IpAddr::V6(v6),
                })
            }
            _ => None,
        }
    }
}

/// One log line from a `monitor` subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LogRecord {
    #[serde(default)]
    pub log: String,
}

/// One record from a `stream` subscription.
///
/// Covers member events (`member-join`, `member-leave`, `member-failed`,
/// `member-update`, `member-reap`), user events and queries. Fields that the
/// event kind does not carry are left at their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventRecord {
    #[serde(rename = "Event")]
    pub event: String,
    #[serde(rename = "ID")]
    pub id: u64,
    #[serde(rename = "LTime")]
    pub ltime: u64,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Payload")]
    pub payload: Option<ByteBuf>,
    #[serde(rename = "Coalesce")]
    pub coalesce: bool,
    #[serde(rename = "Members", deserialize_with = "nil_as_default")]
    pub members: Vec<Member>,
}

/// Log level filter for `monitor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Err,
}

impl LogLevel {
    /// The level name as the agent's log filter spells it.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Err => "ERR",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = ClientError;

    fn from_str(s: &str) -> std::result::Result<Self, ClientError> {
        match s.to_ascii_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" => Ok(LogLevel::Warn),
            "ERR" | "ERROR" => Ok(LogLevel::Err),
            other => Err(ClientError::InvalidLogLevel(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MsgPackCodec;

    #[derive(Serialize)]
    #[serde(rename_all = "PascalCase")]
    struct NilMember {
        name: &'static str,
        tags: Option<HashMap<String, String>>,
    }

    #[test]
    fn test_member_nil_tags_decode_as_empty() {
        let encoded = MsgPackCodec::encode(&NilMember {
            name: "node1",
            tags: None,
        })
        .unwrap();

        let member: Member = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(member.name, "node1");
        assert!(member.tags.is_empty());
        assert_eq!(member.port, 0);
    }

    #[test]
    fn test_member_ip_v4() {
        let member = Member {
            addr: ByteBuf::from(vec![10, 0, 0, 2]),
            ..Default::default()
        };
        assert_eq!(member.ip(), Some("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn test_member_ip_v4_mapped() {
        let mut bytes = vec![0u8; 10];
        bytes.extend([0xff, 0xff, 192, 168, 1, 7]);
        let member = Member {
            addr: ByteBuf::from(bytes),
            ..Default::default()
        };
        assert_eq!(member.ip(), Some("192.168.1.7".parse().unwrap()));
    }

    #[test]
    fn test_member_ip_invalid_length() {
        let member = Member {
            addr: ByteBuf::from(vec![1, 2, 3]),
            ..Default::default()
        };
        assert_eq!(member.ip(), None);
    }

    #[test]
    fn test_user_event_record() {
        let record = EventRecord {
            event: "user".to_string(),
            ltime: 9,
            name: "deploy".to_string(),
            payload: Some(ByteBuf::from(b"v1.2.3".to_vec())),
            coalesce: true,
            ..Default::default()
        };
        let encoded = MsgPackCodec::encode(&record).unwrap();
        let decoded: EventRecord = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, record);
        assert!(decoded.members.is_empty());
    }

    #[test]
    fn test_stream_request_uses_type_field() {
        let encoded = MsgPackCodec::encode(&StreamRequest {
            event_type: "member-join,user:deploy",
        })
        .unwrap();
        let text = String::from_utf8_lossy(&encoded);
        assert!(text.contains("Type"));
        assert!(!text.contains("EventType"));
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("ERR".parse::<LogLevel>().unwrap(), LogLevel::Err);
        assert!(matches!(
            "LOUD".parse::<LogLevel>(),
            Err(ClientError::InvalidLogLevel(level)) if level == "LOUD"
        ));
        assert_eq!(LogLevel::Warn.to_string(), "WARN");
    }
}

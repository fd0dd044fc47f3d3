//! Protocol module - envelopes, body records, and stream decoding.
//!
//! The agent protocol is a sequence of MsgPack records on one TCP stream:
//! - requests: [`RequestHeader`] followed by an optional body record
//! - responses: [`ResponseHeader`] followed by an optional body record
//!
//! Whether a body follows is fixed per command, so only the handler that owns
//! a seq knows how many records to read after its header.

mod record_decoder;
mod records;
mod wire_format;

pub use record_decoder::{RecordDecoder, DEFAULT_MAX_RECORD_SIZE, DEFAULT_READ_BUFFER_CAPACITY};
pub use records::{
    AuthRequest, EventRecord, EventRequest, ForceLeaveRequest, HandshakeRequest, JoinRequest,
    JoinResponse, LogLevel, LogRecord, Member, MembersFilteredRequest, MembersResponse,
    MonitorRequest, RespondRequest, Stats, StopRequest, StreamRequest, TagsRequest,
};
pub use wire_format::{commands, RequestHeader, ResponseHeader, MAX_IPC_VERSION};

//! Transport module - connection setup.
//!
//! One TCP connection per client. The socket is split into a read half, owned
//! by the listener task, and a write half, owned by the serialized writer.

mod tcp;

pub use tcp::dial;

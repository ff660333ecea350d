//! Wire protocol for the ensemble's fixed binary format.
//!
//! The byte layout here is dictated by the server side and is not a design
//! surface of this crate: the connection supervisor conforms to it and
//! everything above the supervisor works with decoded records only.
//!
//! Layout rules:
//!
//! - every packet is framed by a big-endian `i32` length prefix
//! - the first frame of a connection is the session handshake
//!   ([`ConnectRequest`] / [`ConnectResponse`]), with no request header
//! - every later request starts with a [`RequestHeader`] (`xid`, opcode) and
//!   every reply with a [`ReplyHeader`] (`xid`, `zxid`, error code)
//! - two xid values are reserved for server-initiated traffic: watch
//!   notifications and keep-alive replies (see [`crate::constants`])

mod codec;
mod records;


pub use codec::get_bool;
pub use codec::get_buffer;
pub use codec::get_i32;
pub use codec::get_i64;
pub use codec::get_string;
pub use codec::get_string_list;
pub use codec::put_bool;
pub use codec::put_buffer;
pub use codec::put_i32;
pub use codec::put_i64;
pub use codec::put_string;
pub use codec::read_frame;
pub use codec::to_bytes;
pub use codec::write_frame;
pub use codec::ReadRecord;
pub use codec::WriteRecord;
pub use records::*;

// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Wire codec for the kstreamer control protocol.
//!
//! A datagram carries one or more messages. Each message is a 16-byte
//! little-endian header followed by a payload of TLV attributes, padded to a
//! 4-byte boundary. Decoding never reads past a declared length: truncated
//! headers, overrunning messages and overrunning attributes are errors.

mod attr;
mod buffer;
mod codes;
mod error;
mod header;
mod message;
mod message_type;

pub mod protocol;

pub use attr::{
    Attr, AttrIter, ATTR_HEADER_LEN, MAX_ATTR_DATA, attr_space, parse_attrs, put_attr,
    put_attr_i32, put_attr_str, put_attr_u32,
};
pub use buffer::DatagramBuffer;
pub use codes::ErrorCode;
pub use error::{Result, WireError};
pub use header::{ALIGNTO, HEADER_LEN, MessageFlags, MessageHeader, align};
pub use message::{Message, MessageBuilder, MessageIter, decode_datagram};
pub use message_type::{MessageType, type_name};

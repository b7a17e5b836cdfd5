// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::error::{Result, WireError};

/// Encoded size of [`MessageHeader`].
pub const HEADER_LEN: usize = 16;

/// Messages and attributes are padded to this boundary.
pub const ALIGNTO: usize = 4;

/// Round `len` up to the next [`ALIGNTO`] boundary.
pub const fn align(len: usize) -> usize {
    (len + ALIGNTO - 1) & !(ALIGNTO - 1)
}

bitflags! {
    /// Header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MessageFlags: u16 {
        /// Message is a request that expects a reply.
        const REQUEST = 0x0001;
        /// Part of a multi-part reply terminated by DONE.
        const MULTI = 0x0002;
        /// Acknowledgement of a request.
        const ACK = 0x0004;
        /// Echo the request back.
        const ECHO = 0x0008;
        /// Return the full table (root).
        const DUMP = 0x0100;
        /// Return all matching entries.
        const MATCH = 0x0200;
        /// Atomic dump.
        const ATOMIC = 0x0400;
    }
}

impl fmt::Display for MessageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("-");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(name)?;
            first = false;
        }
        let unknown = self.bits() & !Self::all().bits();
        if unknown != 0 {
            if !first {
                f.write_str(" ")?;
            }
            write!(f, "0x{unknown:04x}")?;
        }
        Ok(())
    }
}

/// Fixed header that precedes every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_type: u16,
    pub flags: MessageFlags,
    /// Requester port id (0 for the server side and for broadcasts).
    pub port_id: u32,
    pub seq: u32,
    /// Payload length in bytes, header and padding excluded.
    pub payload_len: u32,
}

impl MessageHeader {
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16_le(self.message_type);
        buf.put_u16_le(self.flags.bits());
        buf.put_u32_le(self.port_id);
        buf.put_u32_le(self.seq);
        buf.put_u32_le(self.payload_len);
    }

    /// Decode a header from the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(WireError::TruncatedHeader {
                needed: HEADER_LEN,
                available: buf.len(),
            });
        }
        let mut cursor = &buf[..HEADER_LEN];
        Ok(Self {
            message_type: cursor.get_u16_le(),
            flags: MessageFlags::from_bits_retain(cursor.get_u16_le()),
            port_id: cursor.get_u32_le(),
            seq: cursor.get_u32_le(),
            payload_len: cursor.get_u32_le(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align() {
        assert_eq!(align(0), 0);
        assert_eq!(align(1), 4);
        assert_eq!(align(4), 4);
        assert_eq!(align(17), 20);
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let header = MessageHeader {
            message_type: 0x0102,
            flags: MessageFlags::REQUEST | MessageFlags::ACK,
            port_id: 7,
            seq: 0x0A0B0C0D,
            payload_len: 8,
        };
        let mut buf = Vec::new();
        header.encode(&mut buf);

        assert_eq!(buf.len(), HEADER_LEN);
        assert_eq!(&buf[0..2], &[0x02, 0x01]);
        assert_eq!(&buf[2..4], &[0x05, 0x00]);
        assert_eq!(&buf[8..12], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(MessageHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_truncated_header_rejected() {
        let err = MessageHeader::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            WireError::TruncatedHeader {
                needed: HEADER_LEN,
                available: 10
            }
        );
    }

    #[test]
    fn test_flags_display() {
        let flags = MessageFlags::REQUEST | MessageFlags::DUMP;
        assert_eq!(flags.to_string(), "REQUEST DUMP");
        assert_eq!(MessageFlags::empty().to_string(), "-");
        assert_eq!(MessageFlags::from_bits_retain(0x8000).to_string(), "0x8000");
    }
}

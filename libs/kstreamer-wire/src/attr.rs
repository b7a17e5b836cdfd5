// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use bytes::{BufMut, BytesMut};

use crate::error::{Result, WireError};
use crate::header::align;

/// Encoded size of an attribute header: type (u16) + length (u16).
pub const ATTR_HEADER_LEN: usize = 4;

/// Largest attribute payload the 16-bit length field can describe.
pub const MAX_ATTR_DATA: usize = u16::MAX as usize;

/// Bytes an attribute with `data_len` payload bytes occupies, padding included.
pub const fn attr_space(data_len: usize) -> usize {
    align(ATTR_HEADER_LEN + data_len)
}

/// A decoded attribute borrowing from the message payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr<'a> {
    attr_type: u16,
    data: &'a [u8],
}

impl<'a> Attr<'a> {
    pub fn new(attr_type: u16, data: &'a [u8]) -> Self {
        Self { attr_type, data }
    }

    pub fn attr_type(&self) -> u16 {
        self.attr_type
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn as_u32(&self) -> Result<u32> {
        let bytes: [u8; 4] = self.data.try_into().map_err(|_| WireError::AttrLength {
            attr_type: self.attr_type,
            expected: 4,
            actual: self.data.len(),
        })?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn as_i32(&self) -> Result<i32> {
        self.as_u32().map(|v| v as i32)
    }

    /// String payload. Trailing NUL padding is ignored.
    pub fn as_str(&self) -> Result<&'a str> {
        let end = self
            .data
            .iter()
            .rposition(|b| *b != 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        std::str::from_utf8(&self.data[..end]).map_err(|_| WireError::InvalidUtf8(self.attr_type))
    }
}

/// Iterator over the attributes of a payload.
///
/// Yields an error and then stops at the first malformed attribute.
#[derive(Debug, Clone)]
pub struct AttrIter<'a> {
    buf: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> AttrIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            failed: false,
        }
    }
}

impl<'a> Iterator for AttrIter<'a> {
    type Item = Result<Attr<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.buf.len() {
            return None;
        }

        let remaining = self.buf.len() - self.offset;
        if remaining < ATTR_HEADER_LEN {
            self.failed = true;
            return Some(Err(WireError::TruncatedAttr {
                offset: self.offset,
            }));
        }

        let head = &self.buf[self.offset..self.offset + ATTR_HEADER_LEN];
        let attr_type = u16::from_le_bytes([head[0], head[1]]);
        let declared = u16::from_le_bytes([head[2], head[3]]) as usize;

        let available = remaining - ATTR_HEADER_LEN;
        if declared > available {
            self.failed = true;
            return Some(Err(WireError::AttrOverrun {
                attr_type,
                declared,
                remaining: available,
            }));
        }

        let start = self.offset + ATTR_HEADER_LEN;
        let data = &self.buf[start..start + declared];
        // The last attribute may omit its padding.
        self.offset += attr_space(declared).min(remaining);

        Some(Ok(Attr { attr_type, data }))
    }
}

/// Decode every attribute of `payload`, failing on the first malformed one.
pub fn parse_attrs(payload: &[u8]) -> Result<Vec<Attr<'_>>> {
    AttrIter::new(payload).collect()
}

/// Append one attribute, padded to the alignment boundary.
pub fn put_attr(buf: &mut BytesMut, attr_type: u16, data: &[u8]) -> Result<()> {
    if data.len() > MAX_ATTR_DATA {
        return Err(WireError::AttrTooLarge(data.len()));
    }
    let space = attr_space(data.len());
    buf.reserve(space);
    buf.put_u16_le(attr_type);
    buf.put_u16_le(data.len() as u16);
    buf.put_slice(data);
    buf.put_bytes(0, space - ATTR_HEADER_LEN - data.len());
    Ok(())
}

pub fn put_attr_u32(buf: &mut BytesMut, attr_type: u16, value: u32) -> Result<()> {
    put_attr(buf, attr_type, &value.to_le_bytes())
}

pub fn put_attr_i32(buf: &mut BytesMut, attr_type: u16, value: i32) -> Result<()> {
    put_attr(buf, attr_type, &value.to_le_bytes())
}

pub fn put_attr_str(buf: &mut BytesMut, attr_type: u16, value: &str) -> Result<()> {
    put_attr(buf, attr_type, value.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attrs_are_padded() {
        let mut buf = BytesMut::new();
        put_attr_str(&mut buf, 2, "abcde").unwrap();
        put_attr_u32(&mut buf, 1, 42).unwrap();
        assert_eq!(buf.len(), attr_space(5) + attr_space(4));
        assert_eq!(buf.len(), 12 + 8);

        let attrs = parse_attrs(&buf).unwrap();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].attr_type(), 2);
        assert_eq!(attrs[0].as_str().unwrap(), "abcde");
        assert_eq!(attrs[1].as_u32().unwrap(), 42);
    }

    #[test]
    fn test_declared_length_exceeding_buffer_is_rejected() {
        let mut buf = BytesMut::new();
        put_attr_u32(&mut buf, 3, 9).unwrap();
        // Claim 200 bytes of payload in the second attribute.
        buf.put_u16_le(3);
        buf.put_u16_le(200);
        buf.put_u32_le(0);

        let mut iter = AttrIter::new(&buf);
        assert!(iter.next().unwrap().is_ok());
        let err = iter.next().unwrap().unwrap_err();
        assert_eq!(
            err,
            WireError::AttrOverrun {
                attr_type: 3,
                declared: 200,
                remaining: 4
            }
        );
        assert!(iter.next().is_none());
        assert!(parse_attrs(&buf).is_err());
    }

    #[test]
    fn test_trailing_garbage_shorter_than_header_is_rejected() {
        let mut buf = BytesMut::new();
        put_attr_u32(&mut buf, 1, 1).unwrap();
        buf.put_u16_le(7);

        let err = parse_attrs(&buf).unwrap_err();
        assert_eq!(err, WireError::TruncatedAttr { offset: 8 });
    }

    #[test]
    fn test_wrong_width_integer() {
        let attr = Attr::new(4, &[1, 2]);
        assert!(matches!(
            attr.as_u32(),
            Err(WireError::AttrLength {
                expected: 4,
                actual: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_oversized_attribute_rejected() {
        let mut buf = BytesMut::new();
        let data = vec![0u8; MAX_ATTR_DATA + 1];
        assert_eq!(
            put_attr(&mut buf, 1, &data),
            Err(WireError::AttrTooLarge(MAX_ATTR_DATA + 1))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_unpadded_final_attribute_accepted() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(2);
        buf.put_u16_le(3);
        buf.put_slice(b"abc");

        let attrs = parse_attrs(&buf).unwrap();
        assert_eq!(attrs[0].as_str().unwrap(), "abc");
    }
}

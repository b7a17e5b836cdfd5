// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::attr::{AttrIter, put_attr, put_attr_i32, put_attr_str, put_attr_u32};
use crate::codes::ErrorCode;
use crate::error::{Result, WireError};
use crate::header::{HEADER_LEN, MessageFlags, MessageHeader, align};
use crate::message_type::{MessageType, type_name};

/// One decoded or ready-to-encode control message.
///
/// The header's `payload_len` always matches `payload`.
#[derive(Clone, PartialEq, Eq)]
pub struct Message {
    header: MessageHeader,
    payload: Bytes,
}

impl Message {
    pub fn new(
        message_type: u16,
        flags: MessageFlags,
        port_id: u32,
        seq: u32,
        payload: Bytes,
    ) -> Self {
        Self {
            header: MessageHeader {
                message_type,
                flags,
                port_id,
                seq,
                payload_len: payload.len() as u32,
            },
            payload,
        }
    }

    /// Bare acknowledgement echoing the request's type, port and sequence.
    pub fn ack(request: &MessageHeader, extra: MessageFlags) -> Self {
        Self::new(
            request.message_type,
            MessageFlags::ACK | extra,
            request.port_id,
            request.seq,
            Bytes::new(),
        )
    }

    /// Error reply to `request`. The payload is the signed code.
    pub fn error(request: &MessageHeader, code: ErrorCode) -> Self {
        Self::new(
            MessageType::Error.as_u16(),
            MessageFlags::ACK,
            request.port_id,
            request.seq,
            Bytes::copy_from_slice(&code.to_wire().to_le_bytes()),
        )
    }

    /// DONE terminator of a multi-part reply. The payload is the element count.
    pub fn done(port_id: u32, seq: u32, count: u32) -> Self {
        Self::new(
            MessageType::Done.as_u16(),
            MessageFlags::MULTI,
            port_id,
            seq,
            Bytes::copy_from_slice(&count.to_le_bytes()),
        )
    }

    pub fn header(&self) -> &MessageHeader {
        &self.header
    }

    pub fn message_type(&self) -> u16 {
        self.header.message_type
    }

    pub fn kind(&self) -> Option<MessageType> {
        MessageType::from_u16(self.header.message_type)
    }

    pub fn flags(&self) -> MessageFlags {
        self.header.flags
    }

    pub fn port_id(&self) -> u32 {
        self.header.port_id
    }

    pub fn seq(&self) -> u32 {
        self.header.seq
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn attrs(&self) -> AttrIter<'_> {
        AttrIter::new(&self.payload)
    }

    pub fn is_request(&self) -> bool {
        self.header.flags.contains(MessageFlags::REQUEST)
    }

    pub fn is_multi(&self) -> bool {
        self.header.flags.contains(MessageFlags::MULTI)
    }

    pub fn is_error(&self) -> bool {
        self.header.message_type == MessageType::Error.as_u16()
    }

    pub fn is_done(&self) -> bool {
        self.header.message_type == MessageType::Done.as_u16()
    }

    /// Code carried by an ERROR message, `None` for any other type.
    pub fn error_code(&self) -> Result<Option<ErrorCode>> {
        if !self.is_error() {
            return Ok(None);
        }
        let bytes: [u8; 4] = self
            .payload
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or(WireError::MissingErrorCode)?;
        Ok(Some(ErrorCode::from_wire(i32::from_le_bytes(bytes))))
    }

    /// Element count carried by a DONE message.
    pub fn done_count(&self) -> Option<u32> {
        if !self.is_done() {
            return None;
        }
        let bytes: [u8; 4] = self.payload.get(..4)?.try_into().ok()?;
        Some(u32::from_le_bytes(bytes))
    }

    /// Bytes this message occupies in a datagram, padding included.
    pub fn encoded_len(&self) -> usize {
        align(HEADER_LEN + self.payload.len())
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        let len = self.encoded_len();
        buf.reserve(len);
        self.header.encode(buf);
        buf.put_slice(&self.payload);
        buf.put_bytes(0, len - HEADER_LEN - self.payload.len());
    }

    /// Encode this message alone as a datagram.
    pub fn to_datagram(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("type", &type_name(self.header.message_type))
            .field("flags", &format_args!("{}", self.header.flags))
            .field("port_id", &self.header.port_id)
            .field("seq", &self.header.seq)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] port={} seq={} len={}",
            type_name(self.header.message_type),
            self.header.flags,
            self.header.port_id,
            self.header.seq,
            self.payload.len()
        )
    }
}

/// Builder for messages carrying attributes.
///
/// Attribute encoding errors are deferred to [`MessageBuilder::build`] so
/// calls can be chained.
#[derive(Debug)]
pub struct MessageBuilder {
    message_type: u16,
    flags: MessageFlags,
    port_id: u32,
    seq: u32,
    payload: BytesMut,
    error: Option<WireError>,
}

impl MessageBuilder {
    pub fn new(message_type: impl Into<u16>) -> Self {
        Self {
            message_type: message_type.into(),
            flags: MessageFlags::empty(),
            port_id: 0,
            seq: 0,
            payload: BytesMut::new(),
            error: None,
        }
    }

    pub fn flags(mut self, flags: MessageFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn port_id(mut self, port_id: u32) -> Self {
        self.port_id = port_id;
        self
    }

    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn attr(mut self, attr_type: u16, data: &[u8]) -> Self {
        if self.error.is_none() {
            self.error = put_attr(&mut self.payload, attr_type, data).err();
        }
        self
    }

    pub fn attr_u32(mut self, attr_type: u16, value: u32) -> Self {
        if self.error.is_none() {
            self.error = put_attr_u32(&mut self.payload, attr_type, value).err();
        }
        self
    }

    pub fn attr_i32(mut self, attr_type: u16, value: i32) -> Self {
        if self.error.is_none() {
            self.error = put_attr_i32(&mut self.payload, attr_type, value).err();
        }
        self
    }

    pub fn attr_str(mut self, attr_type: u16, value: &str) -> Self {
        if self.error.is_none() {
            self.error = put_attr_str(&mut self.payload, attr_type, value).err();
        }
        self
    }

    pub fn build(self) -> Result<Message> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(Message::new(
            self.message_type,
            self.flags,
            self.port_id,
            self.seq,
            self.payload.freeze(),
        ))
    }
}

/// Iterator over the messages packed in one datagram.
///
/// Payloads are zero-copy slices of the datagram. Stops after the first
/// malformed message.
#[derive(Debug, Clone)]
pub struct MessageIter {
    datagram: Bytes,
    offset: usize,
    failed: bool,
}

impl MessageIter {
    pub fn new(datagram: Bytes) -> Self {
        Self {
            datagram,
            offset: 0,
            failed: false,
        }
    }
}

impl Iterator for MessageIter {
    type Item = Result<Message>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.datagram.len() {
            return None;
        }

        let rest = &self.datagram[self.offset..];
        let header = match MessageHeader::decode(rest) {
            Ok(header) => header,
            Err(err) => {
                self.failed = true;
                return Some(Err(err));
            }
        };

        let declared = header.payload_len as usize;
        let remaining = rest.len() - HEADER_LEN;
        if declared > remaining {
            self.failed = true;
            return Some(Err(WireError::MessageOverrun {
                declared,
                remaining,
            }));
        }

        let start = self.offset + HEADER_LEN;
        let payload = self.datagram.slice(start..start + declared);
        self.offset += align(HEADER_LEN + declared).min(rest.len());

        Some(Ok(Message { header, payload }))
    }
}

/// Decode every message of a datagram.
pub fn decode_datagram(datagram: Bytes) -> Result<Vec<Message>> {
    MessageIter::new(datagram).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(seq: u32) -> MessageHeader {
        MessageHeader {
            message_type: MessageType::PipelineGet.as_u16(),
            flags: MessageFlags::REQUEST | MessageFlags::ACK,
            port_id: 12,
            seq,
            payload_len: 0,
        }
    }

    #[test]
    fn test_error_reply_carries_negative_code() {
        let msg = Message::error(&request(5), ErrorCode::Busy);
        assert!(msg.is_error());
        assert_eq!(msg.seq(), 5);
        assert_eq!(msg.port_id(), 12);
        assert_eq!(msg.error_code().unwrap(), Some(ErrorCode::Busy));
        assert_eq!(msg.payload(), &(-16i32).to_le_bytes());
    }

    #[test]
    fn test_ack_echoes_request() {
        let msg = Message::ack(&request(9), MessageFlags::MULTI);
        assert_eq!(msg.kind(), Some(MessageType::PipelineGet));
        assert_eq!(msg.flags(), MessageFlags::ACK | MessageFlags::MULTI);
        assert_eq!(msg.seq(), 9);
        assert!(msg.payload().is_empty());
    }

    #[test]
    fn test_datagram_with_several_messages() {
        let first = MessageBuilder::new(MessageType::PipelineNew)
            .flags(MessageFlags::MULTI)
            .seq(101)
            .attr_u32(1, 7)
            .attr_str(5, "x")
            .build()
            .unwrap();
        let second = Message::done(0, 102, 1);

        let mut buf = BytesMut::new();
        first.encode(&mut buf);
        second.encode(&mut buf);
        assert_eq!(buf.len(), first.encoded_len() + second.encoded_len());

        let messages = decode_datagram(buf.freeze()).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], first);
        assert_eq!(messages[1].done_count(), Some(1));

        let attrs: Vec<_> = messages[0].attrs().collect::<Result<_>>().unwrap();
        assert_eq!(attrs[0].as_u32().unwrap(), 7);
        assert_eq!(attrs[1].as_str().unwrap(), "x");
    }

    #[test]
    fn test_overrunning_message_rejected() {
        let msg = MessageBuilder::new(MessageType::Noop)
            .attr_u32(1, 1)
            .build()
            .unwrap();
        let datagram = msg.to_datagram();
        let truncated = datagram.slice(..datagram.len() - 2);

        let err = decode_datagram(truncated).unwrap_err();
        assert_eq!(
            err,
            WireError::MessageOverrun {
                declared: 8,
                remaining: 6
            }
        );
    }

    #[test]
    fn test_builder_reports_deferred_attr_error() {
        let data = vec![0u8; 70_000];
        let err = MessageBuilder::new(MessageType::Noop)
            .attr(1, &data)
            .attr_u32(2, 3)
            .build()
            .unwrap_err();
        assert_eq!(err, WireError::AttrTooLarge(70_000));
    }

    #[test]
    fn test_error_without_code() {
        let msg = Message::new(
            MessageType::Error.as_u16(),
            MessageFlags::ACK,
            0,
            0,
            Bytes::new(),
        );
        assert_eq!(msg.error_code(), Err(WireError::MissingErrorCode));
    }
}

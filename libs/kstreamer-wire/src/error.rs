// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use thiserror::Error;

/// Errors raised while encoding or decoding control messages.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated message header: need {needed} bytes, have {available}")]
    TruncatedHeader { needed: usize, available: usize },

    #[error("message payload overruns datagram: declared {declared} bytes, {remaining} remaining")]
    MessageOverrun { declared: usize, remaining: usize },

    #[error("truncated attribute header at payload offset {offset}")]
    TruncatedAttr { offset: usize },

    #[error(
        "attribute {attr_type} overruns payload: declared {declared} bytes, {remaining} remaining"
    )]
    AttrOverrun {
        attr_type: u16,
        declared: usize,
        remaining: usize,
    },

    #[error("attribute {attr_type} has {actual} bytes, expected {expected}")]
    AttrLength {
        attr_type: u16,
        expected: usize,
        actual: usize,
    },

    #[error("attribute {0} is not valid UTF-8")]
    InvalidUtf8(u16),

    #[error("attribute data too large: {0} bytes")]
    AttrTooLarge(usize),

    #[error("datagram buffer full: need {needed} bytes, {available} available")]
    BufferFull { needed: usize, available: usize },

    #[error("error message carries no error code")]
    MissingErrorCode,
}

pub type Result<T> = std::result::Result<T, WireError>;

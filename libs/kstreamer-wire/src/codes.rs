// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::fmt;

/// Error codes carried by ERROR messages.
///
/// On the wire a code is the negated errno value as a signed 32-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    Io,
    Again,
    Busy,
    Conflict,
    Unavailable,
    Invalid,
    NotSupported,
    ResourceExhausted,
    TimedOut,
    /// A code this side does not know about.
    Other(i32),
}

impl ErrorCode {
    pub fn to_wire(self) -> i32 {
        match self {
            Self::NotFound => -2,
            Self::Io => -5,
            Self::Again => -11,
            Self::Busy => -16,
            Self::Conflict => -17,
            Self::Unavailable => -19,
            Self::Invalid => -22,
            Self::NotSupported => -95,
            Self::ResourceExhausted => -105,
            Self::TimedOut => -110,
            Self::Other(code) => code,
        }
    }

    pub fn from_wire(code: i32) -> Self {
        match code {
            -2 => Self::NotFound,
            -5 => Self::Io,
            -11 => Self::Again,
            -16 => Self::Busy,
            -17 => Self::Conflict,
            -19 => Self::Unavailable,
            -22 => Self::Invalid,
            -95 => Self::NotSupported,
            -105 => Self::ResourceExhausted,
            -110 => Self::TimedOut,
            other => Self::Other(other),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::NotFound => "NOT_FOUND",
            Self::Io => "IO",
            Self::Again => "AGAIN",
            Self::Busy => "BUSY",
            Self::Conflict => "CONFLICT",
            Self::Unavailable => "UNAVAILABLE",
            Self::Invalid => "INVALID",
            Self::NotSupported => "NOT_SUPPORTED",
            Self::ResourceExhausted => "RESOURCE_EXHAUSTED",
            Self::TimedOut => "TIMED_OUT",
            Self::Other(_) => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.to_wire())
    }
}

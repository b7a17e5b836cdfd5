// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use kstreamer_wire::{ErrorCode, WireError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KsError {
    #[error("Topology lock busy: {0}")]
    Busy(String),

    #[error("Try again: {0}")]
    Again(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Timed out: {0}")]
    TimedOut(String),

    #[error("Hook failed: {0}")]
    Hook(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    /// Error code reported by the peer that has no local variant.
    #[error("Remote error: {0}")]
    Remote(ErrorCode),

    #[error("Wire format error: {0}")]
    Wire(#[from] WireError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KsError {
    /// Wire code reported to the requester for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Busy(_) => ErrorCode::Busy,
            Self::Again(_) => ErrorCode::Again,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Invalid(_) | Self::Wire(_) => ErrorCode::Invalid,
            Self::ResourceExhausted(_) => ErrorCode::ResourceExhausted,
            Self::Unavailable(_) => ErrorCode::Unavailable,
            Self::Conflict(_) => ErrorCode::Conflict,
            Self::TimedOut(_) => ErrorCode::TimedOut,
            Self::NotSupported(_) => ErrorCode::NotSupported,
            Self::Remote(code) => *code,
            Self::Hook(_)
            | Self::Transport(_)
            | Self::Configuration(_)
            | Self::Io(_)
            | Self::Other(_) => ErrorCode::Io,
        }
    }

    /// Error for a code received in an ERROR reply.
    pub fn from_code(code: ErrorCode) -> Self {
        let reason = "reported by peer".to_string();
        match code {
            ErrorCode::Busy => Self::Busy(reason),
            ErrorCode::Again => Self::Again(reason),
            ErrorCode::NotFound => Self::NotFound(reason),
            ErrorCode::Invalid => Self::Invalid(reason),
            ErrorCode::ResourceExhausted => Self::ResourceExhausted(reason),
            ErrorCode::Unavailable => Self::Unavailable(reason),
            ErrorCode::Conflict => Self::Conflict(reason),
            ErrorCode::TimedOut => Self::TimedOut(reason),
            ErrorCode::NotSupported => Self::NotSupported(reason),
            ErrorCode::Io | ErrorCode::Other(_) => Self::Remote(code),
        }
    }
}

pub type Result<T> = std::result::Result<T, KsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_mapping() {
        assert_eq!(KsError::Busy("x".into()).code(), ErrorCode::Busy);
        assert_eq!(KsError::Hook("open failed".into()).code(), ErrorCode::Io);
        assert_eq!(
            KsError::from(WireError::MissingErrorCode).code(),
            ErrorCode::Invalid
        );
    }

    #[test]
    fn test_from_code_gives_typed_variant() {
        assert!(matches!(
            KsError::from_code(ErrorCode::Conflict),
            KsError::Conflict(_)
        ));
        assert!(matches!(
            KsError::from_code(ErrorCode::Other(-1)),
            KsError::Remote(ErrorCode::Other(-1))
        ));
        assert_eq!(KsError::from_code(ErrorCode::Again).code(), ErrorCode::Again);
    }
}

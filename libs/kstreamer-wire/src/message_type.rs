// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

/// Message types of the control protocol.
///
/// Values below 16 are the generic control messages; the rest are
/// kstreamer commands and notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    Noop = 1,
    Error = 2,
    Done = 3,
    Overrun = 4,

    Version = 16,
    Begin = 17,
    Commit = 18,
    Abort = 19,
    TopologyLock = 20,
    TopologyTrylock = 21,
    TopologyUnlock = 22,

    NodeGet = 32,
    NodeNew = 33,
    NodeDel = 34,
    NodeSet = 35,

    ChanGet = 36,
    ChanNew = 37,
    ChanDel = 38,
    ChanSet = 39,

    PipelineGet = 40,
    PipelineNew = 41,
    PipelineDel = 42,
    PipelineSet = 43,
}

impl MessageType {
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(value: u16) -> Option<Self> {
        let message_type = match value {
            1 => Self::Noop,
            2 => Self::Error,
            3 => Self::Done,
            4 => Self::Overrun,
            16 => Self::Version,
            17 => Self::Begin,
            18 => Self::Commit,
            19 => Self::Abort,
            20 => Self::TopologyLock,
            21 => Self::TopologyTrylock,
            22 => Self::TopologyUnlock,
            32 => Self::NodeGet,
            33 => Self::NodeNew,
            34 => Self::NodeDel,
            35 => Self::NodeSet,
            36 => Self::ChanGet,
            37 => Self::ChanNew,
            38 => Self::ChanDel,
            39 => Self::ChanSet,
            40 => Self::PipelineGet,
            41 => Self::PipelineNew,
            42 => Self::PipelineDel,
            43 => Self::PipelineSet,
            _ => return None,
        };
        Some(message_type)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Noop => "NOOP",
            Self::Error => "ERROR",
            Self::Done => "DONE",
            Self::Overrun => "OVERRUN",
            Self::Version => "VERSION",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::TopologyLock => "TOPOLOGY_LOCK",
            Self::TopologyTrylock => "TOPOLOGY_TRYLOCK",
            Self::TopologyUnlock => "TOPOLOGY_UNLOCK",
            Self::NodeGet => "NODE_GET",
            Self::NodeNew => "NODE_NEW",
            Self::NodeDel => "NODE_DEL",
            Self::NodeSet => "NODE_SET",
            Self::ChanGet => "CHAN_GET",
            Self::ChanNew => "CHAN_NEW",
            Self::ChanDel => "CHAN_DEL",
            Self::ChanSet => "CHAN_SET",
            Self::PipelineGet => "PIPELINE_GET",
            Self::PipelineNew => "PIPELINE_NEW",
            Self::PipelineDel => "PIPELINE_DEL",
            Self::PipelineSet => "PIPELINE_SET",
        }
    }
}

impl From<MessageType> for u16 {
    fn from(value: MessageType) -> Self {
        value.as_u16()
    }
}

/// Name of a raw message type, for tracing.
pub fn type_name(raw: u16) -> &'static str {
    MessageType::from_u16(raw)
        .map(MessageType::name)
        .unwrap_or("*INVALID*")
}

// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Protocol constants and attribute type numbers.

/// Port id of the control server.
pub const SERVER_PORT: u32 = 0;

/// Multicast group carrying topology change notifications.
pub const TOPOLOGY_GROUP: u32 = 1;

/// First sequence number used for topology notifications.
pub const NOTIFY_SEQ_START: u32 = 0xBEEF;

/// Protocol version reported by VERSION.
pub const VERSION_MAJOR: u32 = 1;
pub const VERSION_MINOR: u32 = 0;
pub const VERSION_SERVICE: u32 = 0;

/// Attributes of VERSION replies.
pub mod version_attr {
    pub const MAJOR: u16 = 1;
    pub const MINOR: u16 = 2;
    pub const SERVICE: u16 = 3;
}

/// Attributes of NODE_* messages.
pub mod node_attr {
    pub const ID: u16 = 1;
    pub const NAME: u16 = 2;
}

/// Attributes of CHAN_* messages.
pub mod chan_attr {
    pub const ID: u16 = 1;
    pub const NAME: u16 = 2;
    pub const FROM: u16 = 3;
    pub const TO: u16 = 4;
    /// Signed; -1 means unbounded.
    pub const MTU: u16 = 5;
    pub const PIPELINE_ID: u16 = 6;
}

/// Attributes of PIPELINE_* messages.
pub mod pipeline_attr {
    pub const ID: u16 = 1;
    pub const STATUS: u16 = 2;
    /// Repeated once per member channel, in path order.
    pub const CHAN_ID: u16 = 3;
    pub const MTU: u16 = 4;
}

// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Topology lock and deferred change notifications.

mod lock;
mod notifier;

pub use lock::{ImplicitHold, LockHolder, TopologyLock};
pub use notifier::Notifier;

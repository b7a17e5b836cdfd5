// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::HashMap;

use kstreamer_wire::MessageType;

use super::handlers::{self, Handler};

/// Lock requirement of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// No topology lock involvement.
    None,
    /// Reads the graph; never takes the lock.
    Read,
    /// Mutates the graph; runs under the topology lock, taken implicitly
    /// unless the requester holds it.
    Write,
}

#[derive(Clone, Copy)]
pub(crate) struct Command {
    pub message_type: MessageType,
    pub access: Access,
    pub handler: Handler,
}

/// Message type to handler map.
pub(crate) struct CommandTable {
    commands: HashMap<u16, Command>,
}

impl CommandTable {
    pub fn new() -> Self {
        use MessageType as T;

        let entries: [(MessageType, Access, Handler); 15] = [
            (T::Noop, Access::None, handlers::noop),
            (T::Done, Access::None, handlers::done),
            (T::Version, Access::None, handlers::version),
            (T::Begin, Access::None, handlers::lock),
            (T::Commit, Access::None, handlers::unlock),
            (T::Abort, Access::None, handlers::unlock),
            (T::TopologyLock, Access::None, handlers::lock),
            (T::TopologyTrylock, Access::None, handlers::trylock),
            (T::TopologyUnlock, Access::None, handlers::unlock),
            (T::NodeGet, Access::Read, handlers::node_get),
            (T::ChanGet, Access::Read, handlers::chan_get),
            (T::PipelineGet, Access::Read, handlers::pipeline_get),
            (T::PipelineNew, Access::Write, handlers::pipeline_new),
            (T::PipelineSet, Access::Write, handlers::pipeline_set),
            (T::PipelineDel, Access::Write, handlers::pipeline_del),
        ];

        let commands = entries
            .into_iter()
            .map(|(message_type, access, handler)| {
                (
                    message_type.as_u16(),
                    Command {
                        message_type,
                        access,
                        handler,
                    },
                )
            })
            .collect();
        Self { commands }
    }

    pub fn lookup(&self, raw_type: u16) -> Option<&Command> {
        self.commands.get(&raw_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let table = CommandTable::new();
        let cmd = table.lookup(MessageType::PipelineNew.as_u16()).unwrap();
        assert_eq!(cmd.access, Access::Write);
        assert_eq!(
            table.lookup(MessageType::PipelineGet.as_u16()).unwrap().access,
            Access::Read
        );
        assert!(table.lookup(MessageType::Error.as_u16()).is_none());
        assert!(table.lookup(MessageType::NodeNew.as_u16()).is_none());
        assert!(table.lookup(999).is_none());
    }
}

//! Command Handlers
//!
//! Every handler receives the parsed argument bag of its command and a
//! [`Context`](crate::dispatch::Context) with the session and the store:
//!
//! ```text
//! Dispatcher ──> Handler(ctx, args) ──> StorageEngine
//!                      │
//!                      └──> RespValue
//! ```
//!
//! Business failures (wrong type, not an integer, no such key) are sent as
//! error replies wrapped in `Ok`. `Err` is reserved for a handler and its
//! grammar disagreeing, which the dispatcher collapses into a generic reply.
//!
//! ## Modules
//!
//! - `strings`: GET SET GETDEL APPEND STRLEN INCR* DECR* MSET MGET
//! - `bitfield`: BITFIELD
//! - `keyspace`: DEL EXISTS EXPIRE* TTL PTTL PERSIST TYPE KEYS RENAME SORT
//! - `hashes`, `lists`, `sets`: the collection types
//! - `server`: PING ECHO TIME INFO QUIT DBSIZE FLUSHDB
//! - `transaction`: MULTI EXEC DISCARD WATCH UNWATCH
//! - `introspection`: COMMAND and its subcommands
//! - `client`: CLIENT and its subcommands

pub mod bitfield;
pub mod client;
pub mod hashes;
pub mod introspection;
pub mod keyspace;
pub mod lists;
pub mod server;
pub mod sets;
pub mod strings;
pub mod transaction;

use crate::args::{ArgError, ParsedArgs};
use crate::dispatch::{Registry, RegistryError};
use crate::protocol::RespValue;
use crate::storage::StoreError;
use bytes::Bytes;
use thiserror::Error;

/// A handler failure. Never shown to the client verbatim.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Arg(#[from] ArgError),

    #[error("{0}")]
    Internal(String),
}

pub type CommandResult = Result<RespValue, CommandError>;

/// Syntax error reply
pub(crate) const SYNTAX_ERROR: &str = "ERR syntax error";

impl From<StoreError> for RespValue {
    fn from(e: StoreError) -> Self {
        RespValue::error(e.to_string())
    }
}

/// Turns a store result into a reply, rendering failures as error replies.
pub(crate) fn reply(result: Result<RespValue, StoreError>) -> CommandResult {
    Ok(result.unwrap_or_else(RespValue::from))
}

/// Collects a repeated text argument.
pub(crate) fn texts(args: &ParsedArgs, name: &str) -> Result<Vec<Bytes>, ArgError> {
    args.list(name)?
        .iter()
        .map(|item| {
            item.as_text().cloned().ok_or_else(|| ArgError::WrongType {
                name: name.to_string(),
                expected: "text",
                found: item.type_name(),
            })
        })
        .collect()
}

/// Binds every built-in handler.
pub fn register_all(registry: &mut Registry) -> Result<(), RegistryError> {
    strings::register(registry)?;
    bitfield::register(registry)?;
    keyspace::register(registry)?;
    hashes::register(registry)?;
    lists::register(registry)?;
    sets::register(registry)?;
    server::register(registry)?;
    transaction::register(registry)?;
    introspection::register(registry)?;
    client::register(registry)?;
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::CommandTable;
    use std::sync::Arc;

    #[test]
    fn test_register_all_binds_every_leaf() {
        let table = Arc::new(CommandTable::builtin().unwrap());
        let mut registry = Registry::new(Arc::clone(&table));
        register_all(&mut registry).unwrap();

        for leaf in table.leaves() {
            assert!(registry.is_bound(&leaf.token), "{} is not bound", leaf.token);
        }
        assert_eq!(registry.len(), table.leaves().len());
    }

    #[test]
    fn test_register_all_twice_fails() {
        let mut registry = Registry::new(Arc::new(CommandTable::builtin().unwrap()));
        register_all(&mut registry).unwrap();
        assert!(matches!(
            register_all(&mut registry),
            Err(RegistryError::AlreadyBound(_))
        ));
    }
}

//! Handler Bindings
//!
//! A [`Registry`] pairs the immutable [`CommandTable`] with the execution
//! handlers bound to its leaf tokens. It is filled once during startup and
//! only read afterwards.

use super::session::Context;
use crate::args::ParsedArgs;
use crate::commands::CommandError;
use crate::protocol::RespValue;
use crate::spec::CommandTable;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// An execution handler.
///
/// Business failures (wrong type, not an integer, ...) are returned as
/// `Ok` error replies. An `Err` is collapsed into a generic reply.
pub type Handler = fn(&mut Context<'_>, &ParsedArgs) -> Result<RespValue, CommandError>;

/// Startup binding failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("cannot bind '{0}': no such command")]
    UnknownCommand(String),

    #[error("cannot bind '{0}': no introspection info")]
    MissingInfo(String),

    #[error("cannot bind '{0}': it has subcommands")]
    NotALeaf(String),

    #[error("cannot bind '{0}': already bound")]
    AlreadyBound(String),
}

/// Command table plus handler bindings.
#[derive(Debug, Clone)]
pub struct Registry {
    table: Arc<CommandTable>,
    handlers: BTreeMap<String, Handler>,
}

impl Registry {
    pub fn new(table: Arc<CommandTable>) -> Self {
        Self {
            table,
            handlers: BTreeMap::new(),
        }
    }

    /// Binds `handler` to a leaf token such as `get` or `client|kill`.
    pub fn bind(&mut self, token: &str, handler: Handler) -> Result<(), RegistryError> {
        let token = token.to_ascii_lowercase();
        let spec = self
            .table
            .get(&token)
            .ok_or_else(|| RegistryError::UnknownCommand(token.clone()))?;
        if self.table.info(&token).is_none() {
            return Err(RegistryError::MissingInfo(token));
        }
        if !spec.is_leaf() {
            return Err(RegistryError::NotALeaf(token));
        }
        if self.handlers.contains_key(&token) {
            return Err(RegistryError::AlreadyBound(token));
        }
        self.handlers.insert(token, handler);
        Ok(())
    }

    pub fn handler(&self, token: &str) -> Option<Handler> {
        self.handlers.get(token).copied()
    }

    pub fn is_bound(&self, token: &str) -> bool {
        self.handlers.contains_key(token)
    }

    /// Bound leaf tokens in sorted order.
    pub fn bound(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }

    /// Top-level commands with at least one bound leaf, sorted.
    pub fn active_commands(&self) -> Vec<&str> {
        let mut roots: Vec<&str> = self
            .bound()
            .map(|token| token.split('|').next().unwrap_or(token))
            .collect();
        roots.dedup();
        roots
    }

    pub fn table(&self) -> &CommandTable {
        &self.table
    }

    /// Number of bound leaf tokens.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

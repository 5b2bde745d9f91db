//! Per-Connection State and Handler Context

use super::dispatcher::{Dispatcher, Invocation};
use crate::connection::ClientHandle;
use crate::spec::CommandTable;
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;

/// Commands queued between `MULTI` and `EXEC`.
#[derive(Debug, Default)]
pub struct Transaction {
    queue: Vec<Invocation>,
    aborted: bool,
}

impl Transaction {
    pub fn push(&mut self, invocation: Invocation) {
        self.queue.push(invocation);
    }

    /// Marks the transaction so that `EXEC` refuses to run it.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn into_queue(self) -> Vec<Invocation> {
        self.queue
    }
}

/// State owned by one connection.
#[derive(Debug)]
pub struct Session {
    client: Arc<ClientHandle>,
    transaction: Option<Transaction>,
    watched: Vec<(Bytes, u64)>,
    closing: bool,
}

impl Session {
    pub fn new(client: Arc<ClientHandle>) -> Self {
        Self {
            client,
            transaction: None,
            watched: Vec::new(),
            closing: false,
        }
    }

    pub fn client(&self) -> &Arc<ClientHandle> {
        &self.client
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Opens a transaction. Returns false if one is already open.
    pub fn begin(&mut self) -> bool {
        if self.transaction.is_some() {
            return false;
        }
        self.transaction = Some(Transaction::default());
        true
    }

    pub fn transaction_mut(&mut self) -> Option<&mut Transaction> {
        self.transaction.as_mut()
    }

    /// Closes the open transaction and hands back its queue.
    pub fn take_transaction(&mut self) -> Option<Transaction> {
        self.transaction.take()
    }

    /// Records the version a key had when it was watched.
    pub fn watch(&mut self, key: Bytes, version: u64) {
        if !self.watched.iter().any(|(k, _)| *k == key) {
            self.watched.push((key, version));
        }
    }

    pub fn watched(&self) -> &[(Bytes, u64)] {
        &self.watched
    }

    pub fn unwatch(&mut self) {
        self.watched.clear();
    }

    /// Asks the connection to close after the current reply.
    pub fn close(&mut self) {
        self.closing = true;
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }
}

/// What a handler sees while it runs.
pub struct Context<'a> {
    pub dispatcher: &'a Dispatcher,
    pub session: &'a mut Session,
    /// Leaf token being executed (`client|kill`)
    pub token: &'a str,
    /// Raw arguments, command name included
    pub argv: &'a [Bytes],
}

impl Context<'_> {
    pub fn engine(&self) -> &StorageEngine {
        self.dispatcher.engine()
    }

    pub fn table(&self) -> &CommandTable {
        self.dispatcher.registry().table()
    }
}

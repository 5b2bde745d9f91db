//! # emukv - A Redis-Compatible Key-Value Server Driven by a Command Table
//!
//! emukv speaks RESP2 and implements its commands against a declarative
//! command table instead of hand-written parsing in every handler. The
//! table describes each command's argument grammar, key positions and
//! introspection metadata; three generic engines interpret it:
//!
//! - the **argument parser** turns raw request tokens into a typed
//!   [`ParsedArgs`](args::ParsedArgs) bag,
//! - the **dispatcher** resolves commands and subcommands, queues
//!   transactions and calls the bound handler,
//! - the **key extractor** finds the key arguments of any request
//!   (`COMMAND GETKEYS`).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                                emukv                                 │
//! │                                                                      │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐   ┌─────────────┐  │
//! │  │ TCP Server │──>│ Connection │──>│ Dispatcher │──>│  Handlers   │  │
//! │  │ (Listener) │   │  Handler   │   │            │   │ (commands)  │  │
//! │  └────────────┘   └────────────┘   └─────┬──────┘   └──────┬──────┘  │
//! │                                          │                 │         │
//! │         ┌────────────────────────────────┤                 ▼         │
//! │         ▼                                ▼          ┌─────────────┐  │
//! │  ┌──────────────┐               ┌────────────────┐  │StorageEngine│  │
//! │  │ CommandTable │<──────────────│ Argument Parser│  │  64 shards  │  │
//! │  │ (spec JSON)  │<──┐           └────────────────┘  └──────▲──────┘  │
//! │  └──────────────┘   │                                      │         │
//! │                     │  ┌───────────────┐        ┌──────────┴──────┐  │
//! │                     └──│ Key Extractor │        │  ExpirySweeper  │  │
//! │                        └───────────────┘        └─────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use emukv::commands::register_all;
//! use emukv::connection::handle_connection;
//! use emukv::dispatch::{Dispatcher, Registry};
//! use emukv::spec::CommandTable;
//! use emukv::storage::{start_expiry_sweeper, StorageEngine};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! let mut registry = Registry::new(Arc::new(CommandTable::builtin()?));
//! register_all(&mut registry)?;
//!
//! let storage = Arc::new(StorageEngine::new());
//! let _sweeper = start_expiry_sweeper(Arc::clone(&storage));
//! let dispatcher = Arc::new(Dispatcher::new(registry, storage));
//!
//! let listener = TcpListener::bind("127.0.0.1:6379").await?;
//! loop {
//!     let (stream, addr) = listener.accept().await?;
//!     tokio::spawn(handle_connection(stream, addr, Arc::clone(&dispatcher)));
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`spec`]: command grammar model and the embedded command table
//! - [`args`]: the argument parser
//! - [`dispatch`]: handler registry, dispatcher, sessions and transactions
//! - [`keys`]: key extraction from key specs
//! - [`commands`]: command handlers
//! - [`storage`]: sharded typed store with lazy and active expiry
//! - [`protocol`]: RESP2 codec
//! - [`connection`]: per-client connection loop and client registry
//! - [`config`]: command-line configuration

pub mod args;
pub mod commands;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod keys;
pub mod protocol;
pub mod spec;
pub mod storage;

pub use config::Config;
pub use connection::{handle_connection, ConnectionStats};
pub use dispatch::{Dispatcher, Registry};
pub use protocol::{ParseError, RespParser, RespValue};
pub use spec::CommandTable;
pub use storage::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper, StorageEngine};

/// The default port emukv listens on (same as Redis)
pub const DEFAULT_PORT: u16 = 6379;

/// The default host emukv binds to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of emukv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Command Dispatch
//!
//! Binds parsed commands to execution handlers.
//!
//! - `registry`: the [`Registry`] of handler bindings, filled at startup
//! - `dispatcher`: [`Dispatcher::prepare`] / [`Dispatcher::dispatch`] and
//!   the request error texts
//! - `session`: per-connection [`Session`] state, the `MULTI` queue and the
//!   [`Context`] handed to handlers
//!
//! ## Example
//!
//! ```
//! use emukv::commands::register_all;
//! use emukv::dispatch::{Dispatcher, Registry};
//! use emukv::protocol::RespValue;
//! use emukv::spec::CommandTable;
//! use emukv::storage::StorageEngine;
//! use std::sync::Arc;
//!
//! let mut registry = Registry::new(Arc::new(CommandTable::builtin().unwrap()));
//! register_all(&mut registry).unwrap();
//! let dispatcher = Dispatcher::new(registry, Arc::new(StorageEngine::new()));
//!
//! let mut session = dispatcher.open_session("127.0.0.1:50000", "127.0.0.1:6379");
//! let ping = RespValue::array(vec![RespValue::bulk_str("PING")]);
//! assert_eq!(dispatcher.execute(ping, &mut session), RespValue::pong());
//! ```

pub mod dispatcher;
pub mod registry;
pub mod session;

pub use dispatcher::{DispatchError, Dispatcher, Invocation, Prepared, HANDLER_FAILURE};
pub use registry::{Handler, Registry, RegistryError};
pub use session::{Context, Session, Transaction};

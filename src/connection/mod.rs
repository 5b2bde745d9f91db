//! Client Connections
//!
//! Every accepted socket is served by its own [`ConnectionHandler`] task.
//! The handler decodes RESP requests, hands them to the shared
//! [`Dispatcher`](crate::dispatch::Dispatcher) together with the
//! connection's session, and writes the replies back in order.
//!
//! ```text
//!   TcpListener ── accept() ──> spawn(handle_connection)
//!                                     │
//!                                     ▼
//!                            ConnectionHandler<S>
//!                     read ─> decode ─> execute ─> reply
//!                                     │
//!                                     ▼
//!                  ClientRegistry (CLIENT LIST / KILL / INFO)
//! ```
//!
//! [`ClientRegistry`] tracks the live connections so one client can list
//! or kill another. A killed client's loop wakes up and exits on its next
//! turn.

pub mod clients;
pub mod handler;

pub use clients::{ClientHandle, ClientRegistry};
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};

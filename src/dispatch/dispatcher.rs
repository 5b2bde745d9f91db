//! Request Dispatch
//!
//! ```text
//! RespValue ──prepare──> Invocation ──dispatch──> Handler ──> RespValue
//!                 │
//!                 └── in MULTI: queued, replies +QUEUED
//! ```
//!
//! `prepare` validates the request shape, resolves the command through the
//! subcommand tree and parses its arguments. `dispatch` runs the handler
//! bound to the resolved leaf.

use super::registry::Registry;
use super::session::{Context, Session};
use crate::args::{parse_command, ParseOptions, ParsedArgs};
use crate::connection::{ClientRegistry, ConnectionStats};
use crate::protocol::RespValue;
use crate::storage::StorageEngine;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

/// Reply for any handler failure.
pub const HANDLER_FAILURE: &str = "ERR unknown command or wrong number of arguments";

/// Top-level commands that are never queued inside `MULTI`.
const TRANSACTION_CONTROL: [&str; 4] = ["multi", "exec", "discard", "watch"];

/// Longest argument echo in an unknown-command reply.
const ECHO_LIMIT: usize = 128;

/// Request rejections. The `Display` text is the error reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("ERR invalid command format")]
    InvalidFormat,

    #[error("ERR empty command")]
    EmptyCommand,

    #[error("ERR invalid command name")]
    InvalidName,

    #[error("ERR unknown command '{name}', with args beginning with: {args}")]
    UnknownCommand { name: String, args: String },

    #[error("ERR unknown subcommand '{name}'. Try {command} HELP.")]
    UnknownSubcommand { name: String, command: String },

    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),
}

/// A parsed command ready to run.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Leaf token (`get`, `client|kill`)
    pub token: String,
    pub argv: Vec<Bytes>,
    pub args: ParsedArgs,
}

/// Outcome of [`Dispatcher::prepare`].
#[derive(Debug)]
pub enum Prepared {
    Ready(Invocation),
    /// Appended to the open transaction
    Queued,
}

/// Server-wide command execution state, shared by all connections.
#[derive(Debug)]
pub struct Dispatcher {
    registry: Registry,
    engine: Arc<StorageEngine>,
    clients: ClientRegistry,
    stats: ConnectionStats,
    started: Instant,
}

impl Dispatcher {
    pub fn new(registry: Registry, engine: Arc<StorageEngine>) -> Self {
        Self {
            registry,
            engine,
            clients: ClientRegistry::new(),
            stats: ConnectionStats::new(),
            started: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    pub fn clients(&self) -> &ClientRegistry {
        &self.clients
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Registers a client and creates its session.
    pub fn open_session(&self, addr: impl Into<String>, laddr: impl Into<String>) -> Session {
        Session::new(self.clients.register(addr, laddr))
    }

    pub fn close_session(&self, session: &Session) {
        self.clients.unregister(session.client().id());
    }

    /// Prepares and runs one request, returning the reply to send.
    pub fn execute(&self, request: RespValue, session: &mut Session) -> RespValue {
        match self.prepare(request, session) {
            Ok(Prepared::Ready(invocation)) => self.dispatch(session, &invocation),
            Ok(Prepared::Queued) => RespValue::simple_string("QUEUED"),
            Err(e) => RespValue::error(e.to_string()),
        }
    }

    /// Validates, resolves and parses a request.
    ///
    /// Inside an open transaction, everything but the transaction control
    /// commands is queued, and any rejection aborts the transaction.
    pub fn prepare(&self, request: RespValue, session: &mut Session) -> Result<Prepared, DispatchError> {
        let result = self.resolve(request);
        let Some(transaction) = session.transaction_mut() else {
            return result.map(Prepared::Ready);
        };

        match result {
            Ok(invocation) => {
                let root = invocation.token.split('|').next().unwrap_or_default();
                if TRANSACTION_CONTROL.contains(&root) {
                    Ok(Prepared::Ready(invocation))
                } else {
                    transaction.push(invocation);
                    Ok(Prepared::Queued)
                }
            }
            Err(e) => {
                transaction.abort();
                Err(e)
            }
        }
    }

    fn resolve(&self, request: RespValue) -> Result<Invocation, DispatchError> {
        let argv = request_argv(request)?;
        let name = std::str::from_utf8(&argv[0])
            .map_err(|_| DispatchError::InvalidName)?
            .to_ascii_lowercase();

        let spec = self
            .registry
            .table()
            .get(&name)
            .filter(|_| !name.contains('|'))
            .ok_or_else(|| unknown_command(&argv))?;

        // COMMAND GETKEYS* take an arbitrary command line after their first
        // argument, which the grammar cannot describe.
        let mut input = &argv[..];
        if name == "command" && argv.len() > 3 && is_getkeys(&argv[1]) {
            input = &argv[..3];
        }

        let outcome = parse_command(spec, input, ParseOptions::for_command(&name));
        if outcome.depth == 0 {
            debug!(command = %outcome.token(), "Argument parse failed");
            return Err(DispatchError::WrongArity(outcome.token().to_string()));
        }
        if outcome.depth < 0 {
            let unknown = outcome.unknown_subcommand.as_deref().unwrap_or_default();
            return Err(DispatchError::UnknownSubcommand {
                name: String::from_utf8_lossy(unknown).into_owned(),
                command: outcome.token().replace('|', " ").to_ascii_uppercase(),
            });
        }

        Ok(Invocation {
            token: outcome.spec.token.clone(),
            args: outcome.args,
            argv,
        })
    }

    /// Runs the handler bound to an invocation.
    pub fn dispatch(&self, session: &mut Session, invocation: &Invocation) -> RespValue {
        let Some(handler) = self.registry.handler(&invocation.token) else {
            return RespValue::error(format!("ERR unsupported command '{}'", invocation.token));
        };

        session.client().touch(&invocation.token);
        let mut ctx = Context {
            dispatcher: self,
            session,
            token: &invocation.token,
            argv: &invocation.argv,
        };
        match handler(&mut ctx, &invocation.args) {
            Ok(reply) => reply,
            Err(e) => {
                debug!(command = %invocation.token, error = %e, "Handler failed");
                RespValue::error(HANDLER_FAILURE)
            }
        }
    }
}

/// Flattens a request into its raw argument list.
fn request_argv(request: RespValue) -> Result<Vec<Bytes>, DispatchError> {
    let RespValue::Array(items) = request else {
        return Err(DispatchError::InvalidFormat);
    };
    if items.is_empty() {
        return Err(DispatchError::EmptyCommand);
    }

    let mut argv = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let arg = match item {
            RespValue::BulkString(b) => b,
            RespValue::SimpleString(s) => Bytes::from(s),
            RespValue::Integer(n) if i > 0 => Bytes::from(n.to_string()),
            _ if i == 0 => return Err(DispatchError::InvalidName),
            _ => return Err(DispatchError::InvalidFormat),
        };
        argv.push(arg);
    }
    Ok(argv)
}

fn unknown_command(argv: &[Bytes]) -> DispatchError {
    let mut args = String::new();
    for arg in &argv[1..] {
        if args.len() >= ECHO_LIMIT {
            break;
        }
        let text = String::from_utf8_lossy(arg);
        let room = ECHO_LIMIT - args.len();
        let shown: String = text.chars().take(room).collect();
        args.push_str(&format!("'{}' ", shown));
    }
    DispatchError::UnknownCommand {
        name: String::from_utf8_lossy(&argv[0]).chars().take(ECHO_LIMIT).collect(),
        args,
    }
}

fn is_getkeys(word: &[u8]) -> bool {
    word.eq_ignore_ascii_case(b"getkeys") || word.eq_ignore_ascii_case(b"getkeysandflags")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandError;
    use crate::spec::CommandTable;

    fn echo_token(ctx: &mut Context<'_>, _: &ParsedArgs) -> Result<RespValue, CommandError> {
        Ok(RespValue::bulk_str(ctx.token))
    }

    fn failing(_: &mut Context<'_>, _: &ParsedArgs) -> Result<RespValue, CommandError> {
        Err(CommandError::Internal("boom".into()))
    }

    fn multi(ctx: &mut Context<'_>, _: &ParsedArgs) -> Result<RespValue, CommandError> {
        ctx.session.begin();
        Ok(RespValue::ok())
    }

    fn dispatcher() -> Dispatcher {
        let mut registry = Registry::new(Arc::new(CommandTable::builtin().unwrap()));
        for token in ["set", "get", "client|kill", "command|getkeys", "bitfield"] {
            registry.bind(token, echo_token).unwrap();
        }
        registry.bind("incr", failing).unwrap();
        registry.bind("multi", multi).unwrap();
        Dispatcher::new(registry, Arc::new(StorageEngine::new()))
    }

    fn request(words: &[&str]) -> RespValue {
        RespValue::array(words.iter().map(|w| RespValue::bulk_str(w)).collect())
    }

    fn run(dispatcher: &Dispatcher, session: &mut Session, words: &[&str]) -> RespValue {
        dispatcher.execute(request(words), session)
    }

    #[test]
    fn test_malformed_requests() {
        let d = dispatcher();
        let mut s = d.open_session("a", "b");
        assert_eq!(
            d.execute(RespValue::bulk_str("GET"), &mut s),
            RespValue::error("ERR invalid command format")
        );
        assert_eq!(
            d.execute(RespValue::array(vec![]), &mut s),
            RespValue::error("ERR empty command")
        );
        assert_eq!(
            d.execute(RespValue::array(vec![RespValue::Integer(1)]), &mut s),
            RespValue::error("ERR invalid command name")
        );
    }

    #[test]
    fn test_unknown_command_echoes_args() {
        let d = dispatcher();
        let mut s = d.open_session("a", "b");
        assert_eq!(
            run(&d, &mut s, &["FOO", "a", "b"]),
            RespValue::error("ERR unknown command 'FOO', with args beginning with: 'a' 'b' ")
        );
        assert_eq!(
            run(&d, &mut s, &["client|kill", "x"]),
            RespValue::error("ERR unknown command 'client|kill', with args beginning with: 'x' ")
        );
    }

    #[test]
    fn test_subcommand_errors() {
        let d = dispatcher();
        let mut s = d.open_session("a", "b");
        assert_eq!(
            run(&d, &mut s, &["CLIENT", "bogus"]),
            RespValue::error("ERR unknown subcommand 'bogus'. Try CLIENT HELP.")
        );
        assert_eq!(
            run(&d, &mut s, &["CLIENT"]),
            RespValue::error("ERR wrong number of arguments for 'client' command")
        );
        assert_eq!(
            run(&d, &mut s, &["client", "kill"]),
            RespValue::error("ERR wrong number of arguments for 'client|kill' command")
        );
    }

    #[test]
    fn test_dispatch_to_leaf() {
        let d = dispatcher();
        let mut s = d.open_session("a", "b");
        assert_eq!(run(&d, &mut s, &["Set", "k", "v", "NX"]), RespValue::bulk_str("set"));
        assert_eq!(
            run(&d, &mut s, &["client", "KILL", "127.0.0.1:1"]),
            RespValue::bulk_str("client|kill")
        );
    }

    #[test]
    fn test_unbound_and_failing_handlers() {
        let d = dispatcher();
        let mut s = d.open_session("a", "b");
        assert_eq!(
            run(&d, &mut s, &["DEL", "k"]),
            RespValue::error("ERR unsupported command 'del'")
        );
        assert_eq!(run(&d, &mut s, &["INCR", "k"]), RespValue::error(HANDLER_FAILURE));
    }

    #[test]
    fn test_getkeys_parses_only_command_name() {
        let d = dispatcher();
        let mut s = d.open_session("a", "b");
        let Prepared::Ready(inv) = d
            .prepare(request(&["COMMAND", "GETKEYS", "SET", "k", "v", "NX"]), &mut s)
            .unwrap()
        else {
            panic!("expected a ready invocation");
        };
        assert_eq!(inv.token, "command|getkeys");
        assert_eq!(inv.argv.len(), 6);
        assert_eq!(inv.args.text("command").unwrap().as_ref(), b"SET");
    }

    #[test]
    fn test_bitfield_keeps_integers_as_text() {
        let d = dispatcher();
        let mut s = d.open_session("a", "b");
        let Prepared::Ready(inv) = d
            .prepare(request(&["BITFIELD", "k", "GET", "u8", "#1"]), &mut s)
            .unwrap()
        else {
            panic!("expected a ready invocation");
        };
        assert_eq!(inv.token, "bitfield");
    }

    #[test]
    fn test_transaction_queues_and_aborts() {
        let d = dispatcher();
        let mut s = d.open_session("a", "b");
        assert_eq!(run(&d, &mut s, &["MULTI"]), RespValue::ok());
        assert_eq!(run(&d, &mut s, &["GET", "k"]), RespValue::simple_string("QUEUED"));
        assert_eq!(s.transaction_mut().unwrap().len(), 1);
        assert!(!s.transaction_mut().unwrap().is_aborted());

        assert!(run(&d, &mut s, &["GET"]).is_error());
        assert!(s.transaction_mut().unwrap().is_aborted());
        assert_eq!(s.transaction_mut().unwrap().len(), 1);
    }
}

//! Transaction Commands
//!
//! `MULTI` opens a queue on the session and the dispatcher queues every
//! later command until `EXEC` or `DISCARD`. `WATCH` records the version of
//! each key; `EXEC` refuses to run if any of them moved.

use super::{texts, CommandResult};
use crate::args::ParsedArgs;
use crate::dispatch::{Context, Registry, RegistryError};
use crate::protocol::RespValue;
use tracing::debug;

pub(crate) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.bind("multi", multi)?;
    registry.bind("exec", exec)?;
    registry.bind("discard", discard)?;
    registry.bind("watch", watch)?;
    registry.bind("unwatch", unwatch)?;
    Ok(())
}

fn multi(ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    if ctx.session.begin() {
        Ok(RespValue::ok())
    } else {
        Ok(RespValue::error("ERR MULTI calls can not be nested"))
    }
}

fn exec(ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    let Some(transaction) = ctx.session.take_transaction() else {
        return Ok(RespValue::error("ERR EXEC without MULTI"));
    };

    let dirty = ctx
        .session
        .watched()
        .iter()
        .any(|(key, version)| ctx.engine().version(key) != *version);
    ctx.session.unwatch();

    if transaction.is_aborted() {
        return Ok(RespValue::error(
            "EXECABORT Transaction discarded because of previous errors.",
        ));
    }
    if dirty {
        debug!(queued = transaction.len(), "Watched key changed, transaction not run");
        return Ok(RespValue::NullArray);
    }

    let dispatcher = ctx.dispatcher;
    let replies = transaction
        .into_queue()
        .iter()
        .map(|invocation| dispatcher.dispatch(ctx.session, invocation))
        .collect();
    Ok(RespValue::array(replies))
}

fn discard(ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    if ctx.session.take_transaction().is_none() {
        return Ok(RespValue::error("ERR DISCARD without MULTI"));
    }
    ctx.session.unwatch();
    Ok(RespValue::ok())
}

fn watch(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    if ctx.session.in_transaction() {
        return Ok(RespValue::error("ERR WATCH inside MULTI is not allowed"));
    }
    for key in texts(args, "key")? {
        let version = ctx.engine().version(&key);
        ctx.session.watch(key, version);
    }
    Ok(RespValue::ok())
}

fn unwatch(ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    ctx.session.unwatch();
    Ok(RespValue::ok())
}

#[cfg(test)]
mod tests {
    use crate::commands::testing::{bulk, run, server};
    use crate::protocol::RespValue;

    fn queued() -> RespValue {
        RespValue::simple_string("QUEUED")
    }

    #[test]
    fn test_multi_exec() {
        let (d, mut s) = server();
        assert_eq!(run(&d, &mut s, "MULTI"), RespValue::ok());
        assert_eq!(run(&d, &mut s, "SET k 1"), queued());
        assert_eq!(run(&d, &mut s, "INCR k"), queued());
        assert_eq!(run(&d, &mut s, "GET k"), queued());
        assert_eq!(
            run(&d, &mut s, "EXEC"),
            RespValue::array(vec![RespValue::ok(), RespValue::integer(2), bulk("2")])
        );
        assert!(!s.in_transaction());
    }

    #[test]
    fn test_errors_outside_and_inside_multi() {
        let (d, mut s) = server();
        assert_eq!(run(&d, &mut s, "EXEC"), RespValue::error("ERR EXEC without MULTI"));
        assert_eq!(
            run(&d, &mut s, "DISCARD"),
            RespValue::error("ERR DISCARD without MULTI")
        );
        run(&d, &mut s, "MULTI");
        assert_eq!(
            run(&d, &mut s, "MULTI"),
            RespValue::error("ERR MULTI calls can not be nested")
        );
        assert_eq!(
            run(&d, &mut s, "WATCH k"),
            RespValue::error("ERR WATCH inside MULTI is not allowed")
        );
        assert_eq!(run(&d, &mut s, "DISCARD"), RespValue::ok());
        assert!(!s.in_transaction());
    }

    #[test]
    fn test_queue_error_aborts() {
        let (d, mut s) = server();
        run(&d, &mut s, "MULTI");
        assert_eq!(run(&d, &mut s, "SET k v"), queued());
        assert!(run(&d, &mut s, "GET").is_error());
        assert_eq!(
            run(&d, &mut s, "EXEC"),
            RespValue::error("EXECABORT Transaction discarded because of previous errors.")
        );
        assert_eq!(run(&d, &mut s, "GET k"), RespValue::Null);
    }

    #[test]
    fn test_runtime_errors_do_not_abort() {
        let (d, mut s) = server();
        run(&d, &mut s, "SET str v");
        run(&d, &mut s, "MULTI");
        run(&d, &mut s, "INCR str");
        run(&d, &mut s, "SET k v");
        let replies = run(&d, &mut s, "EXEC").into_array().unwrap();
        assert!(replies[0].is_error());
        assert_eq!(replies[1], RespValue::ok());
    }

    #[test]
    fn test_watch() {
        let (d, mut s) = server();
        let mut other = d.open_session("127.0.0.1:50001", "127.0.0.1:6379");

        assert_eq!(run(&d, &mut s, "WATCH k"), RespValue::ok());
        run(&d, &mut other, "SET k changed");
        run(&d, &mut s, "MULTI");
        run(&d, &mut s, "SET k mine");
        assert_eq!(run(&d, &mut s, "EXEC"), RespValue::NullArray);
        assert_eq!(run(&d, &mut s, "GET k"), bulk("changed"));

        // Watches are cleared by EXEC.
        run(&d, &mut s, "MULTI");
        run(&d, &mut s, "SET k mine");
        assert_eq!(run(&d, &mut s, "EXEC"), RespValue::array(vec![RespValue::ok()]));
    }

    #[test]
    fn test_watch_untouched_and_unwatch() {
        let (d, mut s) = server();
        run(&d, &mut s, "WATCH absent");
        run(&d, &mut s, "MULTI");
        run(&d, &mut s, "PING");
        assert_eq!(run(&d, &mut s, "EXEC"), RespValue::array(vec![RespValue::pong()]));

        run(&d, &mut s, "WATCH k");
        run(&d, &mut s, "SET k v");
        assert_eq!(run(&d, &mut s, "UNWATCH"), RespValue::ok());
        run(&d, &mut s, "MULTI");
        assert_eq!(run(&d, &mut s, "EXEC"), RespValue::array(vec![]));
    }
}

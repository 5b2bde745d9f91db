//! String Commands

use super::{reply, texts, CommandResult};
use crate::args::ParsedArgs;
use crate::dispatch::{Context, Registry, RegistryError};
use crate::protocol::RespValue;
use crate::storage::{deadline_from_unix_ms, StoreError, Value};
use std::time::{Duration, Instant};

pub(crate) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.bind("get", get)?;
    registry.bind("set", set)?;
    registry.bind("getdel", getdel)?;
    registry.bind("append", append)?;
    registry.bind("strlen", strlen)?;
    registry.bind("incr", incr)?;
    registry.bind("decr", decr)?;
    registry.bind("incrby", incrby)?;
    registry.bind("decrby", decrby)?;
    registry.bind("incrbyfloat", incrbyfloat)?;
    registry.bind("mset", mset)?;
    registry.bind("mget", mget)?;
    Ok(())
}

fn get(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    reply(ctx.engine().get_string(key).map(|value| match value {
        Some(v) => RespValue::BulkString(v),
        None => RespValue::Null,
    }))
}

/// What SET does with the key's expiry.
enum Expiry {
    Clear,
    Keep,
    At(Instant),
}

fn set_expiry(args: &ParsedArgs) -> Result<Expiry, RespValue> {
    let Some((branch, value)) = args.one_of("expiration") else {
        return Ok(Expiry::Clear);
    };
    if branch == "keepttl" {
        return Ok(Expiry::Keep);
    }

    let invalid = || RespValue::error("ERR invalid expire time in 'set' command");
    let n = value.as_integer().ok_or_else(invalid)?;
    if n <= 0 {
        return Err(invalid());
    }
    let ms = match branch {
        "seconds" | "unix-time-seconds" => n.checked_mul(1000).ok_or_else(invalid)?,
        _ => n,
    };
    Ok(match branch {
        "seconds" | "milliseconds" => Expiry::At(Instant::now() + Duration::from_millis(ms as u64)),
        _ => Expiry::At(deadline_from_unix_ms(ms)),
    })
}

fn set(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?.clone();
    let value = args.text("value")?.clone();
    let condition = args.one_of("condition").map(|(branch, _)| branch);
    let want_old = args.contains("get");

    let expiry = match set_expiry(args) {
        Ok(expiry) => expiry,
        Err(e) => return Ok(e),
    };

    let result = ctx.engine().update(&key, |slot| {
        let old = if want_old {
            slot.string()?.cloned()
        } else {
            None
        };
        let allowed = match condition {
            Some("nx") => !slot.exists(),
            Some("xx") => slot.exists(),
            _ => true,
        };
        if allowed {
            let value = Value::String(value);
            match expiry {
                Expiry::Clear => slot.put(value),
                Expiry::Keep => slot.put_keep_ttl(value),
                Expiry::At(at) => slot.put_with_expiry(value, Some(at)),
            }
        }
        Ok::<_, StoreError>((allowed, old))
    });

    reply(result.map(|(allowed, old)| {
        if want_old {
            old.map(RespValue::BulkString).unwrap_or(RespValue::Null)
        } else if allowed {
            RespValue::ok()
        } else {
            RespValue::Null
        }
    }))
}

fn getdel(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    reply(ctx.engine().update(key, |slot| {
        let value = slot.string()?.cloned();
        if value.is_some() {
            slot.remove();
        }
        Ok::<_, StoreError>(value.map(RespValue::BulkString).unwrap_or(RespValue::Null))
    }))
}

fn append(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let suffix = args.text("value")?;
    reply(ctx.engine().append(key, suffix).map(|len| RespValue::integer(len as i64)))
}

fn strlen(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    reply(ctx.engine().view(key, |value| match value {
        None => Ok(RespValue::integer(0)),
        Some(Value::String(s)) => Ok(RespValue::integer(s.len() as i64)),
        Some(_) => Err(StoreError::WrongType),
    }))
}

fn incr_by(ctx: &Context<'_>, args: &ParsedArgs, delta: i64) -> CommandResult {
    let key = args.text("key")?;
    reply(ctx.engine().incr_by(key, delta).map(RespValue::integer))
}

fn incr(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    incr_by(ctx, args, 1)
}

fn decr(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    incr_by(ctx, args, -1)
}

fn incrby(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let delta = args.integer("increment")?;
    incr_by(ctx, args, delta)
}

fn decrby(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    match args.integer("decrement")?.checked_neg() {
        Some(delta) => incr_by(ctx, args, delta),
        None => Ok(RespValue::error("ERR decrement would overflow")),
    }
}

fn incrbyfloat(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let delta = args.double("increment")?;
    reply(ctx.engine().incr_by_float(key, delta).map(RespValue::double))
}

fn mset(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    for pair in args.list("data")? {
        let Some(pair) = pair.as_nested() else {
            continue;
        };
        ctx.engine()
            .set_string(pair.text("key")?.clone(), pair.text("value")?.clone());
    }
    Ok(RespValue::ok())
}

fn mget(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let values = texts(args, "key")?
        .iter()
        .map(|key| match ctx.engine().get_string(key) {
            Ok(Some(v)) => RespValue::BulkString(v),
            _ => RespValue::Null,
        })
        .collect();
    Ok(RespValue::array(values))
}

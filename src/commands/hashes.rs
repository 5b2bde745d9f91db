//! Hash Commands

use super::{reply, texts, CommandResult};
use crate::args::ParsedArgs;
use crate::dispatch::{Context, Registry, RegistryError};
use crate::protocol::RespValue;
use crate::storage::{format_float, parse_f64, parse_i64, StoreError, Value};
use bytes::Bytes;
use std::collections::HashMap;

pub(crate) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.bind("hset", hset)?;
    registry.bind("hsetnx", hsetnx)?;
    registry.bind("hget", hget)?;
    registry.bind("hmget", hmget)?;
    registry.bind("hdel", hdel)?;
    registry.bind("hgetall", hgetall)?;
    registry.bind("hexists", hexists)?;
    registry.bind("hlen", hlen)?;
    registry.bind("hkeys", hkeys)?;
    registry.bind("hvals", hvals)?;
    registry.bind("hincrby", hincrby)?;
    registry.bind("hincrbyfloat", hincrbyfloat)?;
    Ok(())
}

/// Runs `f` against the hash at `key`, with `None` for a missing key.
fn read_hash<R>(
    ctx: &Context<'_>,
    key: &[u8],
    f: impl FnOnce(Option<&HashMap<Bytes, Bytes>>) -> R,
) -> Result<R, StoreError> {
    ctx.engine().view(key, |value| match value {
        None => Ok(f(None)),
        Some(Value::Hash(h)) => Ok(f(Some(h))),
        Some(_) => Err(StoreError::WrongType),
    })
}

fn hset(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let mut pairs = Vec::new();
    for pair in args.list("data")? {
        if let Some(pair) = pair.as_nested() {
            pairs.push((pair.text("field")?.clone(), pair.text("value")?.clone()));
        }
    }

    reply(ctx.engine().update(key, |slot| {
        let hash = slot.hash_or_insert()?;
        let added = pairs
            .into_iter()
            .filter(|(field, value)| hash.insert(field.clone(), value.clone()).is_none())
            .count();
        Ok::<_, StoreError>(RespValue::integer(added as i64))
    }))
}

fn hsetnx(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let field = args.text("field")?;
    let value = args.text("value")?;

    reply(ctx.engine().update(key, |slot| {
        if slot.hash()?.is_some_and(|h| h.contains_key(field)) {
            return Ok(RespValue::integer(0));
        }
        slot.hash_or_insert()?.insert(field.clone(), value.clone());
        Ok::<_, StoreError>(RespValue::integer(1))
    }))
}

fn hget(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let field = args.text("field")?;
    reply(read_hash(ctx, args.text("key")?, |hash| {
        hash.and_then(|h| h.get(field))
            .map_or(RespValue::Null, |v| RespValue::BulkString(v.clone()))
    }))
}

fn hmget(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let fields = texts(args, "field")?;
    reply(read_hash(ctx, args.text("key")?, |hash| {
        RespValue::array(
            fields
                .iter()
                .map(|field| {
                    hash.and_then(|h| h.get(field))
                        .map_or(RespValue::Null, |v| RespValue::BulkString(v.clone()))
                })
                .collect(),
        )
    }))
}

fn hdel(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let fields = texts(args, "field")?;
    reply(ctx.engine().update(key, |slot| {
        let removed = match slot.hash_mut()? {
            Some(hash) => fields.iter().filter(|f| hash.remove(*f).is_some()).count(),
            None => 0,
        };
        Ok::<_, StoreError>(RespValue::integer(removed as i64))
    }))
}

fn hgetall(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    reply(read_hash(ctx, args.text("key")?, |hash| {
        RespValue::map(
            hash.into_iter()
                .flatten()
                .map(|(f, v)| (RespValue::BulkString(f.clone()), RespValue::BulkString(v.clone())))
                .collect(),
        )
    }))
}

fn hexists(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let field = args.text("field")?;
    reply(read_hash(ctx, args.text("key")?, |hash| {
        RespValue::integer(i64::from(hash.is_some_and(|h| h.contains_key(field))))
    }))
}

fn hlen(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    reply(read_hash(ctx, args.text("key")?, |hash| {
        RespValue::integer(hash.map_or(0, HashMap::len) as i64)
    }))
}

fn hkeys(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    reply(read_hash(ctx, args.text("key")?, |hash| {
        RespValue::bulk_array(hash.into_iter().flat_map(|h| h.keys().cloned()))
    }))
}

fn hvals(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    reply(read_hash(ctx, args.text("key")?, |hash| {
        RespValue::bulk_array(hash.into_iter().flat_map(|h| h.values().cloned()))
    }))
}

fn hincrby(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let field = args.text("field")?;
    let delta = args.integer("increment")?;

    reply(ctx.engine().update(key, |slot| {
        let hash = slot.hash_or_insert()?;
        let current = match hash.get(field) {
            None => 0,
            Some(raw) => parse_i64(raw).ok_or(StoreError::HashNotInteger)?,
        };
        let updated = current.checked_add(delta).ok_or(StoreError::Overflow)?;
        hash.insert(field.clone(), Bytes::from(updated.to_string()));
        Ok::<_, StoreError>(RespValue::integer(updated))
    }))
}

fn hincrbyfloat(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let field = args.text("field")?;
    let delta = args.double("increment")?;

    reply(ctx.engine().update(key, |slot| {
        let hash = slot.hash_or_insert()?;
        let current = match hash.get(field) {
            None => 0.0,
            Some(raw) => parse_f64(raw).ok_or(StoreError::HashNotFloat)?,
        };
        let updated = current + delta;
        if !updated.is_finite() {
            return Err(StoreError::NotFinite);
        }
        hash.insert(field.clone(), Bytes::from(format_float(updated)));
        Ok::<_, StoreError>(RespValue::double(updated))
    }))
}

//! Set Commands

use super::{reply, texts, CommandResult, SYNTAX_ERROR};
use crate::args::ParsedArgs;
use crate::dispatch::{Context, Registry, RegistryError};
use crate::protocol::RespValue;
use crate::storage::{StoreError, Value};
use bytes::Bytes;
use std::collections::HashSet;

pub(crate) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.bind("sadd", sadd)?;
    registry.bind("srem", srem)?;
    registry.bind("smembers", smembers)?;
    registry.bind("sismember", sismember)?;
    registry.bind("smismember", smismember)?;
    registry.bind("scard", scard)?;
    registry.bind("sinter", sinter)?;
    registry.bind("sunion", sunion)?;
    registry.bind("sdiff", sdiff)?;
    registry.bind("sintercard", sintercard)?;
    Ok(())
}

fn read_set<R>(
    ctx: &Context<'_>,
    key: &[u8],
    f: impl FnOnce(Option<&HashSet<Bytes>>) -> R,
) -> Result<R, StoreError> {
    ctx.engine().view(key, |value| match value {
        None => Ok(f(None)),
        Some(Value::Set(s)) => Ok(f(Some(s))),
        Some(_) => Err(StoreError::WrongType),
    })
}

/// Snapshots the sets at `keys`; missing keys read as empty sets.
fn load_sets(ctx: &Context<'_>, keys: &[Bytes]) -> Result<Vec<HashSet<Bytes>>, StoreError> {
    keys.iter()
        .map(|key| read_set(ctx, key, |set| set.cloned().unwrap_or_default()))
        .collect()
}

fn intersect(sets: Vec<HashSet<Bytes>>) -> HashSet<Bytes> {
    let mut sets = sets.into_iter();
    let Some(first) = sets.next() else {
        return HashSet::new();
    };
    sets.fold(first, |acc, set| acc.into_iter().filter(|m| set.contains(m)).collect())
}

fn sadd(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let members = texts(args, "member")?;
    reply(ctx.engine().update(key, |slot| {
        let set = slot.set_or_insert()?;
        let added = members.into_iter().filter(|m| set.insert(m.clone())).count();
        Ok::<_, StoreError>(RespValue::integer(added as i64))
    }))
}

fn srem(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let members = texts(args, "member")?;
    reply(ctx.engine().update(key, |slot| {
        let removed = match slot.set_mut()? {
            Some(set) => members.iter().filter(|m| set.remove(*m)).count(),
            None => 0,
        };
        Ok::<_, StoreError>(RespValue::integer(removed as i64))
    }))
}

fn smembers(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    reply(read_set(ctx, args.text("key")?, |set| {
        RespValue::bulk_array(set.into_iter().flatten().cloned())
    }))
}

fn sismember(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let member = args.text("member")?;
    reply(read_set(ctx, args.text("key")?, |set| {
        RespValue::boolean(set.is_some_and(|s| s.contains(member)))
    }))
}

fn smismember(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let members = texts(args, "member")?;
    reply(read_set(ctx, args.text("key")?, |set| {
        RespValue::array(
            members
                .iter()
                .map(|m| RespValue::boolean(set.is_some_and(|s| s.contains(m))))
                .collect(),
        )
    }))
}

fn scard(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    reply(read_set(ctx, args.text("key")?, |set| {
        RespValue::integer(set.map_or(0, HashSet::len) as i64)
    }))
}

fn sinter(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let keys = texts(args, "key")?;
    reply(load_sets(ctx, &keys).map(|sets| RespValue::bulk_array(intersect(sets))))
}

fn sunion(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let keys = texts(args, "key")?;
    reply(load_sets(ctx, &keys).map(|sets| {
        RespValue::bulk_array(sets.into_iter().flatten().collect::<HashSet<_>>())
    }))
}

fn sdiff(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let keys = texts(args, "key")?;
    reply(load_sets(ctx, &keys).map(|sets| {
        let mut sets = sets.into_iter();
        let first = sets.next().unwrap_or_default();
        let rest: Vec<_> = sets.collect();
        RespValue::bulk_array(
            first
                .into_iter()
                .filter(|m| !rest.iter().any(|set| set.contains(m))),
        )
    }))
}

/// Cardinality of the intersection, stopping early at a non-zero LIMIT.
fn sintercard(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let numkeys = args.integer("numkeys")?;
    let keys = texts(args, "key")?;

    if numkeys <= 0 {
        return Ok(RespValue::error("ERR numkeys should be greater than 0"));
    }
    if numkeys as usize != keys.len() {
        return Ok(RespValue::error(SYNTAX_ERROR));
    }
    let limit = match args.opt_integer("limit")? {
        Some(n) if n < 0 => return Ok(RespValue::error("ERR LIMIT can't be negative")),
        Some(0) | None => usize::MAX,
        Some(n) => n as usize,
    };

    reply(load_sets(ctx, &keys).map(|sets| {
        RespValue::integer(intersect(sets).len().min(limit) as i64)
    }))
}

//! Keyspace Commands
//!
//! Commands that act on keys regardless of the type they hold, plus SORT.

use super::{reply, texts, CommandResult};
use crate::args::{ArgValue, ParsedArgs};
use crate::dispatch::{Context, Registry, RegistryError};
use crate::protocol::RespValue;
use crate::storage::{
    deadline_from_unix_ms, deadline_to_unix_ms, now_unix_ms, parse_f64, GlobPattern,
    StorageEngine, StoreError, Value,
};
use bytes::{Bytes, BytesMut};
use std::cmp::Ordering;
use std::collections::VecDeque;

pub(crate) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.bind("del", del)?;
    registry.bind("exists", exists)?;
    registry.bind("expire", expire)?;
    registry.bind("pexpire", pexpire)?;
    registry.bind("expireat", expireat)?;
    registry.bind("ttl", ttl)?;
    registry.bind("pttl", pttl)?;
    registry.bind("persist", persist)?;
    registry.bind("type", key_type)?;
    registry.bind("keys", keys)?;
    registry.bind("rename", rename)?;
    registry.bind("sort", sort)?;
    Ok(())
}

fn del(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let deleted = texts(args, "key")?
        .iter()
        .filter(|key| ctx.engine().delete(key))
        .count();
    Ok(RespValue::integer(deleted as i64))
}

/// Counts every argument that names a live key, duplicates included.
fn exists(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let found = texts(args, "key")?
        .iter()
        .filter(|key| ctx.engine().exists(key))
        .count();
    Ok(RespValue::integer(found as i64))
}

/// Applies an absolute expiry in UNIX milliseconds under the NX/XX/GT/LT
/// condition. Deadlines already in the past delete the key.
fn expire_at(ctx: &Context<'_>, args: &ParsedArgs, unix_ms: i64) -> CommandResult {
    let key = args.text("key")?;
    let condition = args.one_of("condition").map(|(branch, _)| branch);

    let applied = ctx.engine().update(key, |slot| {
        if !slot.exists() {
            return false;
        }
        // No expiry counts as an infinite TTL.
        let current = slot.expires_at().map(deadline_to_unix_ms);
        let allowed = match (condition, current) {
            (Some("nx"), current) => current.is_none(),
            (Some("xx"), current) => current.is_some(),
            (Some("gt"), Some(current)) => unix_ms > current,
            (Some("gt"), None) => false,
            (Some("lt"), Some(current)) => unix_ms < current,
            _ => true,
        };
        if !allowed {
            return false;
        }
        if unix_ms <= now_unix_ms() {
            slot.remove();
        } else {
            slot.set_expires_at(Some(deadline_from_unix_ms(unix_ms)));
        }
        true
    });
    Ok(RespValue::integer(i64::from(applied)))
}

fn invalid_expire(command: &str) -> RespValue {
    RespValue::error(format!("ERR invalid expire time in '{}' command", command))
}

fn expire(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let at = args
        .integer("seconds")?
        .checked_mul(1000)
        .and_then(|ms| ms.checked_add(now_unix_ms()));
    match at {
        Some(at) => expire_at(ctx, args, at),
        None => Ok(invalid_expire("expire")),
    }
}

fn pexpire(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    match args.integer("milliseconds")?.checked_add(now_unix_ms()) {
        Some(at) => expire_at(ctx, args, at),
        None => Ok(invalid_expire("pexpire")),
    }
}

fn expireat(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    match args.integer("unix-time-seconds")?.checked_mul(1000) {
        Some(at) => expire_at(ctx, args, at),
        None => Ok(invalid_expire("expireat")),
    }
}

fn ttl(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    Ok(RespValue::integer(ctx.engine().ttl(args.text("key")?)))
}

fn pttl(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    Ok(RespValue::integer(ctx.engine().pttl(args.text("key")?)))
}

fn persist(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let cleared = ctx.engine().update(key, |slot| {
        slot.expires_at().is_some() && slot.set_expires_at(None)
    });
    Ok(RespValue::integer(i64::from(cleared)))
}

fn key_type(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    Ok(RespValue::simple_string(ctx.engine().key_type(args.text("key")?)))
}

fn keys(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let pattern = GlobPattern::new(args.text("pattern")?);
    Ok(RespValue::bulk_array(ctx.engine().keys(&pattern)))
}

fn rename(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let from = args.text("key")?;
    let to = args.text("newkey")?;
    reply(ctx.engine().rename(from, to).map(|()| RespValue::ok()))
}

/// Resolves a SORT `BY` / `GET` pattern for one element.
///
/// `#` is the element itself. Otherwise the first `*` is replaced by the
/// element to form a key name; a `->field` suffix after the `*` reads a
/// hash field instead of a string value.
fn lookup(engine: &StorageEngine, pattern: &[u8], element: &[u8]) -> Option<Bytes> {
    if pattern == b"#" {
        return Some(Bytes::copy_from_slice(element));
    }
    let star = pattern.iter().position(|&c| c == b'*')?;
    let (key_pattern, field) = match pattern[star + 1..].windows(2).position(|w| w == b"->") {
        Some(i) if star + 3 + i < pattern.len() => {
            let arrow = star + 1 + i;
            (&pattern[..arrow], Some(&pattern[arrow + 2..]))
        }
        _ => (pattern, None),
    };

    let mut key = BytesMut::with_capacity(key_pattern.len() + element.len());
    key.extend_from_slice(&key_pattern[..star]);
    key.extend_from_slice(element);
    key.extend_from_slice(&key_pattern[star + 1..]);

    engine.view(&key, |value| match (value, field) {
        (Some(Value::String(s)), None) => Some(s.clone()),
        (Some(Value::Hash(h)), Some(field)) => h.get(field).cloned(),
        _ => None,
    })
}

const SORT_NOT_DOUBLE: &str = "ERR One or more scores can't be converted into double";

/// Orders `elements` in place. Numeric weights that fail to parse are an
/// error; equal weights fall back to comparing the elements themselves.
fn sort_elements(
    engine: &StorageEngine,
    elements: &mut Vec<Bytes>,
    by: Option<&Bytes>,
    alpha: bool,
    desc: bool,
) -> Result<(), RespValue> {
    let weight = |element: &Bytes| match by {
        Some(pattern) => lookup(engine, pattern, element),
        None => Some(element.clone()),
    };

    let directed = |order: Ordering| if desc { order.reverse() } else { order };
    if alpha {
        let mut keyed: Vec<(Option<Bytes>, Bytes)> =
            elements.drain(..).map(|e| (weight(&e), e)).collect();
        keyed.sort_by(|a, b| directed(a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1))));
        elements.extend(keyed.into_iter().map(|(_, e)| e));
    } else {
        let mut keyed = Vec::with_capacity(elements.len());
        for element in elements.drain(..) {
            let score = match weight(&element) {
                None => 0.0,
                Some(raw) => parse_f64(&raw).ok_or_else(|| RespValue::error(SORT_NOT_DOUBLE))?,
            };
            keyed.push((score, element));
        }
        keyed.sort_by(|a, b| directed(a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1))));
        elements.extend(keyed.into_iter().map(|(_, e)| e));
    }
    Ok(())
}

fn sort(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let by = args.opt_text("by-pattern")?;
    let gets = texts(args, "get-pattern")?;
    let desc = matches!(args.one_of("order"), Some(("desc", _)));
    let alpha = args.contains("sorting");
    let destination = args.opt_text("destination")?;
    let limit = match args.get("limit") {
        Some(ArgValue::Nested(block)) => Some((block.integer("offset")?, block.integer("count")?)),
        _ => None,
    };

    let engine = ctx.engine();
    let source = engine.view(key, |value| match value {
        None => Ok(Vec::new()),
        Some(Value::List(l)) => Ok(l.iter().cloned().collect()),
        Some(Value::Set(s)) => Ok(s.iter().cloned().collect()),
        Some(_) => Err(StoreError::WrongType),
    });
    let mut elements: Vec<Bytes> = match source {
        Ok(elements) => elements,
        Err(e) => return Ok(e.into()),
    };

    let dont_sort = by.is_some_and(|pattern| !pattern.contains(&b'*'));
    if !dont_sort {
        if let Err(e) = sort_elements(engine, &mut elements, by, alpha, desc) {
            return Ok(e);
        }
    }

    if let Some((offset, count)) = limit {
        let start = (offset.max(0) as usize).min(elements.len());
        let end = if count < 0 {
            elements.len()
        } else {
            start.saturating_add(count as usize).min(elements.len())
        };
        elements = elements.drain(start..end).collect();
    }

    let results: Vec<Option<Bytes>> = if gets.is_empty() {
        elements.into_iter().map(Some).collect()
    } else {
        elements
            .iter()
            .flat_map(|element| gets.iter().map(move |pattern| lookup(engine, pattern, element)))
            .collect()
    };

    match destination {
        None => Ok(RespValue::array(
            results
                .into_iter()
                .map(|r| r.map_or(RespValue::Null, RespValue::BulkString))
                .collect(),
        )),
        Some(destination) => {
            let stored: VecDeque<Bytes> = results.into_iter().map(Option::unwrap_or_default).collect();
            let count = stored.len() as i64;
            engine.update(destination, |slot| {
                if stored.is_empty() {
                    slot.remove();
                } else {
                    slot.put(Value::List(stored));
                }
            });
            Ok(RespValue::integer(count))
        }
    }
}

//! List Commands

use super::{reply, texts, CommandResult, SYNTAX_ERROR};
use crate::args::ParsedArgs;
use crate::dispatch::{Context, Registry, RegistryError};
use crate::protocol::RespValue;
use crate::storage::{StoreError, Value};
use bytes::Bytes;
use std::collections::VecDeque;

pub(crate) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.bind("lpush", lpush)?;
    registry.bind("rpush", rpush)?;
    registry.bind("lpop", lpop)?;
    registry.bind("rpop", rpop)?;
    registry.bind("llen", llen)?;
    registry.bind("lrange", lrange)?;
    registry.bind("lindex", lindex)?;
    registry.bind("lset", lset)?;
    registry.bind("lrem", lrem)?;
    registry.bind("lmove", lmove)?;
    registry.bind("lmpop", lmpop)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum End {
    Left,
    Right,
}

impl End {
    /// The end named by a `LEFT | RIGHT` argument, if one was given.
    fn of(args: &ParsedArgs, name: &str) -> Option<Self> {
        match args.one_of(name)? {
            ("left", _) => Some(End::Left),
            ("right", _) => Some(End::Right),
            _ => None,
        }
    }
}

fn pop_end(list: &mut VecDeque<Bytes>, end: End) -> Option<Bytes> {
    match end {
        End::Left => list.pop_front(),
        End::Right => list.pop_back(),
    }
}

fn push_end(list: &mut VecDeque<Bytes>, end: End, element: Bytes) {
    match end {
        End::Left => list.push_front(element),
        End::Right => list.push_back(element),
    }
}

/// Converts a possibly negative index into a position within `len`.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

fn read_list<R>(
    ctx: &Context<'_>,
    key: &[u8],
    f: impl FnOnce(Option<&VecDeque<Bytes>>) -> R,
) -> Result<R, StoreError> {
    ctx.engine().view(key, |value| match value {
        None => Ok(f(None)),
        Some(Value::List(l)) => Ok(f(Some(l))),
        Some(_) => Err(StoreError::WrongType),
    })
}

fn push(ctx: &Context<'_>, args: &ParsedArgs, end: End) -> CommandResult {
    let key = args.text("key")?;
    let elements = texts(args, "element")?;
    reply(ctx.engine().update(key, |slot| {
        let list = slot.list_or_insert()?;
        for element in elements {
            push_end(list, end, element);
        }
        Ok::<_, StoreError>(RespValue::integer(list.len() as i64))
    }))
}

fn lpush(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    push(ctx, args, End::Left)
}

fn rpush(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    push(ctx, args, End::Right)
}

/// LPOP / RPOP. Without a count the reply is one element or nil; with a
/// count it is an array, or a null array for a missing key.
fn pop(ctx: &Context<'_>, args: &ParsedArgs, end: End) -> CommandResult {
    let key = args.text("key")?;
    let count = match args.opt_integer("count")? {
        Some(n) if n < 0 => {
            return Ok(RespValue::error("ERR value is out of range, must be positive"))
        }
        Some(n) => Some(n as usize),
        None => None,
    };

    reply(ctx.engine().update(key, |slot| {
        let Some(list) = slot.list_mut()? else {
            return Ok(match count {
                Some(_) => RespValue::NullArray,
                None => RespValue::Null,
            });
        };
        Ok::<_, StoreError>(match count {
            None => pop_end(list, end).map_or(RespValue::Null, RespValue::BulkString),
            Some(n) => {
                let popped = (0..n).map_while(|_| pop_end(list, end));
                RespValue::bulk_array(popped.collect::<Vec<_>>())
            }
        })
    }))
}

fn lpop(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    pop(ctx, args, End::Left)
}

fn rpop(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    pop(ctx, args, End::Right)
}

fn llen(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    reply(read_list(ctx, args.text("key")?, |list| {
        RespValue::integer(list.map_or(0, VecDeque::len) as i64)
    }))
}

fn lrange(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let start = args.integer("start")?;
    let stop = args.integer("stop")?;
    reply(read_list(ctx, args.text("key")?, |list| {
        let Some(list) = list else {
            return RespValue::array(vec![]);
        };
        let len = list.len() as i64;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return RespValue::array(vec![]);
        }
        RespValue::bulk_array(
            list.range(start as usize..=stop as usize)
                .cloned()
                .collect::<Vec<_>>(),
        )
    }))
}

fn lindex(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let index = args.integer("index")?;
    reply(read_list(ctx, args.text("key")?, |list| {
        list.and_then(|l| resolve_index(index, l.len()).and_then(|i| l.get(i)))
            .map_or(RespValue::Null, |v| RespValue::BulkString(v.clone()))
    }))
}

fn lset(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let index = args.integer("index")?;
    let element = args.text("element")?;
    reply(ctx.engine().update(key, |slot| {
        let list = slot.list_mut()?.ok_or(StoreError::NoSuchKey)?;
        let i = resolve_index(index, list.len()).ok_or(StoreError::OutOfRange)?;
        list[i] = element.clone();
        Ok::<_, StoreError>(RespValue::ok())
    }))
}

/// Removes `count` occurrences: from the head when positive, from the tail
/// when negative, all of them when zero.
fn lrem(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let count = args.integer("count")?;
    let element = args.text("element")?;

    reply(ctx.engine().update(key, |slot| {
        let Some(list) = slot.list_mut()? else {
            return Ok(RespValue::integer(0));
        };
        let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
        let mut removed = 0usize;
        let mut kept = VecDeque::with_capacity(list.len());

        if count < 0 {
            while let Some(item) = list.pop_back() {
                if removed < limit && item == *element {
                    removed += 1;
                } else {
                    kept.push_front(item);
                }
            }
        } else {
            while let Some(item) = list.pop_front() {
                if removed < limit && item == *element {
                    removed += 1;
                } else {
                    kept.push_back(item);
                }
            }
        }
        *list = kept;
        Ok::<_, StoreError>(RespValue::integer(removed as i64))
    }))
}

fn lmove(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let source = args.text("source")?;
    let destination = args.text("destination")?;
    let (Some(from), Some(to)) = (End::of(args, "wherefrom"), End::of(args, "whereto")) else {
        return Ok(RespValue::error(SYNTAX_ERROR));
    };
    let engine = ctx.engine();

    let destination_ok = engine.view(destination, |value| {
        matches!(value, None | Some(Value::List(_)))
    });
    if !destination_ok {
        return Ok(StoreError::WrongType.into());
    }

    let popped = engine.update(source, |slot| {
        Ok::<_, StoreError>(slot.list_mut()?.and_then(|list| pop_end(list, from)))
    });
    let element = match popped {
        Ok(Some(element)) => element,
        Ok(None) => return Ok(RespValue::Null),
        Err(e) => return Ok(e.into()),
    };

    reply(engine.update(destination, |slot| {
        push_end(slot.list_or_insert()?, to, element.clone());
        Ok::<_, StoreError>(RespValue::BulkString(element))
    }))
}

/// Pops up to `count` elements from the first non-empty list among the
/// given keys. Replies `[key, [elements]]`, or a null array if every list
/// is empty.
fn lmpop(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let numkeys = args.integer("numkeys")?;
    let keys = texts(args, "key")?;

    if numkeys <= 0 {
        return Ok(RespValue::error("ERR numkeys should be greater than 0"));
    }
    if numkeys as usize != keys.len() {
        return Ok(RespValue::error(SYNTAX_ERROR));
    }
    // The repeating keys can swallow the direction, leaving it unmatched.
    let Some(end) = End::of(args, "where") else {
        return Ok(RespValue::error(SYNTAX_ERROR));
    };
    let count = match args.opt_integer("count")? {
        Some(n) if n <= 0 => return Ok(RespValue::error("ERR count should be greater than 0")),
        Some(n) => n as usize,
        None => 1,
    };

    for key in &keys {
        let popped = ctx.engine().update(key, |slot| {
            let Some(list) = slot.list_mut()? else {
                return Ok(Vec::new());
            };
            Ok::<_, StoreError>((0..count).map_while(|_| pop_end(list, end)).collect::<Vec<_>>())
        });
        match popped {
            Ok(elements) if elements.is_empty() => continue,
            Ok(elements) => {
                return Ok(RespValue::array(vec![
                    RespValue::BulkString(key.clone()),
                    RespValue::bulk_array(elements),
                ]))
            }
            Err(e) => return Ok(e.into()),
        }
    }
    Ok(RespValue::NullArray)
}

#[cfg(test)]
mod tests {
    use super::resolve_index;
    use crate::commands::testing::{bulk, bulks, run, server};
    use crate::protocol::RespValue;

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(0, 3), Some(0));
        assert_eq!(resolve_index(-1, 3), Some(2));
        assert_eq!(resolve_index(3, 3), None);
        assert_eq!(resolve_index(-4, 3), None);
    }

    #[test]
    fn test_push_range_len() {
        let (d, mut s) = server();
        assert_eq!(run(&d, &mut s, "RPUSH l b c"), RespValue::integer(2));
        assert_eq!(run(&d, &mut s, "LPUSH l a z"), RespValue::integer(4));
        assert_eq!(run(&d, &mut s, "LRANGE l 0 -1"), bulks(&["z", "a", "b", "c"]));
        assert_eq!(run(&d, &mut s, "LRANGE l -2 100"), bulks(&["b", "c"]));
        assert_eq!(run(&d, &mut s, "LRANGE l 3 1"), bulks(&[]));
        assert_eq!(run(&d, &mut s, "LRANGE none 0 -1"), bulks(&[]));
        assert_eq!(run(&d, &mut s, "LLEN l"), RespValue::integer(4));
    }

    #[test]
    fn test_pop() {
        let (d, mut s) = server();
        run(&d, &mut s, "RPUSH l a b c d");
        assert_eq!(run(&d, &mut s, "LPOP l"), bulk("a"));
        assert_eq!(run(&d, &mut s, "RPOP l"), bulk("d"));
        assert_eq!(run(&d, &mut s, "LPOP l 5"), bulks(&["b", "c"]));
        assert_eq!(run(&d, &mut s, "EXISTS l"), RespValue::integer(0));
        assert_eq!(run(&d, &mut s, "LPOP l"), RespValue::Null);
        assert_eq!(run(&d, &mut s, "LPOP l 2"), RespValue::NullArray);
        assert!(run(&d, &mut s, "LPOP l -1").is_error());
    }

    #[test]
    fn test_index_set_rem() {
        let (d, mut s) = server();
        run(&d, &mut s, "RPUSH l a x b x c x");
        assert_eq!(run(&d, &mut s, "LINDEX l -1"), bulk("x"));
        assert_eq!(run(&d, &mut s, "LINDEX l 10"), RespValue::Null);
        assert_eq!(run(&d, &mut s, "LSET l 0 A"), RespValue::ok());
        assert_eq!(
            run(&d, &mut s, "LSET l 10 A"),
            RespValue::error("ERR index out of range")
        );
        assert_eq!(run(&d, &mut s, "LSET none 0 A"), RespValue::error("ERR no such key"));
        assert_eq!(run(&d, &mut s, "LREM l -1 x"), RespValue::integer(1));
        assert_eq!(run(&d, &mut s, "LRANGE l 0 -1"), bulks(&["A", "x", "b", "x", "c"]));
        assert_eq!(run(&d, &mut s, "LREM l 1 x"), RespValue::integer(1));
        assert_eq!(run(&d, &mut s, "LREM l 0 x"), RespValue::integer(1));
        assert_eq!(run(&d, &mut s, "LRANGE l 0 -1"), bulks(&["A", "b", "c"]));
    }

    #[test]
    fn test_lmove() {
        let (d, mut s) = server();
        run(&d, &mut s, "RPUSH src a b c");
        assert_eq!(run(&d, &mut s, "LMOVE src dst LEFT RIGHT"), bulk("a"));
        assert_eq!(run(&d, &mut s, "LMOVE src dst RIGHT LEFT"), bulk("c"));
        assert_eq!(run(&d, &mut s, "LRANGE dst 0 -1"), bulks(&["c", "a"]));
        assert_eq!(run(&d, &mut s, "LMOVE src src LEFT RIGHT"), bulk("b"));
        assert_eq!(run(&d, &mut s, "LMOVE none dst LEFT LEFT"), RespValue::Null);

        run(&d, &mut s, "SET str v");
        assert!(run(&d, &mut s, "LMOVE src str LEFT LEFT").is_error());
        assert_eq!(run(&d, &mut s, "LLEN src"), RespValue::integer(1));
    }

    #[test]
    fn test_lmpop() {
        let (d, mut s) = server();
        run(&d, &mut s, "RPUSH b 1 2 3");
        assert_eq!(
            run(&d, &mut s, "LMPOP 2 a b RIGHT COUNT 2"),
            RespValue::array(vec![bulk("b"), bulks(&["3", "2"])])
        );
        assert_eq!(
            run(&d, &mut s, "LMPOP 2 a b LEFT"),
            RespValue::array(vec![bulk("b"), bulks(&["1"])])
        );
        assert_eq!(run(&d, &mut s, "LMPOP 2 a b LEFT"), RespValue::NullArray);
        assert_eq!(
            run(&d, &mut s, "LMPOP 0 a LEFT"),
            RespValue::error("ERR numkeys should be greater than 0")
        );
        assert_eq!(
            run(&d, &mut s, "LMPOP 1 a b LEFT"),
            RespValue::error("ERR syntax error")
        );
        assert_eq!(
            run(&d, &mut s, "LMPOP 1 a LEFT COUNT 0"),
            RespValue::error("ERR count should be greater than 0")
        );
    }

    #[test]
    fn test_lmpop_requires_direction() {
        let (d, mut s) = server();
        run(&d, &mut s, "RPUSH k a b c");
        assert_eq!(run(&d, &mut s, "LMPOP 1 k"), RespValue::error("ERR syntax error"));
        assert_eq!(run(&d, &mut s, "LLEN k"), RespValue::integer(3));
        assert_eq!(
            run(&d, &mut s, "LMPOP 1 k RIGHT"),
            RespValue::array(vec![bulk("k"), bulks(&["c"])])
        );
    }
}

//! BITFIELD
//!
//! Treats a string value as an array of bits (bit 0 is the most significant
//! bit of the first byte) and runs GET / SET / INCRBY on integer fields of
//! arbitrary width. Operations run in input order; an `OVERFLOW` mode stays
//! in effect for every later write until changed.

use super::{reply, CommandError, CommandResult};
use crate::args::parser::parse_integer;
use crate::args::{ArgValue, ParsedArgs};
use crate::dispatch::{Context, Registry, RegistryError};
use crate::protocol::RespValue;
use crate::storage::{StoreError, Value};
use bytes::Bytes;

/// Highest addressable bit, matching the 512 MB string limit.
const MAX_BITS: u64 = 512 * 1024 * 1024 * 8;

const INVALID_TYPE: &str =
    "ERR Invalid bitfield type. Use something like i16 u8. Note that u64 is not supported but i64 is.";
const INVALID_OFFSET: &str = "ERR bit offset is not an integer or out of range";
const INVALID_VALUE: &str = "ERR value is not an integer or out of range";

pub(crate) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.bind("bitfield", bitfield)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Overflow {
    Wrap,
    Sat,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Field {
    signed: bool,
    bits: u32,
}

impl Field {
    fn parse(encoding: &[u8]) -> Option<Self> {
        let (&sign, digits) = encoding.split_first()?;
        let signed = match sign.to_ascii_lowercase() {
            b'i' => true,
            b'u' => false,
            _ => return None,
        };
        let bits = u32::try_from(parse_integer(digits)?).ok()?;
        let max = if signed { 64 } else { 63 };
        (1..=max).contains(&bits).then_some(Self { signed, bits })
    }

    fn min(&self) -> i128 {
        if self.signed {
            -(1i128 << (self.bits - 1))
        } else {
            0
        }
    }

    fn max(&self) -> i128 {
        if self.signed {
            (1i128 << (self.bits - 1)) - 1
        } else {
            (1i128 << self.bits) - 1
        }
    }

    /// Interprets the low `bits` bits of `raw`.
    fn decode(&self, raw: u64) -> i64 {
        if self.signed && self.bits < 64 && raw >> (self.bits - 1) & 1 == 1 {
            (raw as i64) - (1i64 << self.bits)
        } else {
            raw as i64
        }
    }

    /// Brings `value` into range according to `overflow`. `None` means the
    /// write must be skipped.
    fn fit(&self, value: i128, overflow: Overflow) -> Option<i64> {
        let (min, max) = (self.min(), self.max());
        if (min..=max).contains(&value) {
            return Some(value as i64);
        }
        match overflow {
            Overflow::Wrap => {
                let span = 1i128 << self.bits;
                let mut wrapped = value.rem_euclid(span);
                if wrapped > max {
                    wrapped -= span;
                }
                Some(wrapped as i64)
            }
            Overflow::Sat => Some(if value < min { min } else { max } as i64),
            Overflow::Fail => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Get { field: Field, offset: u64 },
    Set { field: Field, offset: u64, value: i64, overflow: Overflow },
    IncrBy { field: Field, offset: u64, delta: i64, overflow: Overflow },
}

impl Op {
    fn is_write(&self) -> bool {
        !matches!(self, Op::Get { .. })
    }
}

fn parse_offset(raw: &[u8], field: Field) -> Option<u64> {
    let (scale, digits) = match raw.strip_prefix(b"#") {
        Some(digits) => (u64::from(field.bits), digits),
        None => (1, raw),
    };
    let offset = u64::try_from(parse_integer(digits)?).ok()?.checked_mul(scale)?;
    (offset + u64::from(field.bits) <= MAX_BITS).then_some(offset)
}

/// Field and offset of a GET, SET or INCRBY block.
fn locate(block: &ParsedArgs) -> Result<Result<(Field, u64), &'static str>, CommandError> {
    let Some(field) = Field::parse(block.text("encoding")?) else {
        return Ok(Err(INVALID_TYPE));
    };
    let Some(offset) = parse_offset(block.text("offset")?, field) else {
        return Ok(Err(INVALID_OFFSET));
    };
    Ok(Ok((field, offset)))
}

fn operand(block: &ParsedArgs, name: &str) -> Result<Option<i64>, CommandError> {
    Ok(parse_integer(block.text(name)?))
}

/// Builds the operation list in input order.
fn parse_ops(args: &ParsedArgs) -> Result<Result<Vec<Op>, &'static str>, CommandError> {
    let mut blocks: Vec<(&str, &ParsedArgs)> = Vec::new();
    for item in args.list("operation")? {
        let Some((branch, ArgValue::Nested(block))) = item.as_nested().and_then(|i| i.iter().next())
        else {
            return Err(CommandError::Internal("malformed BITFIELD operation".into()));
        };
        blocks.push((branch, block));
    }
    blocks.sort_by_key(|(_, block)| block.position());

    let mut overflow = Overflow::Wrap;
    let mut ops = Vec::with_capacity(blocks.len());
    for (branch, block) in blocks {
        if branch == "get-block" {
            match locate(block)? {
                Ok((field, offset)) => ops.push(Op::Get { field, offset }),
                Err(e) => return Ok(Err(e)),
            }
            continue;
        }

        overflow = match block.one_of("overflow-block") {
            Some(("sat", _)) => Overflow::Sat,
            Some(("fail", _)) => Overflow::Fail,
            Some(_) => Overflow::Wrap,
            None => overflow,
        };
        let Some((kind, ArgValue::Nested(write))) = block.one_of("write-operation") else {
            return Err(CommandError::Internal("BITFIELD write without an operation".into()));
        };
        let (field, offset) = match locate(write)? {
            Ok(location) => location,
            Err(e) => return Ok(Err(e)),
        };
        let op = if kind == "set-block" {
            let Some(value) = operand(write, "value")? else {
                return Ok(Err(INVALID_VALUE));
            };
            Op::Set { field, offset, value, overflow }
        } else {
            let Some(delta) = operand(write, "increment")? else {
                return Ok(Err(INVALID_VALUE));
            };
            Op::IncrBy { field, offset, delta, overflow }
        };
        ops.push(op);
    }
    Ok(Ok(ops))
}

fn read_bits(buf: &[u8], offset: u64, bits: u32) -> u64 {
    (0..u64::from(bits)).fold(0u64, |acc, i| {
        let bit = offset + i;
        let byte = buf.get((bit >> 3) as usize).copied().unwrap_or(0);
        (acc << 1) | u64::from((byte >> (7 - (bit & 7))) & 1)
    })
}

fn write_bits(buf: &mut Vec<u8>, offset: u64, bits: u32, value: u64) {
    let last_byte = ((offset + u64::from(bits) - 1) >> 3) as usize;
    if buf.len() <= last_byte {
        buf.resize(last_byte + 1, 0);
    }
    for i in 0..u64::from(bits) {
        let bit = offset + i;
        let mask = 1u8 << (7 - (bit & 7));
        let byte = &mut buf[(bit >> 3) as usize];
        if (value >> (u64::from(bits) - 1 - i)) & 1 == 1 {
            *byte |= mask;
        } else {
            *byte &= !mask;
        }
    }
}

fn run_ops(buf: &mut Vec<u8>, ops: &[Op]) -> Vec<RespValue> {
    ops.iter()
        .map(|op| match *op {
            Op::Get { field, offset } => {
                RespValue::integer(field.decode(read_bits(buf, offset, field.bits)))
            }
            Op::Set { field, offset, value, overflow } => {
                let old = field.decode(read_bits(buf, offset, field.bits));
                match field.fit(i128::from(value), overflow) {
                    Some(new) => {
                        write_bits(buf, offset, field.bits, new as u64);
                        RespValue::integer(old)
                    }
                    None => RespValue::Null,
                }
            }
            Op::IncrBy { field, offset, delta, overflow } => {
                let old = field.decode(read_bits(buf, offset, field.bits));
                match field.fit(i128::from(old) + i128::from(delta), overflow) {
                    Some(new) => {
                        write_bits(buf, offset, field.bits, new as u64);
                        RespValue::integer(new)
                    }
                    None => RespValue::Null,
                }
            }
        })
        .collect()
}

fn bitfield(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let key = args.text("key")?;
    let ops = match parse_ops(args)? {
        Ok(ops) => ops,
        Err(e) => return Ok(RespValue::error(e)),
    };
    let writes = ops.iter().any(Op::is_write);

    reply(ctx.engine().update(key, |slot| {
        let mut buf = slot.string()?.map(|s| s.to_vec()).unwrap_or_default();
        let results = run_ops(&mut buf, &ops);
        if writes {
            slot.put_keep_ttl(Value::String(Bytes::from(buf)));
        }
        Ok::<_, StoreError>(RespValue::array(results))
    }))
}

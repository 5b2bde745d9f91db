//! Incremental RESP Request Decoder
//!
//! Decodes one RESP value at a time from a byte buffer that may hold a
//! partial message. The decoder returns either:
//! - `Ok(Some((value, consumed)))`: a complete value, `consumed` bytes used
//! - `Ok(None)`: the message is incomplete, wait for more data
//! - `Err(ParseError)`: invalid protocol data, the client should be dropped
//!
//! Lines that do not start with a RESP prefix are decoded as inline
//! commands (`PING\r\n`), split on ASCII whitespace into an array of bulk
//! strings.

use crate::protocol::types::{prefix, RespValue, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur during RESP parsing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("unknown type prefix: {0:#04x}")]
    UnknownPrefix(u8),

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    /// Invalid UTF-8 in a simple string or error message
    #[error("invalid UTF-8: {0}")]
    InvalidUtf8(String),

    /// Bulk string length is negative (but not -1 for null)
    #[error("invalid bulk string length: {0}")]
    InvalidBulkLength(i64),

    /// Array length is negative (but not -1 for null)
    #[error("invalid array length: {0}")]
    InvalidArrayLength(i64),

    /// Protocol violation (missing CRLF, nesting too deep, ...)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum array nesting depth
pub const MAX_NESTING_DEPTH: usize = 32;

/// Maximum element count accepted in an array header
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// A RESP decoder.
///
/// # Example
///
/// ```
/// use emukv::protocol::parser::RespParser;
///
/// let mut parser = RespParser::new();
/// let buffer = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
///
/// let (value, consumed) = parser.parse(buffer).unwrap().unwrap();
/// assert_eq!(consumed, buffer.len());
/// assert_eq!(value.as_array().unwrap().len(), 2);
/// ```
#[derive(Debug, Default)]
pub struct RespParser {
    depth: usize,
}

/// Read position over the buffer being decoded.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    /// Takes everything up to the next CRLF and steps past it.
    fn line(&mut self) -> Option<&'a [u8]> {
        let rest = &self.buf[self.pos..];
        let end = find_crlf(rest)?;
        self.pos += end + CRLF.len();
        Some(&rest[..end])
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let chunk = self.buf.get(self.pos..self.pos.checked_add(n)?)?;
        self.pos += n;
        Some(chunk)
    }
}

impl RespParser {
    pub fn new() -> Self {
        Self { depth: 0 }
    }

    /// Attempts to decode one value from the start of `buf`.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
        self.depth = 0;
        if buf.is_empty() {
            return Ok(None);
        }
        let mut cursor = Cursor { buf, pos: 0 };
        let value = match buf[0] {
            prefix::SIMPLE_STRING
            | prefix::ERROR
            | prefix::INTEGER
            | prefix::BULK_STRING
            | prefix::ARRAY => self.value(&mut cursor)?,
            _ => inline(&mut cursor)?,
        };
        Ok(value.map(|v| (v, cursor.pos)))
    }

    fn value(&mut self, cursor: &mut Cursor<'_>) -> ParseResult<Option<RespValue>> {
        let Some(tag) = cursor.peek() else {
            return Ok(None);
        };
        cursor.pos += 1;
        let Some(line) = cursor.line() else {
            return Ok(None);
        };

        match tag {
            prefix::SIMPLE_STRING => Ok(Some(RespValue::SimpleString(utf8(line)?))),
            prefix::ERROR => Ok(Some(RespValue::Error(utf8(line)?))),
            prefix::INTEGER => Ok(Some(RespValue::Integer(integer(line)?))),
            prefix::BULK_STRING => bulk(cursor, integer(line)?),
            prefix::ARRAY => self.array(cursor, integer(line)?),
            other => Err(ParseError::UnknownPrefix(other)),
        }
    }

    fn array(&mut self, cursor: &mut Cursor<'_>, count: i64) -> ParseResult<Option<RespValue>> {
        if count == -1 {
            return Ok(Some(RespValue::NullArray));
        }
        if count < 0 {
            return Err(ParseError::InvalidArrayLength(count));
        }
        let count = count as usize;
        if count > MAX_ARRAY_LEN {
            return Err(ParseError::MessageTooLarge {
                size: count,
                max: MAX_ARRAY_LEN,
            });
        }

        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::ProtocolError(format!(
                "maximum nesting depth exceeded: {}",
                MAX_NESTING_DEPTH
            )));
        }

        let mut elements = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            match self.value(cursor)? {
                Some(value) => elements.push(value),
                None => return Ok(None),
            }
        }

        self.depth -= 1;
        Ok(Some(RespValue::Array(elements)))
    }
}

fn bulk(cursor: &mut Cursor<'_>, length: i64) -> ParseResult<Option<RespValue>> {
    if length == -1 {
        return Ok(Some(RespValue::Null));
    }
    if length < 0 {
        return Err(ParseError::InvalidBulkLength(length));
    }
    let length = length as usize;
    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let Some(data) = cursor.take(length) else {
        return Ok(None);
    };
    match cursor.take(CRLF.len()) {
        None => Ok(None),
        Some(tail) if tail == CRLF => Ok(Some(RespValue::BulkString(Bytes::copy_from_slice(data)))),
        Some(_) => Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        )),
    }
}

fn inline(cursor: &mut Cursor<'_>) -> ParseResult<Option<RespValue>> {
    let Some(line) = cursor.line() else {
        return Ok(None);
    };
    let elements: Vec<RespValue> = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|part| !part.is_empty())
        .map(|part| RespValue::BulkString(Bytes::copy_from_slice(part)))
        .collect();
    if elements.is_empty() {
        return Err(ParseError::ProtocolError("empty inline command".to_string()));
    }
    Ok(Some(RespValue::Array(elements)))
}

fn utf8(line: &[u8]) -> ParseResult<String> {
    std::str::from_utf8(line)
        .map(str::to_string)
        .map_err(|e| ParseError::InvalidUtf8(e.to_string()))
}

fn integer(line: &[u8]) -> ParseResult<i64> {
    let text = std::str::from_utf8(line).map_err(|e| ParseError::InvalidUtf8(e.to_string()))?;
    text.parse()
        .map_err(|_| ParseError::InvalidInteger(text.to_string()))
}

/// Position of the first `\r\n` in `buf`.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == CRLF)
}

/// Decodes a single RESP message from bytes.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(RespValue, usize)>> {
    RespParser::new().parse(buf)
}

//! RESP Reply and Request Values
//!
//! [`RespValue`] is both the decoded form of an incoming request and the
//! reply model handed back by command handlers.
//!
//! ## Wire Format
//!
//! Replies are written as RESP2. Each type starts with a prefix byte:
//! - `+` Simple String
//! - `-` Error
//! - `:` Integer
//! - `$` Bulk String
//! - `*` Array
//!
//! All types are terminated with CRLF (`\r\n`).
//!
//! The reply model also carries `Double`, `Boolean` and `Map`, which RESP2
//! cannot express directly. They are downgraded when serialized:
//!
//! | Model     | RESP2 wire                       |
//! |-----------|----------------------------------|
//! | `Double`  | bulk string (`$3\r\n1.5\r\n`)    |
//! | `Boolean` | integer `:1` / `:0`              |
//! | `Map`     | flat array `k1 v1 k2 v2 ...`     |

use bytes::Bytes;
use std::fmt;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const ERROR: u8 = b'-';
    pub const INTEGER: u8 = b':';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// A RESP value.
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Non-binary-safe status line. Format: `+<string>\r\n`
    SimpleString(String),

    /// Error line. Format: `-<error message>\r\n`
    Error(String),

    /// 64-bit signed integer. Format: `:<integer>\r\n`
    Integer(i64),

    /// Binary-safe string. Format: `$<length>\r\n<data>\r\n`
    BulkString(Bytes),

    /// Null bulk string: `$-1\r\n`
    Null,

    /// Null array: `*-1\r\n`
    NullArray,

    /// Format: `*<count>\r\n<element1><element2>...`
    Array(Vec<RespValue>),

    /// Floating point reply, sent as a bulk string
    Double(f64),

    /// Boolean reply, sent as integer 0 or 1
    Boolean(bool),

    /// Ordered key/value reply, sent as a flat array
    Map(Vec<(RespValue, RespValue)>),
}

impl RespValue {
    /// Creates a new simple string response.
    ///
    /// # Example
    /// ```
    /// use emukv::protocol::types::RespValue;
    /// let ok = RespValue::simple_string("OK");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates a new error response.
    pub fn error(s: impl Into<String>) -> Self {
        RespValue::Error(s.into())
    }

    pub fn integer(n: i64) -> Self {
        RespValue::Integer(n)
    }

    /// Creates a new bulk string response.
    ///
    /// # Example
    /// ```
    /// use emukv::protocol::types::RespValue;
    /// use bytes::Bytes;
    /// let bulk = RespValue::bulk_string(Bytes::from("hello"));
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Bulk string copied from a `&str`.
    pub fn bulk_str(s: &str) -> Self {
        RespValue::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }

    pub fn null() -> Self {
        RespValue::Null
    }

    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Array of bulk strings.
    pub fn bulk_array<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Bytes>,
    {
        RespValue::Array(items.into_iter().map(|b| RespValue::BulkString(b.into())).collect())
    }

    pub fn double(value: f64) -> Self {
        RespValue::Double(value)
    }

    pub fn boolean(value: bool) -> Self {
        RespValue::Boolean(value)
    }

    pub fn map(pairs: Vec<(RespValue, RespValue)>) -> Self {
        RespValue::Map(pairs)
    }

    /// Common response for successful operations
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the value to its RESP2 wire form.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => write_line(buf, prefix::SIMPLE_STRING, s.as_bytes()),
            RespValue::Error(s) => write_line(buf, prefix::ERROR, s.as_bytes()),
            RespValue::Integer(n) => write_line(buf, prefix::INTEGER, n.to_string().as_bytes()),
            RespValue::BulkString(data) => write_bulk(buf, data),
            RespValue::Null => write_line(buf, prefix::BULK_STRING, b"-1"),
            RespValue::NullArray => write_line(buf, prefix::ARRAY, b"-1"),
            RespValue::Array(values) => {
                write_line(buf, prefix::ARRAY, values.len().to_string().as_bytes());
                for value in values {
                    value.serialize_into(buf);
                }
            }
            RespValue::Double(d) => write_bulk(buf, format_double(*d).as_bytes()),
            RespValue::Boolean(b) => write_line(buf, prefix::INTEGER, if *b { b"1" } else { b"0" }),
            RespValue::Map(pairs) => {
                write_line(buf, prefix::ARRAY, (pairs.len() * 2).to_string().as_bytes());
                for (key, value) in pairs {
                    key.serialize_into(buf);
                    value.serialize_into(buf);
                }
            }
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null | RespValue::NullArray)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RespValue::Error(_))
    }

    /// Attempts to extract the inner string from SimpleString or BulkString.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RespValue::SimpleString(s) => Some(s),
            RespValue::BulkString(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Attempts to extract the raw bytes of a string value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[RespValue]> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Consumes self and returns the inner array if this is an Array variant.
    pub fn into_array(self) -> Option<Vec<RespValue>> {
        match self {
            RespValue::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

fn write_line(buf: &mut Vec<u8>, prefix: u8, body: &[u8]) {
    buf.push(prefix);
    buf.extend_from_slice(body);
    buf.extend_from_slice(CRLF);
}

fn write_bulk(buf: &mut Vec<u8>, data: &[u8]) {
    write_line(buf, prefix::BULK_STRING, data.len().to_string().as_bytes());
    buf.extend_from_slice(data);
    buf.extend_from_slice(CRLF);
}

/// Double text as clients expect it: `inf`, `-inf`, or shortest form.
fn format_double(d: f64) -> String {
    if d.is_infinite() {
        if d > 0.0 { "inf".to_string() } else { "-inf".to_string() }
    } else {
        crate::storage::format_float(d)
    }
}

impl fmt::Display for RespValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RespValue::SimpleString(s) => write!(f, "\"{}\"", s),
            RespValue::Error(s) => write!(f, "(error) {}", s),
            RespValue::Integer(n) => write!(f, "(integer) {}", n),
            RespValue::BulkString(data) => match std::str::from_utf8(data) {
                Ok(s) => write!(f, "\"{}\"", s),
                Err(_) => write!(f, "(binary data, {} bytes)", data.len()),
            },
            RespValue::Null | RespValue::NullArray => write!(f, "(nil)"),
            RespValue::Double(d) => write!(f, "(double) {}", format_double(*d)),
            RespValue::Boolean(b) => write!(f, "({})", b),
            RespValue::Array(values) if values.is_empty() => write!(f, "(empty array)"),
            RespValue::Array(values) => {
                for (i, v) in values.iter().enumerate() {
                    writeln!(f, "{}) {}", i + 1, v)?;
                }
                Ok(())
            }
            RespValue::Map(pairs) if pairs.is_empty() => write!(f, "(empty map)"),
            RespValue::Map(pairs) => {
                for (i, (k, v)) in pairs.iter().enumerate() {
                    writeln!(f, "{}# {} => {}", i + 1, k, v)?;
                }
                Ok(())
            }
        }
    }
}

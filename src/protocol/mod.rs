//! RESP Protocol Implementation
//!
//! The wire layer: decodes requests into [`RespValue`] arrays and encodes
//! replies as RESP2.
//!
//! ## Modules
//!
//! - `types`: the `RespValue` reply model and its serializer
//! - `parser`: incremental decoder for incoming requests
//!
//! ## Example
//!
//! ```
//! use emukv::protocol::{parse_message, RespValue};
//!
//! let (request, consumed) = parse_message(b"*1\r\n$4\r\nPING\r\n").unwrap().unwrap();
//! assert_eq!(consumed, 14);
//! assert_eq!(request.as_array().unwrap()[0].as_str(), Some("PING"));
//!
//! assert_eq!(RespValue::pong().serialize(), b"+PONG\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseError, ParseResult, RespParser};
pub use types::RespValue;

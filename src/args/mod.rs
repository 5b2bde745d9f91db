//! Argument Parsing
//!
//! Turns the raw tokens of a request into a typed [`ParsedArgs`] bag by
//! matching them against the command grammar from [`crate::spec`].
//!
//! ## Modules
//!
//! - `value`: `ArgValue`, `ParsedArgs` and the typed accessors
//! - `parser`: the matching engine and command resolution
//!
//! ## Example
//!
//! ```
//! use bytes::Bytes;
//! use emukv::args::{parse_command, ParseOptions};
//! use emukv::spec::CommandTable;
//!
//! let table = CommandTable::builtin().unwrap();
//! let argv: Vec<Bytes> = ["SET", "name", "Ariz", "NX"]
//!     .iter()
//!     .map(|s| Bytes::from_static(s.as_bytes()))
//!     .collect();
//!
//! let outcome = parse_command(table.get("set").unwrap(), &argv, ParseOptions::default());
//! assert_eq!(outcome.depth, 1);
//! assert!(outcome.args.contains("condition.nx"));
//! ```

pub mod parser;
pub mod value;

// Re-export commonly used types
pub use parser::{parse_arguments, parse_command, KeywordPositions, ParseOptions, ParseOutcome};
pub use value::{ArgError, ArgValue, ParsedArgs};

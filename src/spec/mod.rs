//! Command Specification Model
//!
//! Static, immutable description of every command's grammar and of where its
//! keys live. The model is built once at startup from the embedded
//! `commands.json` and is read-only for the rest of the process lifetime.
//!
//! ## Example
//!
//! ```
//! use emukv::spec::CommandTable;
//!
//! let table = CommandTable::builtin().unwrap();
//! let kill = table.get("CLIENT|KILL").unwrap();
//! assert_eq!(kill.token, "client|kill");
//! ```

pub mod model;
pub mod table;

// Re-export commonly used types
pub use model::{ArgSpec, ArgType, BeginSearch, CommandInfo, CommandSpec, FindKeys, KeySpec};
pub use table::{CommandTable, SpecError};

//! Command Grammar Types
//!
//! These types describe the *shape* of every command: the ordered formal
//! parameters ([`ArgSpec`]), the subcommand tree ([`CommandSpec`]) and where
//! the keys live inside a raw argument array ([`KeySpec`]).
//!
//! Everything here is immutable once the [`CommandTable`](super::CommandTable)
//! has been loaded, so the whole model can be shared between connections
//! without any locking.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::fmt;

/// The primitive type of a single formal parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArgType {
    /// A keyspace key, taken verbatim
    Key,
    /// Arbitrary text, taken verbatim
    String,
    /// A glob-style pattern, taken verbatim
    Pattern,
    /// A signed 64-bit integer
    Integer,
    /// A signed 64-bit UNIX timestamp
    UnixTime,
    /// An IEEE double
    Double,
    /// Exactly one of the children (greedy, longest match wins)
    Oneof,
    /// All children, in order, as a nested argument bag
    Block,
    /// A bare keyword with no value after it
    PureToken,
}

impl ArgType {
    /// Name used by `COMMAND DOCS`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ArgType::Key => "key",
            ArgType::String => "string",
            ArgType::Pattern => "pattern",
            ArgType::Integer => "integer",
            ArgType::UnixTime => "unix-time",
            ArgType::Double => "double",
            ArgType::Oneof => "oneof",
            ArgType::Block => "block",
            ArgType::PureToken => "pure-token",
        }
    }

    /// Whether arguments of this type carry child arguments.
    pub fn has_children(&self) -> bool {
        matches!(self, ArgType::Oneof | ArgType::Block)
    }
}

impl fmt::Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One formal parameter of a command.
#[derive(Debug, Clone, Deserialize)]
pub struct ArgSpec {
    /// Output key in the parsed argument bag
    pub name: String,

    /// Primitive type
    #[serde(rename = "type")]
    pub kind: ArgType,

    /// Literal keyword that must precede the value
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub optional: bool,

    #[serde(default)]
    pub multiple: bool,

    /// The token is repeated in front of every repetition
    #[serde(default)]
    pub multiple_token: bool,

    /// Child arguments (oneof branches or block members)
    #[serde(default, rename = "arguments")]
    pub children: Vec<ArgSpec>,

    /// Index into the owning command's key specs
    #[serde(default)]
    pub key_spec_index: Option<usize>,
}

impl ArgSpec {
    /// Returns true if this argument is identified by a literal keyword.
    ///
    /// A oneof qualifies when every one of its branches does. Only
    /// token-identified optional arguments may appear out of order.
    pub fn is_token(&self) -> bool {
        if self.token.is_some() {
            return true;
        }
        self.kind == ArgType::Oneof
            && !self.children.is_empty()
            && self.children.iter().all(ArgSpec::is_token)
    }

    /// Returns true if this argument may repeat.
    #[inline]
    pub fn is_repeating(&self) -> bool {
        self.multiple || self.multiple_token
    }

    /// Doc-style flags for `COMMAND DOCS`.
    pub fn doc_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.optional {
            flags.push("optional");
        }
        if self.multiple {
            flags.push("multiple");
        }
        if self.multiple_token {
            flags.push("multiple_token");
        }
        flags
    }
}

/// Where the search for the first key starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeginSearch {
    /// The first key is at a fixed argument index
    Index { pos: i64 },
    /// The first key follows an anchor keyword
    Keyword {
        keyword: String,
        #[serde(default)]
        startfrom: i64,
    },
    /// Keys cannot be located without executing the command
    Unknown,
}

/// How the keys are laid out once the first one is found.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindKeys {
    /// Keys in a fixed-step range
    Range { lastkey: i64, step: i64, limit: i64 },
    /// A key count precedes the keys
    Keynum {
        keynumidx: i64,
        firstkey: i64,
        step: i64,
    },
    Unknown,
}

/// Locates the key arguments of a command.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeySpec {
    /// Access-mode tags (`RW`, `ACCESS`, `DELETE`, ...)
    #[serde(default)]
    pub flags: Vec<String>,
    pub begin_search: BeginSearch,
    pub find_keys: FindKeys,
}

/// One command or subcommand.
///
/// A spec is either a leaf (it has `arguments`, possibly none) or a branch
/// (it has `subcommands` and no arguments). Parsing always descends to a
/// leaf.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Canonical lowercase identity, `|`-separated for subcommands
    pub token: String,
    pub arguments: Vec<ArgSpec>,
    /// Child specs keyed by lowercase subcommand name
    pub subcommands: BTreeMap<String, CommandSpec>,
    pub key_specs: Vec<KeySpec>,
    pub acl_categories: Vec<String>,
}

impl CommandSpec {
    /// Returns true if this spec is directly parseable.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.subcommands.is_empty()
    }

    /// Looks up a direct subcommand by name (case-insensitive).
    pub fn subcommand(&self, name: &str) -> Option<&CommandSpec> {
        self.subcommands.get(&name.to_ascii_lowercase())
    }

    /// The name of this (sub)command without its parent path.
    pub fn name(&self) -> &str {
        self.token.rsplit('|').next().unwrap_or(&self.token)
    }

    /// The top-level command this spec belongs to.
    pub fn root(&self) -> &str {
        self.token.split('|').next().unwrap_or(&self.token)
    }

    /// Depth-first iterator over this spec and all of its descendants.
    pub fn walk(&self) -> Vec<&CommandSpec> {
        let mut out = vec![self];
        for child in self.subcommands.values() {
            out.extend(child.walk());
        }
        out
    }
}

/// Introspection data for one command or subcommand.
#[derive(Debug, Clone)]
pub struct CommandInfo {
    pub token: String,
    pub summary: String,
    pub since: String,
    pub group: String,
    pub complexity: Option<String>,
    pub arity: i64,
    pub flags: Vec<String>,
    /// Legacy `(first, last, step)` key positions
    pub first_key: i64,
    pub last_key: i64,
    pub key_step: i64,
}

impl CommandInfo {
    /// Derives the legacy key range from the first key spec, when it is a
    /// simple index/range spec.
    pub(crate) fn legacy_key_range(specs: &[KeySpec]) -> (i64, i64, i64) {
        match specs.first() {
            Some(KeySpec {
                begin_search: BeginSearch::Index { pos },
                find_keys: FindKeys::Range { lastkey, step, .. },
                ..
            }) => {
                let last = if *lastkey >= 0 { pos + lastkey } else { *lastkey };
                (*pos, last, *step)
            }
            _ => (0, 0, 0),
        }
    }
}

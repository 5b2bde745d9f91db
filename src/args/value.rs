//! Parsed Argument Values
//!
//! The output of the argument parser is an ordered bag of named, explicitly
//! typed values. Handlers pull what they need out of it with the typed
//! accessors on [`ParsedArgs`], which return an [`ArgError`] instead of
//! panicking when the grammar and the handler disagree.

use bytes::Bytes;
use thiserror::Error;

/// A single decoded argument value.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// integer / unix-time
    Integer(i64),

    /// double
    Double(f64),

    /// key / string / pattern, or an integer kept as literal text
    Text(Bytes),

    /// A pure-token that was present
    Present,

    /// Repetitions of a multiple argument, in input order
    List(Vec<ArgValue>),

    /// The members of a block
    Nested(ParsedArgs),
}

impl ArgValue {
    pub fn as_text(&self) -> Option<&Bytes> {
        match self {
            ArgValue::Text(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            ArgValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the value as a double. Integers widen.
    pub fn as_double(&self) -> Option<f64> {
        match self {
            ArgValue::Double(d) => Some(*d),
            ArgValue::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[ArgValue]> {
        match self {
            ArgValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_nested(&self) -> Option<&ParsedArgs> {
        match self {
            ArgValue::Nested(args) => Some(args),
            _ => None,
        }
    }

    /// Short type name used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ArgValue::Integer(_) => "integer",
            ArgValue::Double(_) => "double",
            ArgValue::Text(_) => "text",
            ArgValue::Present => "token",
            ArgValue::List(_) => "list",
            ArgValue::Nested(_) => "block",
        }
    }
}

/// Errors from the typed accessors of [`ParsedArgs`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgError {
    #[error("missing argument '{0}'")]
    Missing(String),

    #[error("argument '{name}' is {found}, expected {expected}")]
    WrongType {
        name: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// An ordered mapping from argument name to value.
///
/// Keys are unique: inserting an existing name replaces its value in place.
/// Oneof matches are stored under `"<argName>.<branchName>"`.
#[derive(Debug, Clone, Default)]
pub struct ParsedArgs {
    entries: Vec<(String, ArgValue)>,

    /// Input index of the block this bag was parsed from, when requested
    position: Option<usize>,
}

impl ParsedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, replacing any previous value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: ArgValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v)
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ArgValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Input index this block started at, if positions were recorded.
    pub fn position(&self) -> Option<usize> {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: usize) {
        self.position = Some(position);
    }

    fn require(&self, name: &str) -> Result<&ArgValue, ArgError> {
        self.get(name)
            .ok_or_else(|| ArgError::Missing(name.to_string()))
    }

    fn wrong(name: &str, expected: &'static str, found: &ArgValue) -> ArgError {
        ArgError::WrongType {
            name: name.to_string(),
            expected,
            found: found.type_name(),
        }
    }

    pub fn text(&self, name: &str) -> Result<&Bytes, ArgError> {
        let value = self.require(name)?;
        value.as_text().ok_or_else(|| Self::wrong(name, "text", value))
    }

    pub fn opt_text(&self, name: &str) -> Result<Option<&Bytes>, ArgError> {
        match self.get(name) {
            None => Ok(None),
            Some(_) => self.text(name).map(Some),
        }
    }

    pub fn integer(&self, name: &str) -> Result<i64, ArgError> {
        let value = self.require(name)?;
        value
            .as_integer()
            .ok_or_else(|| Self::wrong(name, "integer", value))
    }

    pub fn opt_integer(&self, name: &str) -> Result<Option<i64>, ArgError> {
        match self.get(name) {
            None => Ok(None),
            Some(_) => self.integer(name).map(Some),
        }
    }

    pub fn double(&self, name: &str) -> Result<f64, ArgError> {
        let value = self.require(name)?;
        value
            .as_double()
            .ok_or_else(|| Self::wrong(name, "double", value))
    }

    /// The repetitions of a multiple argument. Absent means no repetitions.
    pub fn list(&self, name: &str) -> Result<&[ArgValue], ArgError> {
        match self.get(name) {
            None => Ok(&[]),
            Some(value) => value.as_list().ok_or_else(|| Self::wrong(name, "list", value)),
        }
    }

    pub fn nested(&self, name: &str) -> Result<&ParsedArgs, ArgError> {
        let value = self.require(name)?;
        value
            .as_nested()
            .ok_or_else(|| Self::wrong(name, "block", value))
    }

    /// Finds the matched branch of a oneof argument.
    ///
    /// Returns the branch name and its value, or `None` if the oneof was
    /// absent.
    pub fn one_of(&self, name: &str) -> Option<(&str, &ArgValue)> {
        self.entries.iter().find_map(|(k, v)| {
            k.strip_prefix(name)
                .and_then(|rest| rest.strip_prefix('.'))
                .map(|branch| (branch, v))
        })
    }
}

/// Two bags are equal when they hold the same names bound to equal values;
/// insertion order is not significant.
impl PartialEq for ParsedArgs {
    fn eq(&self, other: &Self) -> bool {
        self.position == other.position
            && self.entries.len() == other.entries.len()
            && self
                .entries
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| o == v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &'static str) -> ArgValue {
        ArgValue::Text(Bytes::from_static(s.as_bytes()))
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut args = ParsedArgs::new();
        args.insert("a", ArgValue::Integer(1));
        args.insert("b", ArgValue::Integer(2));
        args.insert("a", ArgValue::Integer(3));

        let names: Vec<_> = args.iter().map(|(k, _)| k).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(args.integer("a"), Ok(3));
    }

    #[test]
    fn test_typed_accessors() {
        let mut args = ParsedArgs::new();
        args.insert("key", text("k"));
        args.insert("count", ArgValue::Integer(10));
        args.insert("ratio", ArgValue::Double(0.5));

        assert_eq!(args.text("key").unwrap().as_ref(), b"k");
        assert_eq!(args.opt_integer("count"), Ok(Some(10)));
        assert_eq!(args.opt_integer("missing"), Ok(None));
        assert_eq!(args.double("ratio"), Ok(0.5));
        assert_eq!(args.double("count"), Ok(10.0));
        assert!(args.list("missing").unwrap().is_empty());

        assert_eq!(
            args.integer("nope"),
            Err(ArgError::Missing("nope".to_string()))
        );
        assert!(matches!(
            args.integer("key"),
            Err(ArgError::WrongType { expected: "integer", found: "text", .. })
        ));
    }

    #[test]
    fn test_one_of_branch() {
        let mut args = ParsedArgs::new();
        args.insert("key", text("k"));
        args.insert("where.left", ArgValue::Present);

        let (branch, value) = args.one_of("where").unwrap();
        assert_eq!(branch, "left");
        assert_eq!(value, &ArgValue::Present);
        assert!(args.one_of("key").is_none());
        assert!(args.one_of("wh").is_none());
    }

    #[test]
    fn test_equality_ignores_order() {
        let mut a = ParsedArgs::new();
        a.insert("x", ArgValue::Present);
        a.insert("y", ArgValue::Integer(1));

        let mut b = ParsedArgs::new();
        b.insert("y", ArgValue::Integer(1));
        b.insert("x", ArgValue::Present);
        assert_eq!(a, b);

        b.insert("z", ArgValue::Present);
        assert_ne!(a, b);
    }
}

//! Key Extraction
//!
//! Finds the arguments of a command line that name keys, without running
//! the command. The line is re-parsed with keyword position recording on,
//! then every [`KeySpec`] of the resolved (sub)command is walked in order:
//!
//! | begin search | first key index                          |
//! |--------------|------------------------------------------|
//! | `index`      | the fixed position                       |
//! | `keyword`    | one past the single recorded keyword     |
//!
//! | find keys | end of the walk (exclusive)                               |
//! |-----------|-----------------------------------------------------------|
//! | `range`   | `first + lastkey + 1`, or relative to the argument count |
//! | `keynum`  | `first + count * step`, count read from the line          |
//!
//! An index that falls outside the line during the walk means the command
//! table itself is inconsistent and is reported as [`KeyError::Internal`].

use crate::args::parser::parse_integer;
use crate::args::{parse_command, KeywordPositions, ParseOptions};
use crate::spec::{BeginSearch, CommandTable, FindKeys, KeySpec};
use bytes::Bytes;
use thiserror::Error;
use tracing::error;

/// A key argument and the access flags of the spec that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRef {
    pub key: Bytes,
    pub flags: Vec<String>,
}

/// Key extraction failures. The `Display` text is the error reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("ERR Invalid command specified")]
    InvalidCommand,

    #[error("ERR Invalid arguments specified for command")]
    InvalidArguments,

    #[error("ERR The command has no key arguments")]
    NoKeys,

    #[error("ERR keyword '{keyword}' must appear exactly once to locate keys, found {found}")]
    AmbiguousKeyword { keyword: String, found: usize },

    #[error("ERR key search not supported for '{0}'")]
    Unsupported(String),

    #[error("ERR Invalid number of keys")]
    InvalidKeyCount,

    #[error("ERR Invalid key range")]
    InvalidRange,

    #[error("ERR internal error: {0}")]
    Internal(String),
}

/// Extracts the keys of `argv` (command name at index 0).
pub fn extract_keys(table: &CommandTable, argv: &[Bytes]) -> Result<Vec<KeyRef>, KeyError> {
    let name = argv
        .first()
        .and_then(|word| std::str::from_utf8(word).ok())
        .filter(|name| !name.contains('|'))
        .ok_or(KeyError::InvalidCommand)?;
    let spec = table.get(name).ok_or(KeyError::InvalidCommand)?;

    let outcome = parse_command(spec, argv, ParseOptions::for_command(name).recording());
    if !outcome.is_success() {
        return Err(KeyError::InvalidArguments);
    }

    let leaf = outcome.spec;
    if leaf.key_specs.is_empty() {
        return Err(KeyError::NoKeys);
    }

    let mut keys = Vec::new();
    for key_spec in &leaf.key_specs {
        let first = begin_index(&leaf.token, key_spec, &outcome.positions)?;
        let (first, end, step) = key_range(&leaf.token, key_spec, first, argv)?;

        if first < 0 || end < first || step < 1 {
            return Err(KeyError::InvalidRange);
        }

        let mut index = first;
        while index < end {
            let Some(key) = argv.get(index as usize) else {
                error!(
                    command = %leaf.token,
                    index,
                    argc = argv.len(),
                    "Key spec walked past the end of the arguments"
                );
                return Err(KeyError::Internal(format!(
                    "key index {} out of bounds for '{}'",
                    index, leaf.token
                )));
            };
            keys.push(KeyRef {
                key: key.clone(),
                flags: key_spec.flags.clone(),
            });
            index += step;
        }
    }
    Ok(keys)
}

fn begin_index(
    command: &str,
    key_spec: &KeySpec,
    positions: &KeywordPositions,
) -> Result<i64, KeyError> {
    match &key_spec.begin_search {
        BeginSearch::Index { pos } => Ok(*pos),
        BeginSearch::Keyword { keyword, .. } => match positions.get(keyword) {
            [position] => Ok(*position as i64 + 1),
            found => Err(KeyError::AmbiguousKeyword {
                keyword: keyword.clone(),
                found: found.len(),
            }),
        },
        BeginSearch::Unknown => Err(KeyError::Unsupported(command.to_string())),
    }
}

/// Returns `(first, end, step)` for the walk, `end` exclusive.
fn key_range(
    command: &str,
    key_spec: &KeySpec,
    begin: i64,
    argv: &[Bytes],
) -> Result<(i64, i64, i64), KeyError> {
    let argc = argv.len() as i64;
    match key_spec.find_keys {
        FindKeys::Range {
            lastkey,
            step,
            limit,
        } => {
            let end = if lastkey >= 0 {
                begin + lastkey + 1
            } else if limit > 1 {
                begin + (argc - begin) / limit
            } else {
                argc + lastkey + 1
            };
            Ok((begin, end, step))
        }
        FindKeys::Keynum {
            keynumidx,
            firstkey,
            step,
        } => {
            let count_index = begin + keynumidx;
            let count = usize::try_from(count_index)
                .ok()
                .and_then(|i| argv.get(i))
                .and_then(|word| parse_integer(word))
                .filter(|count| *count >= 0)
                .ok_or(KeyError::InvalidKeyCount)?;

            let first = begin + firstkey;
            let end = count
                .checked_mul(step)
                .and_then(|span| first.checked_add(span))
                .ok_or(KeyError::InvalidKeyCount)?;
            if end > argc {
                return Err(KeyError::InvalidKeyCount);
            }
            Ok((first, end, step))
        }
        FindKeys::Unknown => Err(KeyError::Unsupported(command.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(words: &[&str]) -> Vec<Bytes> {
        words
            .iter()
            .map(|w| Bytes::copy_from_slice(w.as_bytes()))
            .collect()
    }

    fn keys(words: &[&str]) -> Result<Vec<String>, KeyError> {
        let table = CommandTable::builtin().unwrap();
        extract_keys(&table, &argv(words)).map(|refs| {
            refs.into_iter()
                .map(|r| String::from_utf8(r.key.to_vec()).unwrap())
                .collect()
        })
    }

    #[test]
    fn test_single_key() {
        assert_eq!(keys(&["SET", "key1", "val1", "NX"]).unwrap(), vec!["key1"]);
        assert_eq!(keys(&["get", "k"]).unwrap(), vec!["k"]);
    }

    #[test]
    fn test_range_to_end() {
        assert_eq!(keys(&["DEL", "a", "b", "c"]).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_range_with_step() {
        assert_eq!(
            keys(&["MSET", "k1", "v1", "k2", "v2"]).unwrap(),
            vec!["k1", "k2"]
        );
    }

    #[test]
    fn test_keynum() {
        assert_eq!(
            keys(&["LMPOP", "2", "key1", "key2", "LEFT", "COUNT", "10"]).unwrap(),
            vec!["key1", "key2"]
        );
        assert_eq!(
            keys(&["SINTERCARD", "2", "a", "b", "LIMIT", "5"]).unwrap(),
            vec!["a", "b"]
        );
    }

    #[test]
    fn test_multiple_key_specs() {
        assert_eq!(keys(&["RENAME", "old", "new"]).unwrap(), vec!["old", "new"]);
        assert_eq!(
            keys(&["LMOVE", "src", "dst", "LEFT", "RIGHT"]).unwrap(),
            vec!["src", "dst"]
        );
    }

    #[test]
    fn test_keyword_anchor() {
        assert_eq!(
            keys(&["SORT", "list", "GET", "a", "STORE", "dst"]).unwrap(),
            vec!["list", "dst"]
        );
        assert_eq!(
            keys(&["SORT", "list", "ALPHA"]),
            Err(KeyError::AmbiguousKeyword {
                keyword: "STORE".into(),
                found: 0
            })
        );
    }

    #[test]
    fn test_flags_follow_key_spec() {
        let table = CommandTable::builtin().unwrap();
        let refs = extract_keys(&table, &argv(&["RENAME", "old", "new"])).unwrap();
        let spec = table.get("rename").unwrap();
        assert_eq!(refs[0].flags, spec.key_specs[0].flags);
        assert_eq!(refs[1].flags, spec.key_specs[1].flags);
    }

    #[test]
    fn test_errors() {
        assert_eq!(keys(&["NOSUCH", "a"]), Err(KeyError::InvalidCommand));
        assert_eq!(keys(&["client|kill", "a"]), Err(KeyError::InvalidCommand));
        assert_eq!(keys(&["GET"]), Err(KeyError::InvalidArguments));
        assert_eq!(keys(&["PING"]), Err(KeyError::NoKeys));
    }

    #[test]
    fn test_keynum_is_bounds_checked() {
        let spec = KeySpec {
            flags: vec![],
            begin_search: BeginSearch::Index { pos: 1 },
            find_keys: FindKeys::Keynum {
                keynumidx: 0,
                firstkey: 1,
                step: 1,
            },
        };
        let line = argv(&["X", "5", "a", "b"]);
        assert_eq!(key_range("x", &spec, 1, &line), Err(KeyError::InvalidKeyCount));
        let line = argv(&["X", "-1", "a"]);
        assert_eq!(key_range("x", &spec, 1, &line), Err(KeyError::InvalidKeyCount));
        let line = argv(&["X", "2", "a", "b"]);
        assert_eq!(key_range("x", &spec, 1, &line), Ok((2, 4, 1)));
    }

    #[test]
    fn test_walk_past_end_is_internal() {
        let json = r#"{
            "BROKEN": {
                "arity": -2,
                "key_specs": [{
                    "flags": ["RO"],
                    "begin_search": {"index": {"pos": 1}},
                    "find_keys": {"range": {"lastkey": 3, "step": 1, "limit": 0}}
                }],
                "arguments": [{"name": "key", "type": "key", "key_spec_index": 0}]
            }
        }"#;
        let table = CommandTable::from_json(json).unwrap();
        assert!(matches!(
            extract_keys(&table, &argv(&["BROKEN", "k"])),
            Err(KeyError::Internal(_))
        ));
    }
    fn fixture_keys(json: &str, words: &[&str]) -> Result<Vec<String>, KeyError> {
        let table = CommandTable::from_json(json).unwrap();
        extract_keys(&table, &argv(words)).map(|refs| {
            refs.into_iter()
                .map(|r| String::from_utf8(r.key.to_vec()).unwrap())
                .collect()
        })
    }

    #[test]
    fn test_range_limit_splits_remaining_args() {
        let json = |limit: i64| {
            format!(
                r#"{{
                    "SPLITKEYS": {{
                        "arity": -2,
                        "key_specs": [{{
                            "flags": ["RW"],
                            "begin_search": {{"index": {{"pos": 1}}}},
                            "find_keys": {{"range": {{"lastkey": -1, "step": 1, "limit": {}}}}}
                        }}],
                        "arguments": [
                            {{"name": "arg", "type": "key", "multiple": true, "key_spec_index": 0}}
                        ]
                    }}
                }}"#,
                limit
            )
        };
        let line = ["SPLITKEYS", "a", "b", "c", "d", "e", "f"];

        assert_eq!(fixture_keys(&json(2), &line).unwrap(), vec!["a", "b", "c"]);
        assert_eq!(fixture_keys(&json(3), &line).unwrap(), vec!["a", "b"]);
        assert_eq!(fixture_keys(&json(2), &line[..5]).unwrap(), vec!["a", "b"]);
        assert_eq!(
            fixture_keys(&json(0), &line).unwrap(),
            vec!["a", "b", "c", "d", "e", "f"]
        );
        assert_eq!(
            fixture_keys(&json(1), &line).unwrap(),
            vec!["a", "b", "c", "d", "e", "f"]
        );
    }

    const GATHER: &str = r#"{
        "GATHER": {
            "arity": -2,
            "key_specs": [
                {
                    "flags": ["OW"],
                    "begin_search": {"index": {"pos": 1}},
                    "find_keys": {"range": {"lastkey": 0, "step": 1, "limit": 0}}
                },
                {
                    "flags": ["RO"],
                    "begin_search": {"keyword": {"keyword": "FROM", "startfrom": 2}},
                    "find_keys": {"range": {"lastkey": 0, "step": 1, "limit": 0}}
                }
            ],
            "arguments": [
                {"name": "destination", "type": "key", "key_spec_index": 0},
                {"name": "source", "type": "key", "token": "FROM", "optional": true,
                 "multiple": true, "multiple_token": true, "key_spec_index": 1},
                {"name": "now", "type": "pure-token", "token": "NOW", "optional": true}
            ]
        }
    }"#;

    #[test]
    fn test_keyword_anchor_must_be_unique() {
        assert_eq!(
            fixture_keys(GATHER, &["GATHER", "dst", "FROM", "a", "NOW"]).unwrap(),
            vec!["dst", "a"]
        );
        assert_eq!(
            fixture_keys(GATHER, &["GATHER", "dst", "FROM", "a", "FROM", "b", "NOW"]),
            Err(KeyError::AmbiguousKeyword {
                keyword: "FROM".into(),
                found: 2
            })
        );
    }

    #[test]
    fn test_unknown_key_search_is_unsupported() {
        let json = r#"{
            "OPAQUE": {
                "arity": -2,
                "key_specs": [{"flags": ["RW"], "begin_search": "unknown", "find_keys": "unknown"}],
                "arguments": [{"name": "arg", "type": "string", "multiple": true}]
            },
            "HALFKNOWN": {
                "arity": -2,
                "key_specs": [{
                    "flags": ["RW"],
                    "begin_search": {"index": {"pos": 1}},
                    "find_keys": "unknown"
                }],
                "arguments": [{"name": "key", "type": "key", "key_spec_index": 0}]
            }
        }"#;
        assert_eq!(
            fixture_keys(json, &["OPAQUE", "x", "y"]),
            Err(KeyError::Unsupported("opaque".into()))
        );
        assert_eq!(
            fixture_keys(json, &["HALFKNOWN", "k"]),
            Err(KeyError::Unsupported("halfknown".into()))
        );
    }
}

//! The Command Table
//!
//! Loads the embedded JSON command definitions once at startup and exposes
//! two parallel, read-only views of them:
//!
//! - the grammar table: top-level [`CommandSpec`] trees, subcommands nested
//! - the info table: [`CommandInfo`] keyed by flat piped token (`client|kill`)

use super::model::{ArgSpec, ArgType, CommandInfo, CommandSpec, KeySpec};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

/// The command definitions shipped with the server.
const BUILTIN_COMMANDS: &str = include_str!("commands.json");

/// Errors raised while loading or validating a command table.
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("malformed command table: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid definition for '{command}': {reason}")]
    Invalid { command: String, reason: String },
}

/// Raw JSON shape of one command.
#[derive(Debug, Deserialize)]
struct CommandDef {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    since: String,
    #[serde(default)]
    group: String,
    #[serde(default)]
    complexity: Option<String>,
    arity: i64,
    #[serde(default)]
    command_flags: Vec<String>,
    #[serde(default)]
    acl_categories: Vec<String>,
    #[serde(default)]
    key_specs: Vec<KeySpec>,
    #[serde(default)]
    arguments: Vec<ArgSpec>,
    #[serde(default)]
    subcommands: BTreeMap<String, CommandDef>,
}

/// The immutable command grammar and introspection tables.
#[derive(Debug, Clone)]
pub struct CommandTable {
    commands: BTreeMap<String, CommandSpec>,
    info: HashMap<String, CommandInfo>,
}

impl CommandTable {
    /// Loads the built-in command table.
    pub fn builtin() -> Result<Self, SpecError> {
        Self::from_json(BUILTIN_COMMANDS)
    }

    /// Loads a command table from its JSON representation.
    pub fn from_json(json: &str) -> Result<Self, SpecError> {
        let defs: BTreeMap<String, CommandDef> = serde_json::from_str(json)?;

        let mut commands = BTreeMap::new();
        let mut info = HashMap::new();
        for (name, def) in defs {
            let token = name.to_ascii_lowercase();
            let spec = build(&token, def, &mut info)?;
            commands.insert(token, spec);
        }

        debug!(
            commands = commands.len(),
            tokens = info.len(),
            "Command table loaded"
        );
        Ok(Self { commands, info })
    }

    /// Looks up a command or subcommand by token (`set`, `client|kill`).
    ///
    /// Lookup is case-insensitive.
    pub fn get(&self, token: &str) -> Option<&CommandSpec> {
        let token = token.to_ascii_lowercase();
        let mut parts = token.split('|');
        let mut spec = self.commands.get(parts.next()?)?;
        for part in parts {
            spec = spec.subcommands.get(part)?;
        }
        Some(spec)
    }

    /// Looks up the introspection info for a token.
    pub fn info(&self, token: &str) -> Option<&CommandInfo> {
        self.info.get(&token.to_ascii_lowercase())
    }

    /// Top-level commands in sorted order.
    pub fn commands(&self) -> impl Iterator<Item = &CommandSpec> {
        self.commands.values()
    }

    /// Every directly parseable spec, subcommands included.
    pub fn leaves(&self) -> Vec<&CommandSpec> {
        self.commands
            .values()
            .flat_map(CommandSpec::walk)
            .filter(|spec| spec.is_leaf())
            .collect()
    }

    /// Number of top-level commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

fn build(
    token: &str,
    def: CommandDef,
    info: &mut HashMap<String, CommandInfo>,
) -> Result<CommandSpec, SpecError> {
    if !def.subcommands.is_empty() && !def.arguments.is_empty() {
        return Err(invalid(token, "a command with subcommands cannot take arguments"));
    }
    for arg in &def.arguments {
        validate_arg(token, arg)?;
    }
    for arg in &def.arguments {
        if let Some(index) = arg.key_spec_index {
            if index >= def.key_specs.len() {
                return Err(invalid(
                    token,
                    format!("argument '{}' refers to missing key spec {}", arg.name, index),
                ));
            }
        }
    }

    let (first_key, last_key, key_step) = CommandInfo::legacy_key_range(&def.key_specs);
    info.insert(
        token.to_string(),
        CommandInfo {
            token: token.to_string(),
            summary: def.summary,
            since: def.since,
            group: def.group,
            complexity: def.complexity,
            arity: def.arity,
            flags: def.command_flags,
            first_key,
            last_key,
            key_step,
        },
    );

    let mut subcommands = BTreeMap::new();
    for (name, child) in def.subcommands {
        let name = name.to_ascii_lowercase();
        let child_token = format!("{}|{}", token, name);
        subcommands.insert(name, build(&child_token, child, info)?);
    }

    Ok(CommandSpec {
        token: token.to_string(),
        arguments: def.arguments,
        subcommands,
        key_specs: def.key_specs,
        acl_categories: def.acl_categories,
    })
}

fn validate_arg(command: &str, arg: &ArgSpec) -> Result<(), SpecError> {
    if arg.kind.has_children() {
        if arg.children.is_empty() {
            return Err(invalid(
                command,
                format!("{} '{}' has no children", arg.kind, arg.name),
            ));
        }
    } else if !arg.children.is_empty() {
        return Err(invalid(
            command,
            format!("{} '{}' cannot carry children", arg.kind, arg.name),
        ));
    }

    if arg.kind == ArgType::PureToken && arg.token.is_none() {
        return Err(invalid(
            command,
            format!("pure-token '{}' has no token", arg.name),
        ));
    }

    arg.children
        .iter()
        .try_for_each(|child| validate_arg(command, child))
}

fn invalid(command: &str, reason: impl Into<String>) -> SpecError {
    SpecError::Invalid {
        command: command.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{BeginSearch, FindKeys};

    #[test]
    fn test_builtin_table_loads() {
        let table = CommandTable::builtin().unwrap();
        assert!(table.get("set").is_some());
        assert!(table.get("SET").is_some());
        assert!(table.get("nosuchcommand").is_none());
    }

    #[test]
    fn test_subcommand_lookup() {
        let table = CommandTable::builtin().unwrap();
        let kill = table.get("client|kill").unwrap();
        assert_eq!(kill.token, "client|kill");
        assert_eq!(kill.name(), "kill");
        assert_eq!(kill.root(), "client");
        assert!(kill.is_leaf());

        let client = table.get("CLIENT").unwrap();
        assert!(!client.is_leaf());
        assert!(client.arguments.is_empty());
        assert!(client.subcommand("KILL").is_some());
    }

    #[test]
    fn test_every_token_has_info() {
        let table = CommandTable::builtin().unwrap();
        for spec in table.commands().flat_map(CommandSpec::walk) {
            assert!(table.info(&spec.token).is_some(), "{}", spec.token);
        }
    }

    #[test]
    fn test_builtin_key_specs() {
        let table = CommandTable::builtin().unwrap();

        let lmpop = table.get("lmpop").unwrap();
        assert_eq!(lmpop.key_specs[0].begin_search, BeginSearch::Index { pos: 1 });
        assert!(matches!(lmpop.key_specs[0].find_keys, FindKeys::Keynum { .. }));

        let info = table.info("mset").unwrap();
        assert_eq!((info.first_key, info.last_key, info.key_step), (1, -1, 2));
    }

    #[test]
    fn test_rejects_children_on_plain_argument() {
        let json = r#"{"BAD": {"arity": 2, "arguments": [
            {"name": "k", "type": "key", "arguments": [{"name": "x", "type": "string"}]}
        ]}}"#;
        let err = CommandTable::from_json(json).unwrap_err();
        assert!(matches!(err, SpecError::Invalid { ref command, .. } if command == "bad"));
    }

    #[test]
    fn test_rejects_empty_oneof() {
        let json = r#"{"BAD": {"arity": 2, "arguments": [
            {"name": "choice", "type": "oneof"}
        ]}}"#;
        assert!(CommandTable::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_pure_token_without_token() {
        let json = r#"{"BAD": {"arity": 2, "arguments": [
            {"name": "flag", "type": "pure-token"}
        ]}}"#;
        assert!(CommandTable::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_branch_with_arguments() {
        let json = r#"{"BAD": {"arity": -2,
            "arguments": [{"name": "k", "type": "key"}],
            "subcommands": {"SUB": {"arity": 2}}
        }}"#;
        assert!(CommandTable::from_json(json).is_err());
    }
}

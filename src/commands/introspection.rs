//! COMMAND Introspection
//!
//! Answers from the same [`CommandTable`] the parser uses, restricted to
//! the commands that have a bound handler. A command with subcommands is
//! listed when at least one of its subcommands is bound.

use super::{texts, CommandResult};
use crate::args::ParsedArgs;
use crate::dispatch::{Context, Registry, RegistryError};
use crate::keys::extract_keys;
use crate::protocol::RespValue;
use crate::spec::{ArgSpec, BeginSearch, CommandSpec, FindKeys, KeySpec};
use crate::storage::GlobPattern;

pub(crate) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.bind("command|count", count)?;
    registry.bind("command|list", list)?;
    registry.bind("command|info", info)?;
    registry.bind("command|docs", docs)?;
    registry.bind("command|getkeys", getkeys)?;
    registry.bind("command|getkeysandflags", getkeysandflags)?;
    registry.bind("command|help", help)?;
    Ok(())
}

/// Whether `token` is bound, or is the parent of a bound subcommand.
fn is_active(registry: &Registry, token: &str) -> bool {
    registry.is_bound(token)
        || registry
            .bound()
            .any(|bound| bound.strip_prefix(token).is_some_and(|rest| rest.starts_with('|')))
}

/// Active top-level commands in sorted order.
fn active_specs(registry: &Registry) -> Vec<&CommandSpec> {
    registry
        .active_commands()
        .into_iter()
        .filter_map(|token| registry.table().get(token))
        .collect()
}

/// Every active command and subcommand.
fn all_specs(registry: &Registry) -> Vec<&CommandSpec> {
    active_specs(registry)
        .into_iter()
        .flat_map(CommandSpec::walk)
        .filter(|spec| is_active(registry, &spec.token))
        .collect()
}

fn count(ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    Ok(RespValue::integer(ctx.dispatcher.registry().active_commands().len() as i64))
}

fn in_category(spec: &CommandSpec, category: &str) -> bool {
    let category = category.trim_start_matches('@');
    spec.acl_categories
        .iter()
        .any(|c| c.trim_start_matches('@').eq_ignore_ascii_case(category))
}

/// Every command and subcommand name, optionally filtered.
fn list(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let specs = all_specs(ctx.dispatcher.registry());
    let names: Vec<String> = match args.one_of("filterby") {
        // No modules are ever loaded.
        Some(("module-name", _)) => Vec::new(),
        Some(("category", value)) => {
            let category = value.as_text().map(|c| String::from_utf8_lossy(c)).unwrap_or_default();
            specs
                .iter()
                .filter(|spec| in_category(spec, &category))
                .map(|spec| spec.token.clone())
                .collect()
        }
        Some(("pattern", value)) => {
            let pattern = GlobPattern::new(value.as_text().cloned().unwrap_or_default()).nocase();
            specs
                .iter()
                .filter(|spec| pattern.matches(&spec.token))
                .map(|spec| spec.token.clone())
                .collect()
        }
        _ => specs.iter().map(|spec| spec.token.clone()).collect(),
    };
    Ok(RespValue::bulk_array(names))
}

/// The specs named by `command-name`, or every active top-level command.
/// Unknown and inactive names yield `None`.
fn requested<'r>(
    registry: &'r Registry,
    args: &ParsedArgs,
) -> Result<Vec<(String, Option<&'r CommandSpec>)>, super::CommandError> {
    let names = texts(args, "command-name")?;
    if names.is_empty() {
        return Ok(active_specs(registry)
            .into_iter()
            .map(|spec| (spec.token.clone(), Some(spec)))
            .collect());
    }
    Ok(names
        .iter()
        .map(|name| {
            let name = String::from_utf8_lossy(name).to_ascii_lowercase();
            let spec = registry
                .table()
                .get(&name)
                .filter(|spec| is_active(registry, &spec.token));
            (name, spec)
        })
        .collect())
}

fn simple_strings<'a>(items: impl IntoIterator<Item = &'a String>) -> RespValue {
    RespValue::array(
        items
            .into_iter()
            .map(|s| RespValue::simple_string(s.to_ascii_lowercase()))
            .collect(),
    )
}

fn key_spec_reply(key_spec: &KeySpec) -> RespValue {
    let text = RespValue::bulk_str;
    let begin_search = match &key_spec.begin_search {
        BeginSearch::Index { pos } => RespValue::map(vec![
            (text("type"), text("index")),
            (text("spec"), RespValue::map(vec![(text("index"), RespValue::integer(*pos))])),
        ]),
        BeginSearch::Keyword { keyword, startfrom } => RespValue::map(vec![
            (text("type"), text("keyword")),
            (
                text("spec"),
                RespValue::map(vec![
                    (text("keyword"), text(keyword)),
                    (text("startfrom"), RespValue::integer(*startfrom)),
                ]),
            ),
        ]),
        BeginSearch::Unknown => RespValue::map(vec![(text("type"), text("unknown"))]),
    };
    let find_keys = match &key_spec.find_keys {
        FindKeys::Range { lastkey, step, limit } => RespValue::map(vec![
            (text("type"), text("range")),
            (
                text("spec"),
                RespValue::map(vec![
                    (text("lastkey"), RespValue::integer(*lastkey)),
                    (text("keystep"), RespValue::integer(*step)),
                    (text("limit"), RespValue::integer(*limit)),
                ]),
            ),
        ]),
        FindKeys::Keynum { keynumidx, firstkey, step } => RespValue::map(vec![
            (text("type"), text("keynum")),
            (
                text("spec"),
                RespValue::map(vec![
                    (text("keynumidx"), RespValue::integer(*keynumidx)),
                    (text("firstkey"), RespValue::integer(*firstkey)),
                    (text("keystep"), RespValue::integer(*step)),
                ]),
            ),
        ]),
        FindKeys::Unknown => RespValue::map(vec![(text("type"), text("unknown"))]),
    };
    RespValue::map(vec![
        (text("flags"), simple_strings(&key_spec.flags)),
        (text("begin_search"), begin_search),
        (text("find_keys"), find_keys),
    ])
}

/// `[name, arity, flags, first, last, step, categories, tips, key specs,
/// subcommands]`
fn info_reply(registry: &Registry, spec: &CommandSpec) -> RespValue {
    let Some(info) = registry.table().info(&spec.token) else {
        return RespValue::Null;
    };
    let categories = spec
        .acl_categories
        .iter()
        .map(|c| RespValue::simple_string(format!("@{}", c.trim_start_matches('@').to_ascii_lowercase())))
        .collect();
    RespValue::array(vec![
        RespValue::bulk_str(&spec.token),
        RespValue::integer(info.arity),
        simple_strings(&info.flags),
        RespValue::integer(info.first_key),
        RespValue::integer(info.last_key),
        RespValue::integer(info.key_step),
        RespValue::array(categories),
        RespValue::array(vec![]),
        RespValue::array(spec.key_specs.iter().map(key_spec_reply).collect()),
        RespValue::array(
            spec.subcommands
                .values()
                .filter(|sub| is_active(registry, &sub.token))
                .map(|sub| info_reply(registry, sub))
                .collect(),
        ),
    ])
}

fn info(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let registry = ctx.dispatcher.registry();
    let replies = requested(registry, args)?
        .into_iter()
        .map(|(_, spec)| spec.map_or(RespValue::Null, |spec| info_reply(registry, spec)))
        .collect();
    Ok(RespValue::array(replies))
}

fn arg_doc(arg: &ArgSpec) -> RespValue {
    let text = RespValue::bulk_str;
    let mut fields = vec![
        (text("name"), text(&arg.name)),
        (text("type"), text(arg.kind.as_str())),
    ];
    if let Some(token) = &arg.token {
        fields.push((text("token"), text(token)));
    }
    let flags = arg.doc_flags();
    if !flags.is_empty() {
        fields.push((
            text("flags"),
            RespValue::array(flags.into_iter().map(RespValue::simple_string).collect()),
        ));
    }
    if !arg.children.is_empty() {
        fields.push((
            text("arguments"),
            RespValue::array(arg.children.iter().map(arg_doc).collect()),
        ));
    }
    RespValue::map(fields)
}

fn docs_reply(registry: &Registry, spec: &CommandSpec) -> RespValue {
    let text = RespValue::bulk_str;
    let mut fields = Vec::new();
    if let Some(info) = registry.table().info(&spec.token) {
        fields.push((text("summary"), text(&info.summary)));
        fields.push((text("since"), text(&info.since)));
        fields.push((text("group"), text(&info.group)));
        if let Some(complexity) = &info.complexity {
            fields.push((text("complexity"), text(complexity)));
        }
    }
    if !spec.arguments.is_empty() {
        fields.push((
            text("arguments"),
            RespValue::array(spec.arguments.iter().map(arg_doc).collect()),
        ));
    }
    let subcommands: Vec<_> = spec
        .subcommands
        .values()
        .filter(|sub| is_active(registry, &sub.token))
        .map(|sub| (text(&sub.token), docs_reply(registry, sub)))
        .collect();
    if !subcommands.is_empty() {
        fields.push((text("subcommands"), RespValue::map(subcommands)));
    }
    RespValue::map(fields)
}

/// A map of name to documentation; unknown names are left out.
fn docs(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let registry = ctx.dispatcher.registry();
    let entries = requested(registry, args)?
        .into_iter()
        .filter_map(|(name, spec)| spec.map(|spec| (RespValue::bulk_str(&name), docs_reply(registry, spec))))
        .collect();
    Ok(RespValue::map(entries))
}

fn getkeys(ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    Ok(match extract_keys(ctx.table(), &ctx.argv[2..]) {
        Ok(keys) => RespValue::array(keys.into_iter().map(|k| RespValue::BulkString(k.key)).collect()),
        Err(e) => RespValue::error(e.to_string()),
    })
}

fn getkeysandflags(ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    Ok(match extract_keys(ctx.table(), &ctx.argv[2..]) {
        Ok(keys) => RespValue::array(
            keys.into_iter()
                .map(|k| {
                    RespValue::array(vec![RespValue::BulkString(k.key), simple_strings(&k.flags)])
                })
                .collect(),
        ),
        Err(e) => RespValue::error(e.to_string()),
    })
}

const HELP: &[&str] = &[
    "COMMAND <subcommand> [<arg> [value] [opt] ...]. Subcommands are:",
    "COUNT",
    "    Return the total number of commands in this server.",
    "LIST [FILTERBY (MODULE <module-name>|ACLCAT <category>|PATTERN <pattern>)]",
    "    Return a list of all commands in this server.",
    "INFO [<command-name> ...]",
    "    Return details about the given commands, or all of them.",
    "DOCS [<command-name> ...]",
    "    Return documentation details about the given commands, or all of them.",
    "GETKEYS <full-command>",
    "    Return the keys from a full command.",
    "GETKEYSANDFLAGS <full-command>",
    "    Return the keys and the access flags from a full command.",
    "HELP",
    "    Print this help.",
];

fn help(_ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    Ok(RespValue::array(HELP.iter().map(|line| RespValue::simple_string(*line)).collect()))
}

#[cfg(test)]
mod tests {
    use crate::args::ParsedArgs;
    use crate::commands::testing::{bulk, bulks, run, server, sorted};
    use crate::commands::CommandResult;
    use crate::dispatch::{Context, Dispatcher, Registry};
    use crate::protocol::RespValue;
    use crate::spec::CommandTable;
    use crate::storage::StorageEngine;
    use std::sync::Arc;

    fn ok(_ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
        Ok(RespValue::ok())
    }

    /// A server with only GET, CLIENT ID and the COMMAND subcommands bound.
    fn partial_server() -> Dispatcher {
        let mut registry = Registry::new(Arc::new(CommandTable::builtin().unwrap()));
        super::register(&mut registry).unwrap();
        registry.bind("get", ok).unwrap();
        registry.bind("client|id", ok).unwrap();
        Dispatcher::new(registry, Arc::new(StorageEngine::new()))
    }

    #[test]
    fn test_count_and_list() {
        let (d, mut s) = server();
        let count = run(&d, &mut s, "COMMAND COUNT").as_integer().unwrap();
        assert_eq!(count as usize, d.registry().active_commands().len());
        assert_eq!(count as usize, d.registry().table().len());

        let names = sorted(run(&d, &mut s, "COMMAND LIST"));
        assert!(names.contains(&"get".to_string()));
        assert!(names.contains(&"client|kill".to_string()));
    }

    #[test]
    fn test_only_bound_commands_are_listed() {
        let d = partial_server();
        let mut s = d.open_session("127.0.0.1:50000", "127.0.0.1:6379");

        assert_eq!(run(&d, &mut s, "COMMAND COUNT"), RespValue::integer(3));
        let names = sorted(run(&d, &mut s, "COMMAND LIST"));
        assert!(names.contains(&"get".to_string()));
        assert!(names.contains(&"client".to_string()));
        assert!(names.contains(&"client|id".to_string()));
        assert!(names.contains(&"command|count".to_string()));
        assert!(!names.contains(&"set".to_string()));
        assert!(!names.contains(&"client|kill".to_string()));
        assert_eq!(
            sorted(run(&d, &mut s, "COMMAND LIST FILTERBY PATTERN client*")),
            vec!["client", "client|id"]
        );

        let info = run(&d, &mut s, "COMMAND INFO").into_array().unwrap();
        assert_eq!(info.len(), 3);
        let names: Vec<_> = info.iter().map(|entry| entry.as_array().unwrap()[0].clone()).collect();
        assert_eq!(names, vec![bulk("client"), bulk("command"), bulk("get")]);
        let client_subcommands = info[0].as_array().unwrap()[9].as_array().unwrap();
        assert_eq!(client_subcommands.len(), 1);
        assert_eq!(client_subcommands[0].as_array().unwrap()[0], bulk("client|id"));

        let reply = run(&d, &mut s, "COMMAND INFO set get").into_array().unwrap();
        assert_eq!(reply[0], RespValue::Null);
        assert_ne!(reply[1], RespValue::Null);

        let RespValue::Map(entries) = run(&d, &mut s, "COMMAND DOCS set get") else {
            panic!("expected a map");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, bulk("get"));
    }

    #[test]
    fn test_list_filters() {
        let (d, mut s) = server();
        assert_eq!(run(&d, &mut s, "COMMAND LIST FILTERBY MODULE json"), bulks(&[]));
        assert_eq!(
            sorted(run(&d, &mut s, "COMMAND LIST FILTERBY PATTERN L*POP")),
            vec!["lmpop", "lpop"]
        );
        assert_eq!(
            sorted(run(&d, &mut s, "COMMAND LIST FILTERBY PATTERN client|k*")),
            vec!["client|kill"]
        );
        let hashes = sorted(run(&d, &mut s, "COMMAND LIST FILTERBY ACLCAT hash"));
        assert!(hashes.contains(&"hset".to_string()));
        assert!(!hashes.contains(&"get".to_string()));
        assert_eq!(hashes, sorted(run(&d, &mut s, "COMMAND LIST FILTERBY ACLCAT @hash")));
    }

    #[test]
    fn test_info() {
        let (d, mut s) = server();
        let reply = run(&d, &mut s, "COMMAND INFO get nosuch").into_array().unwrap();
        assert_eq!(reply[1], RespValue::Null);
        let get = reply[0].as_array().unwrap();
        assert_eq!(get[0], bulk("get"));
        assert_eq!(get[1], RespValue::integer(2));
        assert_eq!(&get[3..6], &[RespValue::integer(1), RespValue::integer(1), RespValue::integer(1)]);
    }

    #[test]
    fn test_docs() {
        let (d, mut s) = server();
        let RespValue::Map(entries) = run(&d, &mut s, "COMMAND DOCS get nosuch") else {
            panic!("expected a map");
        };
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, bulk("get"));
        let RespValue::Map(fields) = &entries[0].1 else {
            panic!("expected a map");
        };
        assert!(fields.contains(&(bulk("group"), bulk("string"))));
    }

    #[test]
    fn test_getkeys() {
        let (d, mut s) = server();
        assert_eq!(
            run(&d, &mut s, "COMMAND GETKEYS MSET a 1 b 2"),
            bulks(&["a", "b"])
        );
        assert_eq!(
            run(&d, &mut s, "COMMAND GETKEYS SORT l STORE dst"),
            bulks(&["l", "dst"])
        );
        assert_eq!(
            run(&d, &mut s, "COMMAND GETKEYS PING"),
            RespValue::error("ERR The command has no key arguments")
        );
        assert_eq!(
            run(&d, &mut s, "COMMAND GETKEYS NOSUCH a"),
            RespValue::error("ERR Invalid command specified")
        );
        assert_eq!(
            run(&d, &mut s, "COMMAND GETKEYS GET"),
            RespValue::error("ERR Invalid arguments specified for command")
        );
    }

    #[test]
    fn test_getkeysandflags() {
        let (d, mut s) = server();
        let reply = run(&d, &mut s, "COMMAND GETKEYSANDFLAGS GET k").into_array().unwrap();
        let entry = reply[0].as_array().unwrap();
        assert_eq!(entry[0], bulk("k"));
        assert_eq!(
            entry[1],
            RespValue::array(vec![
                RespValue::simple_string("ro"),
                RespValue::simple_string("access")
            ])
        );
    }

    #[test]
    fn test_help() {
        let (d, mut s) = server();
        let lines = run(&d, &mut s, "COMMAND HELP").into_array().unwrap();
        assert!(lines.len() > 5);
    }
}

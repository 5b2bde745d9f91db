//! CLIENT Commands

use super::{CommandResult, SYNTAX_ERROR};
use crate::args::{ArgValue, ParsedArgs};
use crate::connection::ClientHandle;
use crate::dispatch::{Context, Registry, RegistryError};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::sync::Arc;

pub(crate) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.bind("client|id", id)?;
    registry.bind("client|getname", getname)?;
    registry.bind("client|setname", setname)?;
    registry.bind("client|info", info)?;
    registry.bind("client|list", list)?;
    registry.bind("client|kill", kill)?;
    registry.bind("client|help", help)?;
    Ok(())
}

fn id(ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    Ok(RespValue::integer(ctx.session.client().id() as i64))
}

fn getname(ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    Ok(ctx
        .session
        .client()
        .name()
        .map_or(RespValue::Null, RespValue::BulkString))
}

/// Names are printable ASCII without spaces; an empty name clears it.
fn setname(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let name = args.text("connection-name")?;
    if name.iter().any(|&c| !(b'!'..=b'~').contains(&c)) {
        return Ok(RespValue::error(
            "ERR Client names cannot contain spaces, newlines or special characters.",
        ));
    }
    ctx.session.client().set_name(name.clone());
    Ok(RespValue::ok())
}

fn info(ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    let line = format!("{}\n", ctx.session.client().info_line());
    Ok(RespValue::BulkString(Bytes::from(line)))
}

/// Every connection is a plain client, so only `TYPE normal` matches.
fn list(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let normal_only = match args.one_of("client-type") {
        Some(("normal", _)) | None => true,
        Some(_) => false,
    };
    let ids: Vec<i64> = args
        .list("client-id")?
        .iter()
        .filter_map(ArgValue::as_integer)
        .collect();

    let mut out = String::new();
    if normal_only {
        for client in ctx.dispatcher.clients().list() {
            if ids.is_empty() || ids.contains(&(client.id() as i64)) {
                out.push_str(&client.info_line());
                out.push('\n');
            }
        }
    }
    Ok(RespValue::BulkString(Bytes::from(out)))
}

/// The filters of the `CLIENT KILL <filter> <value> ...` form. Every filter
/// present must match for a client to be killed.
#[derive(Debug, Default)]
struct KillFilter {
    id: Option<u64>,
    /// `Some(false)` when the requested type can never match
    normal: Option<bool>,
    user: Option<Bytes>,
    addr: Option<Bytes>,
    laddr: Option<Bytes>,
    skip_me: bool,
    max_age: Option<u64>,
}

impl KillFilter {
    fn parse(items: &[ArgValue]) -> Option<Self> {
        let mut filter = KillFilter {
            skip_me: true,
            ..Default::default()
        };
        for item in items {
            let (name, value) = item.as_nested()?.iter().next()?;
            match name {
                "client-id" => filter.id = Some(u64::try_from(value.as_integer()?).ok()?),
                "client-type" => {
                    filter.normal = Some(value.as_text().is_some_and(|t| &t[..] == b"normal"))
                }
                "username" => filter.user = value.as_text().cloned(),
                "addr" => filter.addr = value.as_text().cloned(),
                "laddr" => filter.laddr = value.as_text().cloned(),
                "skipme" => filter.skip_me = value.as_text().is_some_and(|t| &t[..] == b"yes"),
                "maxage" => filter.max_age = Some(u64::try_from(value.as_integer()?).ok()?),
                _ => return None,
            }
        }
        Some(filter)
    }

    fn matches(&self, client: &ClientHandle, me: u64) -> bool {
        if self.skip_me && client.id() == me {
            return false;
        }
        self.id.map_or(true, |id| client.id() == id)
            && self.normal.unwrap_or(true)
            && self.user.as_ref().map_or(true, |u| &u[..] == b"default")
            && self.addr.as_ref().map_or(true, |a| &a[..] == client.addr().as_bytes())
            && self.laddr.as_ref().map_or(true, |a| &a[..] == client.laddr().as_bytes())
            && self.max_age.map_or(true, |age| client.age_secs() >= age)
    }
}

fn kill(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let clients = ctx.dispatcher.clients().list();
    match args.one_of("filter") {
        Some(("old-format", ArgValue::Text(addr))) => {
            let target: Option<&Arc<ClientHandle>> =
                clients.iter().find(|c| c.addr().as_bytes() == &addr[..]);
            Ok(match target {
                Some(client) => {
                    client.kill();
                    RespValue::ok()
                }
                None => RespValue::error("ERR No such client"),
            })
        }
        Some(("new-format", ArgValue::List(items))) => {
            let Some(filter) = KillFilter::parse(items) else {
                return Ok(RespValue::error(SYNTAX_ERROR));
            };
            let me = ctx.session.client().id();
            let mut killed = 0;
            for client in clients.iter().filter(|c| filter.matches(c, me)) {
                client.kill();
                killed += 1;
            }
            Ok(RespValue::integer(killed))
        }
        _ => Err(super::CommandError::Internal("CLIENT KILL without a filter".into())),
    }
}

const HELP: &[&str] = &[
    "CLIENT <subcommand> [<arg> [value] [opt] ...]. Subcommands are:",
    "ID",
    "    Return the ID of the current connection.",
    "GETNAME",
    "    Return the name of the current connection.",
    "SETNAME <name>",
    "    Assign the name <name> to the current connection.",
    "INFO",
    "    Return information about the current client connection.",
    "LIST [TYPE (NORMAL|MASTER|REPLICA|PUBSUB)] [ID <id> [<id> ...]]",
    "    Return information about client connections.",
    "KILL <ip:port>",
    "    Kill connection made from <ip:port>.",
    "KILL <option> <value> [<option> <value> [...]]",
    "    Kill connections. Options are: ID, TYPE, USER, ADDR, LADDR, SKIPME, MAXAGE.",
    "HELP",
    "    Print this help.",
];

fn help(_ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    Ok(RespValue::array(HELP.iter().map(|line| RespValue::simple_string(*line)).collect()))
}

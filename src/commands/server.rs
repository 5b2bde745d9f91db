//! Server Commands

use super::{texts, CommandResult};
use crate::args::ParsedArgs;
use crate::dispatch::{Context, Registry, RegistryError};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

pub(crate) fn register(registry: &mut Registry) -> Result<(), RegistryError> {
    registry.bind("ping", ping)?;
    registry.bind("echo", echo)?;
    registry.bind("time", time)?;
    registry.bind("info", info)?;
    registry.bind("quit", quit)?;
    registry.bind("dbsize", dbsize)?;
    registry.bind("flushdb", flushdb)?;
    Ok(())
}

fn ping(_ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    Ok(match args.opt_text("message")? {
        Some(message) => RespValue::BulkString(message.clone()),
        None => RespValue::pong(),
    })
}

fn echo(_ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    Ok(RespValue::BulkString(args.text("message")?.clone()))
}

/// `[unix seconds, microseconds]`
fn time(_ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| super::CommandError::Internal(e.to_string()))?;
    Ok(RespValue::bulk_array([
        now.as_secs().to_string(),
        now.subsec_micros().to_string(),
    ]))
}

const SECTIONS: [&str; 5] = ["server", "clients", "stats", "keyspace", "memory"];

fn info_section(ctx: &Context<'_>, section: &str, out: &mut String) {
    let dispatcher = ctx.dispatcher;
    let conn = dispatcher.stats();
    // Writing to a String never fails.
    let _ = match section {
        "server" => write!(
            out,
            "# Server\r\n\
             emukv_version:{}\r\n\
             os:{}\r\n\
             arch_bits:{}\r\n\
             process_id:{}\r\n\
             uptime_in_seconds:{}\r\n\
             uptime_in_days:{}\r\n",
            env!("CARGO_PKG_VERSION"),
            std::env::consts::OS,
            usize::BITS,
            std::process::id(),
            dispatcher.uptime().as_secs(),
            dispatcher.uptime().as_secs() / 86_400,
        ),
        "clients" => write!(
            out,
            "# Clients\r\n\
             connected_clients:{}\r\n",
            dispatcher.clients().len(),
        ),
        "stats" => {
            let store = ctx.engine().stats();
            write!(
                out,
                "# Stats\r\n\
                 total_connections_received:{}\r\n\
                 total_commands_processed:{}\r\n\
                 total_net_input_bytes:{}\r\n\
                 total_net_output_bytes:{}\r\n\
                 keyspace_reads:{}\r\n\
                 keyspace_writes:{}\r\n\
                 expired_keys:{}\r\n",
                conn.connections_accepted.load(Ordering::Relaxed),
                conn.commands_processed.load(Ordering::Relaxed),
                conn.bytes_read.load(Ordering::Relaxed),
                conn.bytes_written.load(Ordering::Relaxed),
                store.read_ops,
                store.write_ops,
                store.expired,
            )
        }
        "keyspace" => {
            let keys = ctx.engine().len();
            write!(out, "# Keyspace\r\n").and_then(|()| {
                if keys > 0 {
                    write!(out, "db0:keys={}\r\n", keys)
                } else {
                    Ok(())
                }
            })
        }
        "memory" => {
            let mem = ctx.engine().memory_info();
            write!(
                out,
                "# Memory\r\n\
                 used_memory:{}\r\n\
                 used_memory_human:{:.2}K\r\n",
                mem.used_memory,
                mem.used_memory as f64 / 1024.0,
            )
        }
        _ => Ok(()),
    };
}

/// Renders the requested sections; no section, `all`, `default` or
/// `everything` render every section. Unknown names are skipped.
fn info(ctx: &mut Context<'_>, args: &ParsedArgs) -> CommandResult {
    let requested: Vec<String> = texts(args, "section")?
        .iter()
        .map(|s| String::from_utf8_lossy(s).to_ascii_lowercase())
        .collect();
    let everything = requested.is_empty()
        || requested
            .iter()
            .any(|s| matches!(s.as_str(), "all" | "default" | "everything"));

    let mut out = String::new();
    for section in SECTIONS {
        if everything || requested.iter().any(|s| s == section) {
            if !out.is_empty() {
                out.push_str("\r\n");
            }
            info_section(ctx, section, &mut out);
        }
    }
    Ok(RespValue::BulkString(Bytes::from(out)))
}

/// Replies OK; the connection closes once the reply is written.
fn quit(ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    ctx.session.close();
    Ok(RespValue::ok())
}

fn dbsize(ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    Ok(RespValue::integer(ctx.engine().len() as i64))
}

fn flushdb(ctx: &mut Context<'_>, _args: &ParsedArgs) -> CommandResult {
    ctx.engine().flush();
    Ok(RespValue::ok())
}

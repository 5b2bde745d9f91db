//! emukv server entry point.
//!
//! Loads the command table, binds the handlers, starts the expiry sweeper
//! and serves connections until Ctrl+C.

use anyhow::Context as _;
use clap::Parser;
use emukv::commands::register_all;
use emukv::connection::handle_connection;
use emukv::dispatch::{Dispatcher, Registry};
use emukv::spec::CommandTable;
use emukv::storage::{ExpiryConfig, ExpirySweeper, StorageEngine};
use emukv::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn print_banner(config: &Config, commands: usize) {
    println!(
        r#"
emukv v{} - Redis-compatible key-value server
──────────────────────────────────────────────
Server started on {}
{} commands bound. Ready to accept connections.

Use Ctrl+C to shutdown gracefully.
"#,
        emukv::VERSION,
        config.bind_address(),
        commands,
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    init_logging(&config);

    let table = CommandTable::builtin().context("loading the command table")?;
    info!(commands = table.len(), "Command table loaded");

    let mut registry = Registry::new(Arc::new(table));
    register_all(&mut registry).context("binding command handlers")?;
    let bound = registry.len();
    info!(bound, "Command handlers bound");

    let storage = Arc::new(StorageEngine::new());
    info!("Storage engine initialized with 64 shards");

    let _sweeper = ExpirySweeper::start(
        Arc::clone(&storage),
        ExpiryConfig::with_base_interval(config.sweep_interval()),
    );

    let dispatcher = Arc::new(Dispatcher::new(registry, storage));

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("binding {}", config.bind_address()))?;
    info!(addr = %config.bind_address(), "Listening");
    print_banner(&config, bound);

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received, stopping server..."),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C"),
        }
    };

    tokio::select! {
        _ = accept_loop(listener, dispatcher) => {}
        _ = shutdown => {}
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Accepts connections and spawns one task per client.
async fn accept_loop(listener: TcpListener, dispatcher: Arc<Dispatcher>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tokio::spawn(handle_connection(stream, addr, Arc::clone(&dispatcher)));
            }
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }
}

//! Server configuration, read from the command line.

use clap::Parser;
use std::time::Duration;

/// A Redis-compatible key-value server driven by a declarative command table.
#[derive(Debug, Clone, Parser)]
#[command(name = "emukv", version, about)]
pub struct Config {
    /// Host to bind to
    #[arg(short = 'H', long, default_value = crate::DEFAULT_HOST)]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Log filter used when RUST_LOG is not set (e.g. `info`, `emukv=debug`)
    #[arg(short, long, default_value = "info")]
    pub log_level: String,

    /// Starting interval of the background expiry sweep, in milliseconds
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u64).range(1..))]
    pub sweep_interval_ms: u64,
}

impl Config {
    /// Returns the bind address as a string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

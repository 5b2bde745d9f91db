//! Storage Engine Module
//!
//! The typed, sharded keyed store every command handler works against,
//! with TTL support, `WATCH` version stamps and a background expiry sweeper.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐           │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │...64    │           │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ shards  │           │
//! │  └─────────┘ └─────────┘ └─────────┘ └─────────┘           │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │
//!              ┌─────────────┴─────────────┐
//!              │     ExpirySweeper         │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `engine`: `StorageEngine`, `Value`, `Slot` and `StoreError`
//! - `expiry`: the adaptive background sweeper
//! - `glob`: the glob matcher shared by `KEYS` and `COMMAND LIST`

pub mod engine;
pub mod expiry;
pub mod glob;

// Re-export commonly used types
pub use engine::{
    deadline_from_unix_ms, deadline_to_unix_ms, format_float, now_unix_ms, parse_f64, parse_i64,
    Entry, MemoryInfo, Slot, StorageEngine, StorageStats, StoreError, Value,
};
pub use expiry::{start_expiry_sweeper, ExpiryConfig, ExpirySweeper};
pub use glob::GlobPattern;

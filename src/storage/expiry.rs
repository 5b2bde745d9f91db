//! Background Expiry Sweeper
//!
//! Lazy expiry (on access) never reclaims keys that are not touched again,
//! so a Tokio task periodically removes expired keys from every shard.
//!
//! The sweep interval adapts to the observed expiry rate: it halves while a
//! large fraction of keys is expiring and doubles while nothing is.

use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, trace};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// Starting interval between sweeps (default: 100ms)
    pub base_interval: Duration,

    /// Minimum interval between sweeps (default: 10ms)
    pub min_interval: Duration,

    /// Maximum interval between sweeps (default: 1s)
    pub max_interval: Duration,

    /// If this fraction of keys expired in one sweep, speed up
    pub speedup_threshold: f64,

    /// If this fraction of keys expired in one sweep, slow down
    pub slowdown_threshold: f64,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            min_interval: Duration::from_millis(10),
            max_interval: Duration::from_secs(1),
            speedup_threshold: 0.25,
            slowdown_threshold: 0.01,
        }
    }
}

impl ExpiryConfig {
    /// Default thresholds around a custom starting interval.
    pub fn with_base_interval(base_interval: Duration) -> Self {
        let defaults = Self::default();
        Self {
            base_interval,
            min_interval: defaults.min_interval.min(base_interval),
            max_interval: defaults.max_interval.max(base_interval),
            ..defaults
        }
    }

    /// Interval to use after a sweep that removed `expired` of `total` keys.
    fn next_interval(&self, current: Duration, expired: u64, total: u64) -> Duration {
        if total == 0 {
            return current;
        }
        let rate = expired as f64 / total as f64;
        if rate > self.speedup_threshold {
            (current / 2).max(self.min_interval)
        } else if expired == 0 && rate < self.slowdown_threshold {
            (current * 2).min(self.max_interval)
        } else {
            current
        }
    }
}

/// A handle to the running expiry sweeper.
///
/// When this handle is dropped, the sweeper task will be stopped.
#[derive(Debug)]
pub struct ExpirySweeper {
    shutdown_tx: watch::Sender<bool>,
}

impl ExpirySweeper {
    /// Spawns the sweeper on the current Tokio runtime.
    pub fn start(engine: Arc<StorageEngine>, config: ExpiryConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            interval_ms = config.base_interval.as_millis() as u64,
            "Background expiry sweeper started"
        );
        tokio::spawn(sweeper_loop(engine, config, shutdown_rx));

        Self { shutdown_tx }
    }

    /// Stops the expiry sweeper.
    pub fn stop(&self) {
        if self.shutdown_tx.send(true).is_ok() {
            info!("Background expiry sweeper stopped");
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn sweeper_loop(
    engine: Arc<StorageEngine>,
    config: ExpiryConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut interval = config.base_interval;

    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    debug!("Expiry sweeper received shutdown signal");
                    return;
                }
            }
        }

        let keys_before = engine.len();
        let expired = engine.cleanup_expired();

        let next = config.next_interval(interval, expired, keys_before);
        if next != interval {
            trace!(
                expired,
                keys_before,
                interval_ms = next.as_millis() as u64,
                "Sweep interval adjusted"
            );
            interval = next;
        }

        if expired > 0 {
            debug!(
                expired,
                keys_remaining = engine.len(),
                "Expired keys cleaned up"
            );
        }
    }
}

/// Starts the expiry sweeper with default configuration.
pub fn start_expiry_sweeper(engine: Arc<StorageEngine>) -> ExpirySweeper {
    ExpirySweeper::start(engine, ExpiryConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn test_sweeper_cleans_expired_keys() {
        let engine = Arc::new(StorageEngine::new());

        for i in 0..10 {
            engine.set_string_with_ttl(
                Bytes::from(format!("key{}", i)),
                Bytes::from("value"),
                Duration::from_millis(50),
            );
        }
        engine.set_string(Bytes::from("persistent"), Bytes::from("value"));
        assert_eq!(engine.len(), 11);

        let _sweeper = ExpirySweeper::start(
            Arc::clone(&engine),
            ExpiryConfig::with_base_interval(Duration::from_millis(10)),
        );

        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(engine.len(), 1);
        assert!(engine.exists(b"persistent"));
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_drop() {
        let engine = Arc::new(StorageEngine::new());

        {
            let _sweeper = ExpirySweeper::start(
                Arc::clone(&engine),
                ExpiryConfig::with_base_interval(Duration::from_millis(10)),
            );
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        engine.set_string_with_ttl(
            Bytes::from("key"),
            Bytes::from("value"),
            Duration::from_millis(10),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Nothing swept it, so the counter still includes it until access
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.get_string(b"key"), Ok(None));
        assert_eq!(engine.len(), 0);
    }

    #[test]
    fn test_next_interval_adapts() {
        let config = ExpiryConfig::default();
        let base = config.base_interval;

        assert_eq!(config.next_interval(base, 50, 100), base / 2);
        assert_eq!(config.next_interval(base, 0, 100), base * 2);
        assert_eq!(config.next_interval(base, 5, 100), base);
        assert_eq!(config.next_interval(base, 0, 0), base);

        let floor = config.next_interval(config.min_interval, 100, 100);
        assert_eq!(floor, config.min_interval);
        let ceiling = config.next_interval(config.max_interval, 0, 100);
        assert_eq!(ceiling, config.max_interval);
    }
}

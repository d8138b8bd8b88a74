//! Time-boxed memo of command outcomes
//!
//! Both successful output and classified failures are remembered, so a
//! command that keeps failing is not re-run on every scrape. Entries expire
//! lazily on read and are also swept periodically so keys that are never
//! read again do not accumulate.

use crate::executor::CommandResult;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How often the background sweep removes expired entries
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Cache identity of one metric's command
pub fn cache_key(metric_name: &str, command: &str) -> String {
    format!("{}::{}", metric_name, command)
}

#[derive(Debug, Clone)]
struct CacheEntry {
    outcome: CommandResult,
    /// `None` never expires
    expires_at: Option<Instant>,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now > at)
    }
}

/// Result cache shared by every scrape job
#[derive(Debug, Default)]
pub struct ResultCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ResultCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `outcome` under `key`; a zero `ttl` never expires
    pub fn set(&self, key: &str, outcome: CommandResult, ttl: Duration) {
        let expires_at = if ttl.is_zero() {
            None
        } else {
            Some(Instant::now() + ttl)
        };
        self.lock()
            .insert(key.to_string(), CacheEntry { outcome, expires_at });
    }

    /// Look up `key`, dropping the entry if it has expired
    pub fn get(&self, key: &str) -> Option<CommandResult> {
        let mut entries = self.lock();
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                None
            }
            Some(entry) => Some(entry.outcome.clone()),
            None => None,
        }
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Start the periodic sweep; it stops when `shutdown` is cancelled
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = cache.purge_expired();
                        if removed > 0 {
                            debug!("Cache sweep removed {} expired entries", removed);
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Cache sweeper stopped");
                        break;
                    }
                }
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        // a panic while holding the lock leaves the map itself consistent
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

use std::path::PathBuf;
use std::time::Duration;

use crate::lifecycle::StatusPolicy;
use crate::limits::MAX_RETRY_BACKOFF_MS;
use crate::overlap::OverlapPolicy;

const WAL_FILE_NAME: &str = "kennel.wal";

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// WAL appends between background compactions.
    pub compact_threshold: u64,
    /// Total attempts per transaction, first try included.
    pub max_attempts: u32,
    /// First retry sleep; doubles on every further attempt.
    pub retry_base: Duration,
    pub lock_timeout: Duration,
    pub status_policy: StatusPolicy,
    pub overlap: OverlapPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            max_attempts: 5,
            retry_base: Duration::from_millis(10),
            lock_timeout: Duration::from_secs(2),
            status_policy: StatusPolicy::default(),
            overlap: OverlapPolicy::default(),
        }
    }
}

impl StoreConfig {
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Read `KENNEL_*` environment variables; unset or unparsable ones keep
    /// their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            data_dir: lookup("KENNEL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: parsed("KENNEL_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            max_attempts: parsed("KENNEL_MAX_ATTEMPTS")
                .and_then(|n| u32::try_from(n).ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_attempts),
            retry_base: parsed("KENNEL_RETRY_BASE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base),
            lock_timeout: parsed("KENNEL_LOCK_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            status_policy: lookup("KENNEL_STATUS_POLICY")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.status_policy),
            overlap: OverlapPolicy {
                cancelled_blocks: lookup("KENNEL_CANCELLED_BLOCKS")
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(defaults.overlap.cancelled_blocks),
            },
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }

    /// Sleep before retry number `attempt` (1-based): `retry_base * 2^(attempt-1)`,
    /// capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.retry_base
            .saturating_mul(factor)
            .min(Duration::from_millis(MAX_RETRY_BACKOFF_MS))
    }
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::store::Store;

const CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Background task that compacts the WAL once the store's configured
/// `compact_threshold` appends have piled up since the last compaction. Runs
/// until the task is dropped.
pub async fn run_compactor(store: Arc<Store>) {
    let threshold = store.config().compact_threshold;
    info!("WAL compactor running, threshold {threshold} appends");
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

/// One compactor pass. Returns whether a compaction ran and succeeded.
pub async fn compact_if_needed(store: &Store, threshold: u64) -> bool {
    let appends = store.wal_appends_since_compact().await;
    if appends < threshold.max(1) {
        return false;
    }
    match store.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            // Next tick tries again.
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use chrono::NaiveDate;
    use ulid::Ulid;

    fn test_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("kennel_test_compactor").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    async fn store_with_two_appends(name: &str, compact_threshold: u64) -> Arc<Store> {
        let config = StoreConfig {
            compact_threshold,
            ..StoreConfig::in_dir(test_dir(name))
        };
        let store = Arc::new(Store::open(config).unwrap());
        store.create_owner(Ulid::new(), "Ana".into()).await.unwrap();
        store
            .create_pet(
                Ulid::new(),
                "cat".into(),
                "Tom".into(),
                NaiveDate::from_ymd_opt(2019, 1, 1).unwrap(),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let store = store_with_two_appends("threshold", 1000).await;

        assert!(!compact_if_needed(&store, 3).await);
        assert_eq!(store.wal_appends_since_compact().await, 2);

        assert!(compact_if_needed(&store, 2).await);
        assert_eq!(store.wal_appends_since_compact().await, 0);
        assert_eq!(store.list_pets().await.len(), 1);
    }

    #[tokio::test]
    async fn background_task_uses_configured_threshold() {
        let due = store_with_two_appends("configured_due", 2).await;
        let not_due = store_with_two_appends("configured_not_due", 3).await;
        let tasks = [
            tokio::spawn(run_compactor(due.clone())),
            tokio::spawn(run_compactor(not_due.clone())),
        ];

        // The first tick fires immediately.
        for _ in 0..200 {
            if due.wal_appends_since_compact().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(due.wal_appends_since_compact().await, 0);
        assert_eq!(not_due.wal_appends_since_compact().await, 2);

        for task in tasks {
            task.abort();
        }
    }
}

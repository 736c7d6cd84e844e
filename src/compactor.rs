use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::InMemoryStore;
use crate::observability::WAL_COMPACTIONS_TOTAL;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(store: Arc<InMemoryStore>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_needed(&store, threshold).await;
    }
}

/// Returns whether a compaction ran.
pub async fn compact_if_needed(store: &InMemoryStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends == 0 || appends < threshold {
        return false;
    }
    match store.compact().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            true
        }
        Err(e) => {
            tracing::error!("WAL compaction failed: {e}");
            metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
            false
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::engine::Engine;
use crate::observability::WAL_COMPACTIONS_TOTAL;

const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Background task that compacts the WAL once enough appends accumulate.
/// Ends when the engine's WAL writer is gone.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    // The first tick fires immediately; nothing to compact right after replay.
    interval.tick().await;
    loop {
        interval.tick().await;
        if !compact_if_needed(&engine, threshold).await {
            break;
        }
    }
}

/// One compaction check. `false` once the WAL writer has shut down.
async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = match engine.appends_since_compact().await {
        Ok(n) => n,
        Err(e) => {
            warn!(error = %e, "compactor stopping");
            return false;
        }
    };
    if appends < threshold {
        return true;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "ok").increment(1);
            info!(appends, "WAL compacted");
        }
        Err(e) => {
            metrics::counter!(WAL_COMPACTIONS_TOTAL, "status" => "error").increment(1);
            warn!(error = %e, "WAL compaction failed");
        }
    }
    true
}

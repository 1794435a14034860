//! Periodic snapshot saving
//!
//! The store is copied under its lock, then written on a blocking thread so
//! request handling never waits on disk I/O.

use crate::{
    error::{DictError, Result},
    server::wait_for_shutdown,
    snapshot::SnapshotFile,
    store::{MemoryStore, Store},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tracing::{debug, error, info};

/// Copy the store and write it to the snapshot file
pub async fn save_store(store: &MemoryStore, snapshot: &Arc<SnapshotFile>) -> Result<()> {
    let data = store.snapshot().await?;
    let keys = data.len();
    let snapshot = Arc::clone(snapshot);

    tokio::task::spawn_blocking(move || snapshot.save(&data))
        .await
        .map_err(|e| DictError::Snapshot(format!("save task failed: {}", e)))??;

    debug!(keys, "snapshot saved");
    Ok(())
}

/// Spawn the periodic save task. It stops once `shutdown_rx` reads `true`.
///
/// The first save happens one full `period` after spawning. A failed save is
/// logged and retried on the next tick.
pub fn spawn_snapshot_task(
    store: Arc<MemoryStore>,
    snapshot: Arc<SnapshotFile>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    info!(path = %snapshot.path().display(), "saving snapshot");
                    if let Err(e) = save_store(&store, &snapshot).await {
                        error!("periodic snapshot failed: {}", e);
                    }
                }
                _ = wait_for_shutdown(&mut shutdown_rx) => {
                    debug!("snapshot task stopping");
                    break;
                }
            }
        }
    })
}

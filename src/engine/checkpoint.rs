//! `Checkpointer` (spec.md §4.9): drains the WAL back into the page file
//! and truncates it. Grounded on the data-flow description in spec.md
//! §2 ("the mapped page file lags until the next checkpoint") — there is
//! no dedicated `Checkpointer` type in LiteDB (it checkpoints implicitly
//! via its `WalIndexService`); this module is written fresh as a free
//! function operating on the engine's owned components, logged the way
//! `StorageEngine` logs its other lifecycle events.

use crate::engine::storage_engine::StorageEngine;
use crate::Result;
use log::{debug, info};

/// Runs a checkpoint unconditionally: snapshots every committed page
/// under the commit latch, writes each through the mapped window,
/// flushes and fsyncs, then truncates the WAL. An interrupted checkpoint
/// leaves the WAL intact; recovery on next open just redoes the replay
/// (spec.md §4.9: "an interrupted checkpoint leaves the WAL intact").
pub(crate) fn run(engine: &StorageEngine) -> Result<()> {
    info!("checkpoint: starting");
    engine.tx_manager().run_with_commit_latch(|| {
        let page_ids = engine.wal().index().committed_page_ids();
        debug!("checkpoint: draining {} pages", page_ids.len());
        for page_id in page_ids {
            if let Some(offset) = engine.wal().index().find_latest(page_id) {
                let image = engine.wal().read_at(offset)?;
                engine.page_file().write_page_mapped(page_id, &image)?;
            }
        }
        engine.page_file().flush()?;
        engine.page_file().sync_all()?;
        engine.wal().truncate_all()?;
        Ok(())
    })?;
    info!("checkpoint: complete");
    Ok(())
}

use tracing::{debug, error};

use super::record::PuzzleRecord;
use super::store::PuzzleStore;

pub const BATCH_SIZE: usize = 1000;

/// Accumulates records and bulk-inserts them `capacity` at a time.
///
/// `add` awaits the flush when the batch fills, so the reader feeding it is
/// suspended until the store acknowledges the write. At most `capacity`
/// records are buffered at any time.
pub struct BatchLoader<'a> {
    store: &'a dyn PuzzleStore,
    batch: Vec<PuzzleRecord>,
    capacity: usize,
    imported: u64,
    flushes: u64,
    failed_flushes: u64,
}

impl<'a> BatchLoader<'a> {
    pub fn new(store: &'a dyn PuzzleStore) -> Self {
        Self::with_capacity(store, BATCH_SIZE)
    }

    pub fn with_capacity(store: &'a dyn PuzzleStore, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            store,
            batch: Vec::with_capacity(capacity),
            capacity,
            imported: 0,
            flushes: 0,
            failed_flushes: 0,
        }
    }

    pub async fn add(&mut self, record: PuzzleRecord) {
        self.batch.push(record);
        if self.batch.len() >= self.capacity {
            self.flush().await;
        }
    }

    /// Insert the pending batch. A failed insert is logged and counts as zero
    /// imported; the batch is cleared either way.
    pub async fn flush(&mut self) -> u64 {
        if self.batch.is_empty() {
            return 0;
        }
        let rows = self.batch.len();
        let result = self.store.insert_ignore(&self.batch).await;
        self.batch.clear();
        self.flushes += 1;

        match result {
            Ok(n) => {
                debug!(rows, inserted = n, "batch flushed");
                self.imported += n;
                n
            }
            Err(e) => {
                self.failed_flushes += 1;
                error!(rows, error = %e, "batch insert failed");
                0
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.batch.len()
    }

    pub fn imported(&self) -> u64 {
        self.imported
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn failed_flushes(&self) -> u64 {
        self.failed_flushes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::puzzles::store::MemoryStore;

    fn rec(id: i64) -> PuzzleRecord {
        PuzzleRecord {
            id,
            position: "fen".into(),
            move_sequence: "e2e4".into(),
            rating: 1500,
            popularity: 0,
            play_count: 0,
            themes: None,
            ply_count: 1,
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn flushes_when_full_and_on_demand() {
        let store = MemoryStore::new();
        let mut loader = BatchLoader::with_capacity(&store, 3);
        for id in 0..7 {
            loader.add(rec(id)).await;
        }
        assert_eq!(loader.pending(), 1);
        assert_eq!(loader.flush().await, 1);
        assert_eq!(loader.flush().await, 0);
        assert_eq!(store.flush_sizes(), vec![3, 3, 1]);
        assert_eq!(loader.imported(), 7);
        assert_eq!(loader.flushes(), 3);
    }

    #[tokio::test]
    async fn failed_flush_clears_batch_and_continues() {
        let store = MemoryStore::new();
        store.fail_next_inserts(1);
        let mut loader = BatchLoader::with_capacity(&store, 2);
        for id in 0..4 {
            loader.add(rec(id)).await;
        }
        assert_eq!(loader.pending(), 0);
        assert_eq!(loader.failed_flushes(), 1);
        assert_eq!(loader.imported(), 2);
        assert_eq!(store.ids(), vec![2, 3]);
    }

    #[tokio::test]
    async fn duplicates_are_not_counted_as_imported() {
        let store = MemoryStore::new();
        let mut loader = BatchLoader::with_capacity(&store, 10);
        loader.add(rec(1)).await;
        loader.add(rec(1)).await;
        loader.add(rec(2)).await;
        assert_eq!(loader.flush().await, 2);
        assert_eq!(store.len(), 2);
    }
}

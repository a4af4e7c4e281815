//! Persistence seam for the puzzle pipeline.
//!
//! The loader and the pruner only talk to [`PuzzleStore`]; Postgres backs it in
//! production and [`MemoryStore`] backs tests and dry runs.

use anyhow::{anyhow, Result};
use sqlx::QueryBuilder;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::instrument;

use super::record::PuzzleRecord;
use crate::database_ops::db::Db;

#[async_trait::async_trait]
pub trait PuzzleStore: Send + Sync {
    /// Insert every record whose id is absent; existing rows are left untouched.
    /// Returns the number of rows actually inserted.
    async fn insert_ignore(&self, batch: &[PuzzleRecord]) -> Result<u64>;

    /// Keep the `keep_count` newest rows by `created_at` (ties by id) and delete the rest.
    /// Returns the number of rows deleted.
    async fn prune_to(&self, keep_count: u64) -> Result<u64>;

    async fn count(&self) -> Result<u64>;
}

/// Postgres-backed store over the `chess_puzzles` table.
#[derive(Clone)]
pub struct PgPuzzleStore {
    db: Db,
}

impl PgPuzzleStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl PuzzleStore for PgPuzzleStore {
    #[instrument(skip(self, batch), fields(rows = batch.len()))]
    async fn insert_ignore(&self, batch: &[PuzzleRecord]) -> Result<u64> {
        if batch.is_empty() {
            return Ok(0);
        }
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(
            "INSERT INTO chess_puzzles (id, position, move_sequence, rating, popularity, play_count, themes, created_at, ply_count) ",
        );
        qb.push_values(batch, |mut b, r| {
            b.push_bind(r.id)
                .push_bind(&r.position)
                .push_bind(&r.move_sequence)
                .push_bind(r.rating)
                .push_bind(r.popularity)
                .push_bind(r.play_count)
                .push_bind(r.themes.as_deref())
                .push_bind(r.created_at)
                .push_bind(r.ply_count);
        });
        qb.push(" ON CONFLICT (id) DO NOTHING");
        let res = qb.build().persistent(false).execute(&self.db.pool).await?;
        Ok(res.rows_affected())
    }

    #[instrument(skip(self))]
    async fn prune_to(&self, keep_count: u64) -> Result<u64> {
        let keep = i64::try_from(keep_count).map_err(|_| anyhow!("keep_count too large"))?;
        let res = sqlx::query(
            "DELETE FROM chess_puzzles
             WHERE id NOT IN (
                 SELECT id FROM chess_puzzles
                 ORDER BY created_at DESC, id DESC
                 LIMIT $1
             )",
        )
        .persistent(false)
        .bind(keep)
        .execute(&self.db.pool)
        .await?;
        Ok(res.rows_affected())
    }

    async fn count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chess_puzzles")
            .persistent(false)
            .fetch_one(&self.db.pool)
            .await?;
        Ok(n.max(0) as u64)
    }
}

#[derive(Default)]
struct MemoryState {
    rows: BTreeMap<i64, PuzzleRecord>,
    flushes: Vec<usize>,
    failing_inserts: usize,
}

/// In-process store with the same insert-if-absent and prune semantics as Postgres.
///
/// Records the size of every insert call so callers can inspect flush cadence.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` insert calls fail without touching the rows.
    pub fn fail_next_inserts(&self, n: usize) {
        self.lock().failing_inserts = n;
    }

    /// Sizes of every insert call seen so far, in order.
    pub fn flush_sizes(&self) -> Vec<usize> {
        self.lock().flushes.clone()
    }

    pub fn get(&self, id: i64) -> Option<PuzzleRecord> {
        self.lock().rows.get(&id).cloned()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.lock().rows.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed rows directly, bypassing flush accounting.
    pub fn seed<I: IntoIterator<Item = PuzzleRecord>>(&self, rows: I) {
        let mut state = self.lock();
        for r in rows {
            state.rows.insert(r.id, r);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test panicked mid-call; the map is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl PuzzleStore for MemoryStore {
    async fn insert_ignore(&self, batch: &[PuzzleRecord]) -> Result<u64> {
        let mut state = self.lock();
        state.flushes.push(batch.len());
        if state.failing_inserts > 0 {
            state.failing_inserts -= 1;
            return Err(anyhow!("injected insert failure"));
        }
        let mut inserted = 0u64;
        for r in batch {
            if !state.rows.contains_key(&r.id) {
                state.rows.insert(r.id, r.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn prune_to(&self, keep_count: u64) -> Result<u64> {
        let mut state = self.lock();
        let total = state.rows.len();
        let keep = usize::try_from(keep_count).unwrap_or(usize::MAX);
        if total <= keep {
            return Ok(0);
        }
        let mut order: Vec<(i64, i64)> = state
            .rows
            .values()
            .map(|r| (r.created_at, r.id))
            .collect();
        // Newest first, id breaks ties; everything past `keep` goes.
        order.sort_unstable_by(|a, b| b.cmp(a));
        for &(_, id) in &order[keep..] {
            state.rows.remove(&id);
        }
        Ok((total - keep) as u64)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.lock().rows.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(id: i64, created_at: i64) -> PuzzleRecord {
        PuzzleRecord {
            id,
            position: "8/8/8/8/8/8/8/K6k w - - 0 1".into(),
            move_sequence: "a1a2 h1h2".into(),
            rating: 1500,
            popularity: 90,
            play_count: 10,
            themes: Some("endgame".into()),
            ply_count: 2,
            created_at,
        }
    }

    #[tokio::test]
    async fn insert_ignore_keeps_first_version() {
        let store = MemoryStore::new();
        assert_eq!(store.insert_ignore(&[rec(1, 10)]).await.unwrap(), 1);

        let mut changed = rec(1, 20);
        changed.rating = 2900;
        assert_eq!(store.insert_ignore(&[changed]).await.unwrap(), 0);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(1), Some(rec(1, 10)));
    }

    #[tokio::test]
    async fn injected_failure_leaves_rows_untouched() {
        let store = MemoryStore::new();
        store.fail_next_inserts(1);
        assert!(store.insert_ignore(&[rec(1, 1)]).await.is_err());
        assert!(store.is_empty());
        assert_eq!(store.insert_ignore(&[rec(1, 1)]).await.unwrap(), 1);
        assert_eq!(store.flush_sizes(), vec![1, 1]);
    }

    #[tokio::test]
    async fn prune_breaks_created_at_ties_by_id() {
        let store = MemoryStore::new();
        store.seed((1..=5).map(|id| rec(id, 100)));
        assert_eq!(store.prune_to(2).await.unwrap(), 3);
        assert_eq!(store.ids(), vec![4, 5]);
    }
}

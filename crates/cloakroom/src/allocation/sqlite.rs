//! SQLite-backed store.
//!
//! Schema (compatible with databases created by earlier deployments):
//! - `hangers(id, status)`: one row per hanger, status `free` or `taken`
//! - `users(user_id, hanger_id)`: active assignments
//!
//! Tables that already exist are left as they are. `users` tables from before
//! `hanger_id` was `UNIQUE` can hold two users on one hanger; such a database
//! is refused at open with [`LedgerError::SlotConflict`] until the duplicate
//! row is deleted by hand.
//!
//! The ledger is loaded once at open and kept in memory. Every mutation is
//! written to both tables in one transaction, and the ledger only changes after
//! the commit succeeds.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tokio::sync::Mutex;

use super::ledger::{Ledger, LedgerError, PoolSnapshot, SlotId, SlotStatus, UserId};
use super::store::{AllocationStore, ClaimError, ReleaseError, StorageError};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(50);

pub struct SqliteStore {
    pool: SqlitePool,
    ledger: Mutex<Ledger>,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`.
    ///
    /// `size` only matters for a brand-new database: an existing pool keeps
    /// the size it was seeded with.
    pub async fn open(path: impl AsRef<Path>, size: u32) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Self::with_pool(pool, size).await
    }

    pub async fn with_pool(pool: SqlitePool, size: u32) -> Result<Self, StorageError> {
        create_schema(&pool).await?;
        warn_if_legacy_users(&pool).await?;
        seed(&pool, size).await?;
        let ledger = load(&pool, size).await?;

        let snapshot = ledger.snapshot();
        tracing::info!(
            total = snapshot.total(),
            taken = snapshot.taken(),
            "Hanger pool loaded"
        );

        Ok(Self {
            pool,
            ledger: Mutex::new(ledger),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl AllocationStore for SqliteStore {
    async fn lookup_assignment(&self, user: UserId) -> Result<Option<SlotId>, StorageError> {
        Ok(self.ledger.lock().await.lookup(user))
    }

    async fn claim(&self, user: UserId) -> Result<SlotId, ClaimError> {
        let mut ledger = self.ledger.lock().await;
        let slot = ledger.plan_claim(user)?;

        retry_transient("claim", || persist_claim(&self.pool, slot, user)).await?;
        ledger.assign(slot, user);

        tracing::info!(user = %user, slot = %slot, "Hanger claimed");
        Ok(slot)
    }

    async fn release(&self, user: UserId) -> Result<SlotId, ReleaseError> {
        let mut ledger = self.ledger.lock().await;
        let slot = ledger.lookup(user).ok_or(ReleaseError::NotAssigned)?;

        retry_transient("release", || persist_release(&self.pool, slot, user)).await?;
        ledger.vacate(slot);

        tracing::info!(user = %user, slot = %slot, "Hanger released");
        Ok(slot)
    }

    async fn snapshot(&self) -> Result<PoolSnapshot, StorageError> {
        Ok(self.ledger.lock().await.snapshot())
    }
}

async fn retry_transient<F, Fut>(op: &'static str, mut attempt_op: F) -> Result<(), StorageError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), StorageError>>,
{
    let mut attempt = 1;
    loop {
        match attempt_op().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                let backoff = BACKOFF_BASE * (1 << (attempt - 1));
                tracing::warn!(
                    op,
                    error = %e,
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "Transient storage error, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn persist_claim(pool: &SqlitePool, slot: SlotId, user: UserId) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;

    let updated = sqlx::query("UPDATE hangers SET status = 'taken' WHERE id = ? AND status = 'free'")
        .bind(i64::from(slot.get()))
        .execute(&mut *tx)
        .await?;
    if updated.rows_affected() != 1 {
        return Err(StorageError::Diverged { slot });
    }

    sqlx::query("INSERT INTO users (user_id, hanger_id) VALUES (?, ?)")
        .bind(user.get())
        .bind(i64::from(slot.get()))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

async fn persist_release(
    pool: &SqlitePool,
    slot: SlotId,
    user: UserId,
) -> Result<(), StorageError> {
    let mut tx = pool.begin().await?;

    let deleted = sqlx::query("DELETE FROM users WHERE user_id = ? AND hanger_id = ?")
        .bind(user.get())
        .bind(i64::from(slot.get()))
        .execute(&mut *tx)
        .await?;
    if deleted.rows_affected() != 1 {
        return Err(StorageError::Diverged { slot });
    }

    sqlx::query("UPDATE hangers SET status = 'free' WHERE id = ?")
        .bind(i64::from(slot.get()))
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

async fn create_schema(pool: &SqlitePool) -> Result<(), StorageError> {
    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS hangers (
            id INTEGER PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'free'
        )
        ",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r"
        CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY,
            hanger_id INTEGER NOT NULL UNIQUE
        )
        ",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn warn_if_legacy_users(pool: &SqlitePool) -> Result<(), StorageError> {
    let (sql,): (String,) =
        sqlx::query_as("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = 'users'")
            .fetch_one(pool)
            .await?;
    if !sql.to_ascii_uppercase().contains("UNIQUE") {
        tracing::warn!("users.hanger_id has no UNIQUE constraint, duplicate holders are only caught at open");
    }
    Ok(())
}

async fn seed(pool: &SqlitePool, size: u32) -> Result<(), StorageError> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM hangers")
        .fetch_one(pool)
        .await?;
    if count > 0 {
        return Ok(());
    }

    let mut tx = pool.begin().await?;
    for id in 1..=size {
        sqlx::query("INSERT INTO hangers (id, status) VALUES (?, 'free')")
            .bind(i64::from(id))
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    tracing::info!(size, "Hanger pool initialized");
    Ok(())
}

async fn load(pool: &SqlitePool, configured_size: u32) -> Result<Ledger, StorageError> {
    let hangers: Vec<(i64, Option<String>)> =
        sqlx::query_as("SELECT id, status FROM hangers ORDER BY id")
            .fetch_all(pool)
            .await?;

    for (expected, (found, _)) in (1u32..).zip(&hangers) {
        if *found != i64::from(expected) {
            return Err(LedgerError::NonContiguous {
                expected,
                found: *found,
            }
            .into());
        }
    }

    let size = hangers.len() as u32;
    if size != configured_size {
        tracing::warn!(
            persisted = size,
            configured = configured_size,
            "Pool size differs from configuration, keeping the persisted pool"
        );
    }

    let assignments: Vec<(i64, i64)> = sqlx::query_as("SELECT user_id, hanger_id FROM users")
        .fetch_all(pool)
        .await?;
    let ledger = Ledger::from_assignments(
        size,
        assignments
            .into_iter()
            .map(|(user, slot)| (UserId::new(user), slot)),
    )
    .inspect_err(|e| {
        if let LedgerError::SlotConflict { slot, second, .. } = e {
            tracing::error!(
                slot = %slot,
                "Two users hold one hanger; run `DELETE FROM users WHERE user_id = {second}` and restart"
            );
        }
    })?;

    let stale: Vec<(SlotId, SlotStatus)> = hangers
        .iter()
        .filter_map(|(id, status)| {
            let slot = SlotId::new(*id as u32);
            let expected = ledger.status(slot)?;
            (status.as_deref() != Some(expected.as_str())).then_some((slot, expected))
        })
        .collect();

    if !stale.is_empty() {
        let mut tx = pool.begin().await?;
        for (slot, status) in &stale {
            sqlx::query("UPDATE hangers SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(i64::from(slot.get()))
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        tracing::warn!(
            repaired = stale.len(),
            "Hanger statuses disagreed with assignments and were repaired"
        );
    }

    Ok(ledger)
}

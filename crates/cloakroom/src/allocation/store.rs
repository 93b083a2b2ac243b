//! AllocationStore trait and its error types.

use async_trait::async_trait;

use super::ledger::{LedgerError, PoolSnapshot, SlotId, UserId};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Pool data is corrupt: {0}")]
    Corrupt(#[from] LedgerError),
    #[error("Hanger {slot} changed outside the ledger")]
    Diverged { slot: SlotId },
}

impl StorageError {
    /// Busy/locked database or an exhausted connection pool.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::PoolTimedOut) => true,
            Self::Database(sqlx::Error::Database(db)) => db
                .code()
                .and_then(|code| code.parse::<i32>().ok())
                // Extended result codes keep the primary code in the low byte.
                .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED)),
            _ => false,
        }
    }
}

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("No free hangers left")]
    Exhausted,
    #[error("User already holds hanger {0}")]
    AlreadyAssigned(SlotId),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, thiserror::Error)]
pub enum ReleaseError {
    #[error("User holds no hanger")]
    NotAssigned,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Pool of hangers plus the user -> hanger assignment.
///
/// `claim` and `release` are atomic with respect to each other, across all
/// users: two concurrent claims never get the same hanger.
#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Hanger currently held by `user`.
    async fn lookup_assignment(&self, user: UserId) -> Result<Option<SlotId>, StorageError>;

    /// Give `user` the lowest-numbered free hanger.
    async fn claim(&self, user: UserId) -> Result<SlotId, ClaimError>;

    /// Return the hanger held by `user` to the pool.
    async fn release(&self, user: UserId) -> Result<SlotId, ReleaseError>;

    async fn snapshot(&self) -> Result<PoolSnapshot, StorageError>;
}

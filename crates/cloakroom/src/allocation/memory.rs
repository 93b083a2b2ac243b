//! Non-persistent store, for tests and `:memory:` deployments.

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::ledger::{Ledger, PoolSnapshot, SlotId, UserId};
use super::store::{AllocationStore, ClaimError, ReleaseError, StorageError};

pub struct MemoryStore {
    ledger: Mutex<Ledger>,
}

impl MemoryStore {
    pub fn new(size: u32) -> Self {
        Self::from_ledger(Ledger::new(size))
    }

    pub fn from_ledger(ledger: Ledger) -> Self {
        Self {
            ledger: Mutex::new(ledger),
        }
    }
}

#[async_trait]
impl AllocationStore for MemoryStore {
    async fn lookup_assignment(&self, user: UserId) -> Result<Option<SlotId>, StorageError> {
        Ok(self.ledger.lock().await.lookup(user))
    }

    async fn claim(&self, user: UserId) -> Result<SlotId, ClaimError> {
        let mut ledger = self.ledger.lock().await;
        let slot = ledger.plan_claim(user)?;
        ledger.assign(slot, user);
        tracing::debug!(user = %user, slot = %slot, "Hanger claimed");
        Ok(slot)
    }

    async fn release(&self, user: UserId) -> Result<SlotId, ReleaseError> {
        let mut ledger = self.ledger.lock().await;
        let slot = ledger.lookup(user).ok_or(ReleaseError::NotAssigned)?;
        ledger.vacate(slot);
        tracing::debug!(user = %user, slot = %slot, "Hanger released");
        Ok(slot)
    }

    async fn snapshot(&self) -> Result<PoolSnapshot, StorageError> {
        Ok(self.ledger.lock().await.snapshot())
    }
}

//! Hanger allocation.
//!
//! A fixed pool of hangers `1..=N` and the one-to-one assignment of users to
//! hangers. Stores implement [`AllocationStore`]; both keep a [`Ledger`] as the
//! single source of truth and serialize every claim/release behind one lock.

mod ledger;
mod memory;
mod sqlite;
mod store;

pub use ledger::{Ledger, LedgerError, PoolSnapshot, SlotId, SlotStatus, UserId};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{AllocationStore, ClaimError, ReleaseError, StorageError};

//! Ledger - the in-memory hanger pool.
//!
//! The ledger stores one holder slot per hanger and nothing else. Whether a
//! hanger is taken is derived from holder presence, so "taken" and "assigned"
//! cannot disagree.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::store::ClaimError;

/// Hanger number, `1..=N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(u32);

impl SlotId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Chat platform user identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    Free,
    Taken,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Taken => "taken",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("hanger ids are not contiguous: expected {expected}, found {found}")]
    NonContiguous { expected: u32, found: i64 },
    #[error("user {user} holds unknown hanger {slot}")]
    UnknownSlot { user: UserId, slot: i64 },
    #[error("hanger {slot} is held by both {first} and {second}")]
    SlotConflict {
        slot: SlotId,
        first: UserId,
        second: UserId,
    },
}

/// Holder of every hanger, indexed by `id - 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    holders: Vec<Option<UserId>>,
}

impl Ledger {
    /// A pool of `size` free hangers.
    pub fn new(size: u32) -> Self {
        Self {
            holders: vec![None; size as usize],
        }
    }

    /// Rebuild a pool from persisted assignments.
    ///
    /// Assignments are trusted over any stored status column; the caller
    /// repairs statuses from the resulting ledger.
    pub fn from_assignments(
        size: u32,
        assignments: impl IntoIterator<Item = (UserId, i64)>,
    ) -> Result<Self, LedgerError> {
        let mut ledger = Self::new(size);
        for (user, raw_slot) in assignments {
            let slot = u32::try_from(raw_slot)
                .ok()
                .map(SlotId::new)
                .filter(|slot| ledger.contains(*slot))
                .ok_or(LedgerError::UnknownSlot {
                    user,
                    slot: raw_slot,
                })?;

            if let Some(first) = ledger.holder(slot) {
                return Err(LedgerError::SlotConflict {
                    slot,
                    first,
                    second: user,
                });
            }
            ledger.assign(slot, user);
        }
        Ok(ledger)
    }

    pub fn size(&self) -> u32 {
        self.holders.len() as u32
    }

    pub fn contains(&self, slot: SlotId) -> bool {
        slot.get() >= 1 && slot.get() <= self.size()
    }

    pub fn holder(&self, slot: SlotId) -> Option<UserId> {
        self.index(slot).and_then(|i| self.holders[i])
    }

    pub fn status(&self, slot: SlotId) -> Option<SlotStatus> {
        let i = self.index(slot)?;
        Some(match self.holders[i] {
            Some(_) => SlotStatus::Taken,
            None => SlotStatus::Free,
        })
    }

    pub fn lookup(&self, user: UserId) -> Option<SlotId> {
        self.holders
            .iter()
            .position(|holder| *holder == Some(user))
            .map(Self::slot_at)
    }

    /// Lowest-numbered free hanger.
    pub fn first_free(&self) -> Option<SlotId> {
        self.holders
            .iter()
            .position(Option::is_none)
            .map(Self::slot_at)
    }

    /// Decide which hanger `user` would get, without changing anything.
    pub fn plan_claim(&self, user: UserId) -> Result<SlotId, ClaimError> {
        if let Some(held) = self.lookup(user) {
            return Err(ClaimError::AlreadyAssigned(held));
        }
        self.first_free().ok_or(ClaimError::Exhausted)
    }

    pub fn assign(&mut self, slot: SlotId, user: UserId) {
        let Some(i) = self.index(slot) else {
            debug_assert!(false, "assign to unknown hanger");
            tracing::error!(slot = %slot, user = %user, "Bug: assign to unknown hanger");
            return;
        };
        debug_assert!(self.holders[i].is_none(), "hanger already taken");
        self.holders[i] = Some(user);
    }

    /// Free a hanger, returning its previous holder.
    pub fn vacate(&mut self, slot: SlotId) -> Option<UserId> {
        let i = self.index(slot)?;
        self.holders[i].take()
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        PoolSnapshot {
            holders: self.holders.clone(),
        }
    }

    fn index(&self, slot: SlotId) -> Option<usize> {
        self.contains(slot).then(|| slot.get() as usize - 1)
    }

    fn slot_at(index: usize) -> SlotId {
        SlotId::new(index as u32 + 1)
    }
}

/// Point-in-time copy of the pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolSnapshot {
    holders: Vec<Option<UserId>>,
}

impl PoolSnapshot {
    pub fn total(&self) -> usize {
        self.holders.len()
    }

    pub fn taken(&self) -> usize {
        self.holders.iter().filter(|h| h.is_some()).count()
    }

    pub fn free(&self) -> usize {
        self.total() - self.taken()
    }

    pub fn is_full(&self) -> bool {
        self.holders.iter().all(Option::is_some)
    }

    pub fn holder(&self, slot: SlotId) -> Option<UserId> {
        let i = (slot.get() as usize).checked_sub(1)?;
        self.holders.get(i).copied().flatten()
    }

    pub fn status(&self, slot: SlotId) -> Option<SlotStatus> {
        let i = (slot.get() as usize).checked_sub(1)?;
        self.holders.get(i).map(|holder| match holder {
            Some(_) => SlotStatus::Taken,
            None => SlotStatus::Free,
        })
    }

    pub fn free_slots(&self) -> Vec<SlotId> {
        self.iter()
            .filter(|(_, holder)| holder.is_none())
            .map(|(slot, _)| slot)
            .collect()
    }

    /// Active assignments keyed by user.
    pub fn assignments(&self) -> HashMap<UserId, SlotId> {
        self.iter()
            .filter_map(|(slot, holder)| holder.map(|user| (user, slot)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, Option<UserId>)> + '_ {
        self.holders
            .iter()
            .enumerate()
            .map(|(i, holder)| (SlotId::new(i as u32 + 1), *holder))
    }
}

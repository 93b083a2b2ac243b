//! Request handlers: one user action in, one store operation, one reply out.
//!
//! Handlers never fail. Store errors are logged here and turned into text.

use crate::allocation::{AllocationStore, ClaimError, ReleaseError, SlotId, UserId};
use crate::reply::{Menu, Reply};

pub mod text {
    use crate::allocation::SlotId;

    pub const WELCOME: &str =
        "Добро пожаловать в бота гардеробщика, здесь вы можете получить электронный номерок";
    pub const CHOOSE_ACTION: &str = "Выберите действие:";
    pub const POOL_FULL: &str = "К сожалению, все номерки заняты.";
    pub const NOTHING_HELD: &str = "Вы не брали номерок.";
    pub const RELEASED: &str = "Вы успешно сдали номерок!";
    pub const UNAVAILABLE: &str = "Гардероб временно недоступен, попробуйте ещё раз чуть позже.";

    pub fn already_held(slot: SlotId) -> String {
        format!("Вы уже взяли номерок {slot}. Чтобы его сдать, нажмите кнопку.")
    }

    pub fn ticket_caption(slot: SlotId) -> String {
        format!("Ваш номерок № {slot}")
    }
}

pub async fn on_start(store: &dyn AllocationStore, user: UserId) -> Reply {
    match store.lookup_assignment(user).await {
        Ok(held) => Reply::text(format!("{}\n\n{}", text::WELCOME, text::CHOOSE_ACTION))
            .with_menu(Menu::for_holding(held)),
        Err(e) => {
            tracing::error!(user = %user, error = %e, "Lookup failed on start");
            Reply::text(text::UNAVAILABLE)
        }
    }
}

pub async fn on_claim(store: &dyn AllocationStore, user: UserId) -> Reply {
    match store.lookup_assignment(user).await {
        Ok(Some(held)) => return already_held(held),
        Ok(None) => {}
        Err(e) => {
            tracing::error!(user = %user, error = %e, "Lookup failed on claim");
            return Reply::text(text::UNAVAILABLE);
        }
    }

    match store.claim(user).await {
        Ok(slot) => Reply::ticket(slot, text::ticket_caption(slot))
            .with_menu(Menu::for_holding(Some(slot)))
            .replacing_previous(),
        // Lost a race against another claim from the same user.
        Err(ClaimError::AlreadyAssigned(held)) => already_held(held),
        Err(ClaimError::Exhausted) => {
            tracing::info!(user = %user, "Claim rejected, pool exhausted");
            Reply::text(text::POOL_FULL)
        }
        Err(ClaimError::Storage(e)) => {
            tracing::error!(user = %user, error = %e, "Claim failed");
            Reply::text(text::UNAVAILABLE)
        }
    }
}

pub async fn on_release(store: &dyn AllocationStore, user: UserId) -> Reply {
    match store.lookup_assignment(user).await {
        Ok(Some(_)) => {}
        Ok(None) => return Reply::text(text::NOTHING_HELD),
        Err(e) => {
            tracing::error!(user = %user, error = %e, "Lookup failed on release");
            return Reply::text(text::UNAVAILABLE);
        }
    }

    match store.release(user).await {
        Ok(_) => Reply::text(text::RELEASED)
            .with_menu(Menu::for_holding(None))
            .replacing_previous(),
        Err(ReleaseError::NotAssigned) => Reply::text(text::NOTHING_HELD),
        Err(ReleaseError::Storage(e)) => {
            tracing::error!(user = %user, error = %e, "Release failed");
            Reply::text(text::UNAVAILABLE)
        }
    }
}

fn already_held(slot: SlotId) -> Reply {
    Reply::text(text::already_held(slot)).with_menu(Menu::for_holding(Some(slot)))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::allocation::{MemoryStore, PoolSnapshot, StorageError};
    use crate::reply::{Action, ReplyBody};

    const ALICE: UserId = UserId::new(1);
    const BOB: UserId = UserId::new(2);

    /// Store whose every call fails, standing in for a broken database.
    struct BrokenStore;

    #[async_trait]
    impl AllocationStore for BrokenStore {
        async fn lookup_assignment(&self, _user: UserId) -> Result<Option<SlotId>, StorageError> {
            Err(StorageError::Database(sqlx::Error::PoolClosed))
        }

        async fn claim(&self, _user: UserId) -> Result<SlotId, ClaimError> {
            Err(StorageError::Database(sqlx::Error::PoolClosed).into())
        }

        async fn release(&self, _user: UserId) -> Result<SlotId, ReleaseError> {
            Err(StorageError::Database(sqlx::Error::PoolClosed).into())
        }

        async fn snapshot(&self) -> Result<PoolSnapshot, StorageError> {
            Err(StorageError::Database(sqlx::Error::PoolClosed))
        }
    }

    /// Store whose lookup always answers `reported`, so the handler's
    /// pre-check passes and the store itself has to catch the race.
    struct StaleLookup {
        inner: MemoryStore,
        reported: Option<SlotId>,
    }

    #[async_trait]
    impl AllocationStore for StaleLookup {
        async fn lookup_assignment(&self, _user: UserId) -> Result<Option<SlotId>, StorageError> {
            Ok(self.reported)
        }

        async fn claim(&self, user: UserId) -> Result<SlotId, ClaimError> {
            self.inner.claim(user).await
        }

        async fn release(&self, user: UserId) -> Result<SlotId, ReleaseError> {
            self.inner.release(user).await
        }

        async fn snapshot(&self) -> Result<PoolSnapshot, StorageError> {
            self.inner.snapshot().await
        }
    }

    fn menu_actions(reply: &Reply) -> Option<&[Action]> {
        reply.menu.as_ref().map(Menu::actions)
    }

    #[tokio::test]
    async fn start_offers_claim_to_new_user() {
        let store = MemoryStore::new(3);
        let reply = on_start(&store, ALICE).await;

        assert!(reply.text_content().starts_with(text::WELCOME));
        assert!(reply.text_content().ends_with(text::CHOOSE_ACTION));
        assert_eq!(menu_actions(&reply), Some(&[Action::Claim][..]));
        assert!(!reply.delete_previous);
        assert_eq!(store.snapshot().await.unwrap().taken(), 0);
    }

    #[tokio::test]
    async fn start_offers_release_to_holder() {
        let store = MemoryStore::new(3);
        store.claim(ALICE).await.unwrap();

        let reply = on_start(&store, ALICE).await;
        assert_eq!(menu_actions(&reply), Some(&[Action::Release][..]));
    }

    #[tokio::test]
    async fn claim_returns_ticket_and_release_menu() {
        let store = MemoryStore::new(3);
        let reply = on_claim(&store, ALICE).await;

        assert_eq!(
            reply.body,
            ReplyBody::Ticket {
                slot: SlotId::new(1),
                caption: "Ваш номерок № 1".to_string(),
            }
        );
        assert_eq!(menu_actions(&reply), Some(&[Action::Release][..]));
        assert!(reply.delete_previous);
        assert_eq!(
            store.lookup_assignment(ALICE).await.unwrap(),
            Some(SlotId::new(1))
        );
    }

    #[tokio::test]
    async fn second_claim_reports_held_slot_without_mutation() {
        let store = MemoryStore::new(3);
        on_claim(&store, ALICE).await;
        let before = store.snapshot().await.unwrap();

        let reply = on_claim(&store, ALICE).await;
        assert_eq!(reply.text_content(), text::already_held(SlotId::new(1)));
        assert_eq!(menu_actions(&reply), Some(&[Action::Release][..]));
        assert!(!reply.delete_previous);
        assert_eq!(store.snapshot().await.unwrap(), before);
    }

    #[tokio::test]
    async fn store_guard_catches_racing_claim() {
        let store = StaleLookup {
            inner: MemoryStore::new(3),
            reported: None,
        };
        on_claim(&store, ALICE).await;

        let reply = on_claim(&store, ALICE).await;
        assert_eq!(reply.text_content(), text::already_held(SlotId::new(1)));
        assert_eq!(store.snapshot().await.unwrap().taken(), 1);
    }

    #[tokio::test]
    async fn claim_on_full_pool_has_no_menu() {
        let store = MemoryStore::new(1);
        on_claim(&store, ALICE).await;

        let reply = on_claim(&store, BOB).await;
        assert_eq!(reply, Reply::text(text::POOL_FULL));
    }

    #[tokio::test]
    async fn release_without_claim() {
        let store = MemoryStore::new(2);
        let reply = on_release(&store, ALICE).await;
        assert_eq!(reply, Reply::text(text::NOTHING_HELD));
    }

    #[tokio::test]
    async fn release_frees_and_offers_claim() {
        let store = MemoryStore::new(2);
        on_claim(&store, ALICE).await;

        let reply = on_release(&store, ALICE).await;
        assert_eq!(reply.text_content(), text::RELEASED);
        assert_eq!(menu_actions(&reply), Some(&[Action::Claim][..]));
        assert!(reply.delete_previous);
        assert_eq!(store.lookup_assignment(ALICE).await.unwrap(), None);
    }

    #[tokio::test]
    async fn release_race_reports_nothing_held() {
        let store = StaleLookup {
            inner: MemoryStore::new(2),
            reported: Some(SlotId::new(1)),
        };
        let reply = on_release(&store, ALICE).await;
        assert_eq!(reply, Reply::text(text::NOTHING_HELD));
    }

    #[tokio::test]
    async fn storage_failures_become_text() {
        for reply in [
            on_start(&BrokenStore, ALICE).await,
            on_claim(&BrokenStore, ALICE).await,
            on_release(&BrokenStore, ALICE).await,
        ] {
            assert_eq!(reply, Reply::text(text::UNAVAILABLE));
        }
    }

    #[tokio::test]
    async fn handover_scenario() {
        let store = MemoryStore::new(1);
        assert!(matches!(
            on_claim(&store, ALICE).await.body,
            ReplyBody::Ticket { slot, .. } if slot == SlotId::new(1)
        ));
        assert_eq!(on_claim(&store, BOB).await, Reply::text(text::POOL_FULL));
        on_release(&store, ALICE).await;
        assert!(matches!(
            on_claim(&store, BOB).await.body,
            ReplyBody::Ticket { slot, .. } if slot == SlotId::new(1)
        ));
    }
}

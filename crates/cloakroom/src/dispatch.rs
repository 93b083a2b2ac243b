//! Dispatcher: Telegram updates in, handler replies out.
//!
//! Each update runs on its own task. Updates from one user are handled one at a
//! time in arrival order; different users proceed concurrently. Whatever
//! happens while handling one update (delivery errors, render failures, panics)
//! is logged and stays there: the allocation outcome is already decided by the
//! time a reply is sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::allocation::{AllocationStore, SlotId, UserId};
use crate::handlers;
use crate::reply::{Action, Menu, Reply, ReplyBody};
use crate::telegram::{ChatId, MessageId, TelegramError, Update};
use crate::ticket::TicketRenderer;

/// Outbound side of the chat transport.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        menu: Option<&Menu>,
    ) -> Result<(), TelegramError>;

    async fn send_ticket(
        &self,
        chat: ChatId,
        png: Vec<u8>,
        caption: &str,
        menu: Option<&Menu>,
    ) -> Result<(), TelegramError>;

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), TelegramError>;

    async fn answer_callback(&self, callback_id: &str) -> Result<(), TelegramError>;
}

/// A user action the handlers understand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Start {
        user: UserId,
        chat: ChatId,
    },
    Action {
        user: UserId,
        chat: ChatId,
        /// Message carrying the pressed button.
        message: Option<MessageId>,
        callback_id: String,
        /// `None` for callback data this bot never sends.
        action: Option<Action>,
    },
}

impl Event {
    pub fn from_update(update: Update) -> Option<Self> {
        if let Some(query) = update.callback_query {
            let user = UserId::new(query.from.id);
            let (chat, message) = match &query.message {
                Some(message) => (message.chat.id, Some(message.message_id)),
                // Private chat ids equal user ids.
                None => (ChatId(query.from.id), None),
            };
            return Some(Self::Action {
                user,
                chat,
                message,
                action: query.data.as_deref().and_then(Action::from_payload),
                callback_id: query.id,
            });
        }

        let message = update.message?;
        let from = message.from.as_ref()?;
        if from.is_bot || !is_start_command(message.text.as_deref()?) {
            return None;
        }
        Some(Self::Start {
            user: UserId::new(from.id),
            chat: message.chat.id,
        })
    }

    pub fn user(&self) -> UserId {
        match self {
            Self::Start { user, .. } | Self::Action { user, .. } => *user,
        }
    }

    fn callback_id(&self) -> Option<&str> {
        match self {
            Self::Start { .. } => None,
            Self::Action { callback_id, .. } => Some(callback_id),
        }
    }
}

/// `/start`, `/start@some_bot` or `/start <payload>`.
fn is_start_command(text: &str) -> bool {
    text.split_whitespace()
        .next()
        .and_then(|command| command.split('@').next())
        == Some("/start")
}

pub struct Dispatcher {
    store: Arc<dyn AllocationStore>,
    responder: Arc<dyn Responder>,
    renderer: Arc<TicketRenderer>,
    /// Supervisors of updates still being handled.
    in_flight: StdMutex<JoinSet<()>>,
    /// Last queued update per user; resolves once that update is done.
    turns: StdMutex<HashMap<UserId, Turn>>,
    next_turn: AtomicU64,
}

struct Turn {
    seq: u64,
    done: oneshot::Receiver<()>,
}

/// Held while a user's update runs. Dropping it (also on panic) lets the
/// user's next update start and forgets the user once nothing is queued.
struct TurnGuard {
    dispatcher: Arc<Dispatcher>,
    user: UserId,
    seq: u64,
    _done: oneshot::Sender<()>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        let mut turns = self
            .dispatcher
            .turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if turns.get(&self.user).is_some_and(|turn| turn.seq == self.seq) {
            turns.remove(&self.user);
        }
    }
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn AllocationStore>,
        responder: Arc<dyn Responder>,
        renderer: Arc<TicketRenderer>,
    ) -> Self {
        Self {
            store,
            responder,
            renderer,
            in_flight: StdMutex::new(JoinSet::new()),
            turns: StdMutex::new(HashMap::new()),
            next_turn: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn AllocationStore> {
        &self.store
    }

    /// Handle `update` on its own task, after any earlier update from the
    /// same user.
    ///
    /// A panic in the handler is logged by a supervising task, which also
    /// answers a pending callback query so the button stops spinning.
    /// [`drain`](Self::drain) waits for everything dispatched so far.
    pub fn dispatch(self: &Arc<Self>, update: Update) {
        let update_id = update.update_id;
        let Some(event) = Event::from_update(update) else {
            tracing::debug!(update_id, "Ignoring update");
            return;
        };
        let user = event.user();
        let callback_id = event.callback_id().map(str::to_owned);

        let (done, rx) = oneshot::channel();
        let seq = self.next_turn.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(user, Turn { seq, done: rx });

        let guard = TurnGuard {
            dispatcher: Arc::clone(self),
            user,
            seq,
            _done: done,
        };
        let dispatcher = Arc::clone(self);
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                // Errs once the previous guard is dropped, which is the signal.
                let _ = previous.done.await;
            }
            dispatcher.run(update_id, event).await;
            drop(guard);
        });

        let responder = Arc::clone(&self.responder);
        let supervisor = async move {
            let Err(e) = task.await else {
                return;
            };
            if e.is_panic() {
                tracing::error!(update_id, error = %e, "Update handler panicked");
            } else {
                tracing::warn!(update_id, error = %e, "Update handler cancelled");
            }
            if let Some(callback_id) = callback_id
                && let Err(e) = responder.answer_callback(&callback_id).await
            {
                tracing::warn!(update_id, error = %e, "Failed to answer callback query");
            }
        };

        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(supervisor);
    }

    /// Wait until every dispatched update has been handled.
    pub async fn drain(&self) {
        let mut in_flight = std::mem::take(
            &mut *self.in_flight.lock().unwrap_or_else(PoisonError::into_inner),
        );
        if !in_flight.is_empty() {
            tracing::info!(pending = in_flight.len(), "Waiting for in-flight updates");
        }
        while in_flight.join_next().await.is_some() {}
    }

    pub async fn handle(&self, update: Update) {
        let update_id = update.update_id;
        let Some(event) = Event::from_update(update) else {
            tracing::debug!(update_id, "Ignoring update");
            return;
        };
        self.run(update_id, event).await;
    }

    async fn run(&self, update_id: i64, event: Event) {
        let span = tracing::info_span!("update", update_id, user = %event.user());
        self.process(event).instrument(span).await;
    }

    async fn process(&self, event: Event) {
        match event {
            Event::Start { user, chat } => {
                let reply = handlers::on_start(self.store.as_ref(), user).await;
                self.deliver(chat, None, reply).await;
            }
            Event::Action {
                user,
                chat,
                message,
                callback_id,
                action,
            } => {
                let reply = match action {
                    Some(Action::Claim) => Some(handlers::on_claim(self.store.as_ref(), user).await),
                    Some(Action::Release) => {
                        Some(handlers::on_release(self.store.as_ref(), user).await)
                    }
                    None => {
                        tracing::debug!("Unknown callback data");
                        None
                    }
                };
                if let Some(reply) = reply {
                    self.deliver(chat, message, reply).await;
                }

                if let Err(e) = self.responder.answer_callback(&callback_id).await {
                    tracing::warn!(error = %e, "Failed to answer callback query");
                }
            }
        }
    }

    async fn deliver(&self, chat: ChatId, previous: Option<MessageId>, reply: Reply) {
        if reply.delete_previous
            && let Some(message) = previous
            && let Err(e) = self.responder.delete_message(chat, message).await
        {
            tracing::warn!(message = %message, error = %e, "Failed to delete previous message");
        }

        let menu = reply.menu.as_ref();
        match &reply.body {
            ReplyBody::Text(text) => self.send_text(chat, text, menu).await,
            ReplyBody::Ticket { slot, caption } => {
                let Some(png) = self.render(*slot).await else {
                    self.send_text(chat, caption, menu).await;
                    return;
                };
                if let Err(e) = self.responder.send_ticket(chat, png, caption, menu).await {
                    tracing::warn!(slot = %slot, error = %e, "Failed to send ticket, falling back to text");
                    self.send_text(chat, caption, menu).await;
                }
            }
        }
    }

    async fn render(&self, slot: SlotId) -> Option<Vec<u8>> {
        let renderer = Arc::clone(&self.renderer);
        match tokio::task::spawn_blocking(move || renderer.render(slot)).await {
            Ok(Ok(png)) => Some(png),
            Ok(Err(e)) => {
                tracing::warn!(slot = %slot, error = %e, "Ticket rendering failed");
                None
            }
            Err(e) => {
                tracing::error!(slot = %slot, error = %e, "Ticket rendering task failed");
                None
            }
        }
    }

    async fn send_text(&self, chat: ChatId, text: &str, menu: Option<&Menu>) {
        if let Err(e) = self.responder.send_text(chat, text, menu).await {
            tracing::warn!(chat = %chat, error = %e, "Failed to send reply");
        }
    }
}

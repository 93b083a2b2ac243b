//! Telegram Bot API: wire types and the HTTP client.

mod client;
pub mod types;

pub use client::{BotClient, TelegramError};
pub use types::{CallbackQuery, ChatId, InlineKeyboardMarkup, Message, MessageId, Update, User};

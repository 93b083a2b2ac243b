//! Cloakroom: a Telegram bot handing out numbered hanger tickets.
//!
//! A fixed pool of hangers `1..=N` is shared by all users. Each user holds at
//! most one hanger at a time; claiming always picks the lowest free one.

pub mod allocation;
mod app;
pub mod config;
pub mod dispatch;
pub mod handlers;
pub mod health;
pub mod reply;
pub mod telegram;
pub mod ticket;
pub mod transport;
pub mod version;

pub use allocation::{
    AllocationStore, ClaimError, MemoryStore, ReleaseError, SlotId, SqliteStore, UserId,
};
pub use app::run;
pub use config::{Config, ConfigError};
pub use dispatch::{Dispatcher, Responder};
pub use ticket::TicketRenderer;
pub use version::{CLOAKROOM_VERSION, VersionInfo};

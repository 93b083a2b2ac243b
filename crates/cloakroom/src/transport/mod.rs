//! Inbound transports.
//!
//! Updates arrive either by long polling `getUpdates` or through a webhook
//! served with axum. Both hand every update to the [`Dispatcher`].
//!
//! [`Dispatcher`]: crate::dispatch::Dispatcher

mod polling;
mod shutdown;
pub mod webhook;

pub use polling::poll;
pub use shutdown::shutdown_signal;
pub use webhook::{WebhookState, routes, serve};

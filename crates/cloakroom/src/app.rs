//! Startup wiring: storage, Bot API client, dispatcher and transport.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::allocation::{AllocationStore, MemoryStore, SqliteStore};
use crate::config::{Config, Database, TransportMode};
use crate::dispatch::Dispatcher;
use crate::telegram::BotClient;
use crate::ticket::TicketRenderer;
use crate::transport;
use crate::version::{CLOAKROOM_VERSION, VersionInfo};

/// Run the bot until SIGINT or SIGTERM.
pub async fn run(config: Config) -> anyhow::Result<()> {
    info!(version = CLOAKROOM_VERSION, "Starting cloakroom bot");

    let sqlite = match &config.database {
        Database::File(path) => {
            let store = SqliteStore::open(path, config.pool_size)
                .await
                .with_context(|| format!("failed to open database {}", path.display()))?;
            Some(Arc::new(store))
        }
        Database::Memory => None,
    };
    let store: Arc<dyn AllocationStore> = match &sqlite {
        Some(sqlite) => sqlite.clone(),
        None => {
            tracing::warn!("Using in-memory storage, assignments are lost on restart");
            Arc::new(MemoryStore::new(config.pool_size))
        }
    };

    let renderer = Arc::new(TicketRenderer::load(config.ticket_font.as_deref()));

    let client = Arc::new(BotClient::new(&config.api_url, config.token.expose())?);
    let me = client
        .get_me()
        .await
        .context("failed to reach the Bot API, check BOT_TOKEN")?;
    let mut version = VersionInfo::new();
    if let Some(username) = me.username {
        info!(bot = %username, "Connected to Bot API");
        version = version.with_bot(username);
    }

    let dispatcher = Arc::new(Dispatcher::new(store, client.clone(), renderer));

    let result = match &config.transport {
        TransportMode::Polling { timeout } => {
            transport::poll(&client, dispatcher, *timeout, transport::shutdown_signal()).await
        }
        TransportMode::Webhook(settings) => {
            transport::serve(
                &client,
                dispatcher,
                settings,
                &config.token,
                version,
                transport::shutdown_signal(),
            )
            .await
        }
    };

    if let Some(store) = sqlite {
        store.close().await;
    }
    result
}

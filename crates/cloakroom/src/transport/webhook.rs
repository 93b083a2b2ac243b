//! Webhook transport: Telegram POSTs updates to `/{token}`.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
};
use constant_time_eq::constant_time_eq;
use tokio::net::TcpListener;
use tracing::info;

use crate::config::{BotToken, WebhookSettings};
use crate::dispatch::Dispatcher;
use crate::health::{HealthResponse, now_rfc3339};
use crate::telegram::{BotClient, Update};
use crate::version::VersionInfo;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct WebhookState {
    dispatcher: Arc<Dispatcher>,
    /// Path segment updates are accepted on.
    path: Arc<str>,
    secret: Option<Arc<str>>,
    version: VersionInfo,
    started_at: Arc<str>,
}

impl WebhookState {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        token: &BotToken,
        secret: Option<&str>,
        version: VersionInfo,
    ) -> Self {
        Self {
            dispatcher,
            path: Arc::from(token.expose()),
            secret: secret.map(Arc::from),
            version,
            started_at: Arc::from(now_rfc3339()),
        }
    }
}

async fn health_check(State(state): State<WebhookState>) -> Json<HealthResponse> {
    Json(
        HealthResponse::probe(
            state.dispatcher.store().as_ref(),
            state.version.clone(),
            &state.started_at,
        )
        .await,
    )
}

async fn receive_update(
    State(state): State<WebhookState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if !constant_time_eq(path.as_bytes(), state.path.as_bytes()) {
        return StatusCode::NOT_FOUND;
    }

    if let Some(secret) = &state.secret {
        let given = headers.get(SECRET_HEADER).map_or(&[][..], |v| v.as_bytes());
        if !constant_time_eq(given, secret.as_bytes()) {
            tracing::warn!("Rejected webhook call with a wrong secret token");
            return StatusCode::UNAUTHORIZED;
        }
    }

    // Telegram redelivers anything that is not answered 200.
    match serde_json::from_slice::<Update>(&body) {
        Ok(update) => state.dispatcher.dispatch(update),
        Err(e) => tracing::warn!(error = %e, "Discarding malformed update"),
    }
    StatusCode::OK
}

pub fn routes(state: WebhookState) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/{path}", post(receive_update))
        .with_state(state)
}

/// Register the webhook with Telegram, then serve it until `shutdown`.
pub async fn serve(
    client: &BotClient,
    dispatcher: Arc<Dispatcher>,
    settings: &WebhookSettings,
    token: &BotToken,
    version: VersionInfo,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let url = format!("{}/{}", settings.public_url, token.expose());
    client
        .set_webhook(&url, settings.secret.as_deref())
        .await
        .context("failed to register webhook")?;
    info!(public_url = %settings.public_url, "Webhook registered");

    let state = WebhookState::new(
        dispatcher.clone(),
        token,
        settings.secret.as_deref(),
        version,
    );
    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Starting webhook server on {}", listener.local_addr()?);

    axum::serve(listener, routes(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    dispatcher.drain().await;
    info!("Server shutdown complete");
    Ok(())
}

//! Long polling transport.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use crate::dispatch::Dispatcher;
use crate::telegram::BotClient;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Poll `getUpdates` until `shutdown` resolves, dispatching every update.
///
/// Each batch is acknowledged by asking for the next one from
/// `last update_id + 1`. Request failures back off exponentially, or for as
/// long as the server asks when it reports flood control.
pub async fn poll(
    client: &BotClient,
    dispatcher: Arc<Dispatcher>,
    timeout: Duration,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()> {
    client
        .delete_webhook()
        .await
        .context("failed to remove webhook before polling")?;
    tracing::info!(timeout_secs = timeout.as_secs(), "Polling for updates");

    tokio::pin!(shutdown);
    let mut offset: Option<i64> = None;
    let mut backoff = INITIAL_BACKOFF;

    loop {
        let batch = tokio::select! {
            _ = &mut shutdown => break,
            batch = client.get_updates(offset, timeout) => batch,
        };

        match batch {
            Ok(updates) => {
                backoff = INITIAL_BACKOFF;
                if !updates.is_empty() {
                    tracing::debug!(count = updates.len(), "Received updates");
                }
                for update in updates {
                    offset = Some(update.update_id + 1);
                    dispatcher.dispatch(update);
                }
            }
            Err(e) => {
                let delay = e.retry_after().unwrap_or(backoff);
                tracing::warn!(
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "getUpdates failed, retrying"
                );
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(delay) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    dispatcher.drain().await;
    tracing::info!("Polling stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocation::{AllocationStore, MemoryStore, SlotId, UserId};
    use crate::ticket::TicketRenderer;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "42:test";

    fn ok(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true, "result": result}))
    }

    fn setup(server: &MockServer) -> (Arc<BotClient>, Arc<Dispatcher>, Arc<MemoryStore>) {
        let client = Arc::new(BotClient::new(&server.uri(), TOKEN).unwrap());
        let store = Arc::new(MemoryStore::new(2));
        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            client.clone(),
            Arc::new(TicketRenderer::default()),
        ));
        (client, dispatcher, store)
    }

    #[tokio::test]
    async fn dispatches_updates_and_advances_offset() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/deleteWebhook")))
            .respond_with(ok(serde_json::json!(true)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/getUpdates")))
            .respond_with(ok(serde_json::json!([{
                "update_id": 700,
                "callback_query": {
                    "id": "cb",
                    "from": {"id": 9, "is_bot": false},
                    "message": {"message_id": 3, "chat": {"id": 9}},
                    "data": "claim"
                }
            }])))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/getUpdates")))
            .respond_with(ok(serde_json::json!([])).set_delay(Duration::from_millis(50)))
            .mount(&server)
            .await;
        for api_method in ["deleteMessage", "sendPhoto", "answerCallbackQuery"] {
            Mock::given(method("POST"))
                .and(path(format!("/bot{TOKEN}/{api_method}")))
                .respond_with(ok(serde_json::json!(true)))
                .mount(&server)
                .await;
        }

        let (client, dispatcher, store) = setup(&server);
        poll(
            &client,
            dispatcher,
            Duration::from_secs(1),
            tokio::time::sleep(Duration::from_millis(300)),
        )
        .await
        .unwrap();

        assert_eq!(
            store.lookup_assignment(UserId::new(9)).await.unwrap(),
            Some(SlotId::new(1))
        );

        let offsets: Vec<Option<i64>> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.url.path().ends_with("/getUpdates"))
            .map(|request| {
                let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
                body["offset"].as_i64()
            })
            .collect();
        assert_eq!(offsets[0], None);
        assert!(offsets.len() > 1);
        assert!(offsets[1..].iter().all(|offset| *offset == Some(701)));
    }

    #[tokio::test]
    async fn webhook_removal_failure_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/deleteWebhook")))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 401,
                "description": "Unauthorized"
            })))
            .mount(&server)
            .await;

        let (client, dispatcher, _) = setup(&server);
        let err = poll(
            &client,
            dispatcher,
            Duration::from_secs(1),
            std::future::pending(),
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("Unauthorized"));
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/deleteWebhook")))
            .respond_with(ok(serde_json::json!(true)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(format!("/bot{TOKEN}/getUpdates")))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "ok": false,
                "error_code": 429,
                "description": "Too Many Requests: retry after 60",
                "parameters": {"retry_after": 60}
            })))
            .mount(&server)
            .await;

        let (client, dispatcher, _) = setup(&server);
        let started = std::time::Instant::now();
        poll(
            &client,
            dispatcher,
            Duration::from_secs(1),
            tokio::time::sleep(Duration::from_millis(200)),
        )
        .await
        .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}

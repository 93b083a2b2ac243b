//! Bot API HTTP client.
//!
//! Every method is a POST to `{api}/bot{token}/{method}`. The token is part of
//! every URL, so request errors are stripped of their URL before they can
//! reach a log line.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::types::{ApiResponse, ChatId, InlineKeyboardMarkup, Message, MessageId, Update, User};
use crate::dispatch::Responder;
use crate::reply::Menu;
use crate::version::CLOAKROOM_VERSION;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Slack on top of the long-poll timeout before the HTTP request itself times out.
const POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("Bot API request failed: {0}")]
    Http(reqwest::Error),
    #[error("Bot API {method} failed ({code}): {description}")]
    Api {
        method: &'static str,
        code: i32,
        description: String,
        retry_after: Option<Duration>,
    },
    #[error("Failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TelegramError {
    fn http(e: reqwest::Error) -> Self {
        Self::Http(e.without_url())
    }

    /// Flood-control delay requested by the server.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct GetUpdates<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
    timeout: u64,
    allowed_updates: &'a [&'a str],
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: ChatId,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_markup: Option<&'a InlineKeyboardMarkup>,
}

#[derive(Serialize)]
struct SetWebhook<'a> {
    url: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secret_token: Option<&'a str>,
    allowed_updates: &'a [&'a str],
}

const ALLOWED_UPDATES: &[&str] = &["message", "callback_query"];

pub struct BotClient {
    client: reqwest::Client,
    endpoint: String,
}

impl fmt::Debug for BotClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BotClient")
            .field("endpoint", &"<redacted>")
            .finish()
    }
}

impl BotClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self, TelegramError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let user_agent = format!("cloakroom/{}", CLOAKROOM_VERSION);
        if let Ok(value) = reqwest::header::HeaderValue::from_str(&user_agent) {
            headers.insert(reqwest::header::USER_AGENT, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(TelegramError::http)?;

        Ok(Self {
            client,
            endpoint: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.endpoint, method)
    }

    async fn call<P, T>(&self, method: &'static str, params: &P) -> Result<T, TelegramError>
    where
        P: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(self.url(method))
            .json(params)
            .send()
            .await
            .map_err(TelegramError::http)?;
        decode(method, response).await
    }

    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    /// Long-poll for updates after `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        let params = GetUpdates {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: ALLOWED_UPDATES,
        };
        let response = self
            .client
            .post(self.url("getUpdates"))
            .json(&params)
            .timeout(timeout + POLL_GRACE)
            .send()
            .await
            .map_err(TelegramError::http)?;
        decode("getUpdates", response).await
    }

    pub async fn send_message(
        &self,
        chat: ChatId,
        text: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, TelegramError> {
        let params = SendMessage {
            chat_id: chat,
            text,
            reply_markup: markup,
        };
        self.call("sendMessage", &params).await
    }

    /// Upload a PNG as a photo message.
    pub async fn send_photo(
        &self,
        chat: ChatId,
        png: Vec<u8>,
        caption: &str,
        markup: Option<&InlineKeyboardMarkup>,
    ) -> Result<Message, TelegramError> {
        let photo = reqwest::multipart::Part::bytes(png)
            .file_name("ticket.png")
            .mime_str("image/png")
            .map_err(TelegramError::http)?;

        let mut form = reqwest::multipart::Form::new()
            .text("chat_id", chat.to_string())
            .text("caption", caption.to_string())
            .part("photo", photo);
        if let Some(markup) = markup {
            form = form.text("reply_markup", serde_json::to_string(markup)?);
        }

        let response = self
            .client
            .post(self.url("sendPhoto"))
            .multipart(form)
            .send()
            .await
            .map_err(TelegramError::http)?;
        decode("sendPhoto", response).await
    }

    pub async fn delete_message(
        &self,
        chat: ChatId,
        message: MessageId,
    ) -> Result<bool, TelegramError> {
        self.call(
            "deleteMessage",
            &serde_json::json!({"chat_id": chat, "message_id": message}),
        )
        .await
    }

    pub async fn answer_callback_query(&self, callback_id: &str) -> Result<bool, TelegramError> {
        self.call(
            "answerCallbackQuery",
            &serde_json::json!({"callback_query_id": callback_id}),
        )
        .await
    }

    pub async fn set_webhook(&self, url: &str, secret: Option<&str>) -> Result<bool, TelegramError> {
        let params = SetWebhook {
            url,
            secret_token: secret,
            allowed_updates: ALLOWED_UPDATES,
        };
        self.call("setWebhook", &params).await
    }

    /// Remove any registered webhook; `getUpdates` is refused while one is set.
    pub async fn delete_webhook(&self) -> Result<bool, TelegramError> {
        self.call(
            "deleteWebhook",
            &serde_json::json!({"drop_pending_updates": false}),
        )
        .await
    }
}

async fn decode<T: DeserializeOwned>(
    method: &'static str,
    response: reqwest::Response,
) -> Result<T, TelegramError> {
    let status = response.status().as_u16();
    let envelope: ApiResponse<T> = response.json().await.map_err(TelegramError::http)?;

    match envelope {
        ApiResponse {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        envelope => Err(TelegramError::Api {
            method,
            code: envelope.error_code.unwrap_or(i32::from(status)),
            description: envelope
                .description
                .unwrap_or_else(|| "no description".to_string()),
            retry_after: envelope.parameters.and_then(|p| p.retry_after()),
        }),
    }
}

#[async_trait]
impl Responder for BotClient {
    async fn send_text(
        &self,
        chat: ChatId,
        text: &str,
        menu: Option<&Menu>,
    ) -> Result<(), TelegramError> {
        let markup = menu.map(InlineKeyboardMarkup::from);
        self.send_message(chat, text, markup.as_ref()).await?;
        Ok(())
    }

    async fn send_ticket(
        &self,
        chat: ChatId,
        png: Vec<u8>,
        caption: &str,
        menu: Option<&Menu>,
    ) -> Result<(), TelegramError> {
        let markup = menu.map(InlineKeyboardMarkup::from);
        self.send_photo(chat, png, caption, markup.as_ref()).await?;
        Ok(())
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> Result<(), TelegramError> {
        BotClient::delete_message(self, chat, message).await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<(), TelegramError> {
        self.answer_callback_query(callback_id).await?;
        Ok(())
    }
}

//! Bot API wire types, limited to the fields the bot reads or writes.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reply::Menu;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub i64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub message_id: MessageId,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: ChatId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    pub callback_data: String,
}

/// One button per row.
impl From<&Menu> for InlineKeyboardMarkup {
    fn from(menu: &Menu) -> Self {
        Self {
            inline_keyboard: menu
                .actions()
                .iter()
                .map(|action| {
                    vec![InlineKeyboardButton {
                        text: action.label().to_string(),
                        callback_data: action.payload().to_string(),
                    }]
                })
                .collect(),
        }
    }
}

/// Envelope around every Bot API result.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i32>,
    #[serde(default)]
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
pub struct ResponseParameters {
    #[serde(default)]
    pub retry_after: Option<u64>,
}

impl ResponseParameters {
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::Action;

    #[test]
    fn parses_start_message() {
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 10,
            "message": {
                "message_id": 5,
                "date": 1700000000,
                "chat": {"id": 42, "type": "private"},
                "from": {"id": 42, "is_bot": false, "first_name": "Ann"},
                "text": "/start"
            }
        }))
        .unwrap();

        let message = update.message.unwrap();
        assert_eq!(message.chat.id, ChatId(42));
        assert_eq!(message.from.unwrap().id, 42);
        assert_eq!(message.text.as_deref(), Some("/start"));
        assert!(update.callback_query.is_none());
    }

    #[test]
    fn parses_callback_query() {
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 11,
            "callback_query": {
                "id": "cb-1",
                "chat_instance": "x",
                "from": {"id": 7, "is_bot": false, "first_name": "Bo"},
                "message": {
                    "message_id": 99,
                    "date": 1700000000,
                    "chat": {"id": 7, "type": "private"}
                },
                "data": "claim"
            }
        }))
        .unwrap();

        let query = update.callback_query.unwrap();
        assert_eq!(query.id, "cb-1");
        assert_eq!(query.from.id, 7);
        assert_eq!(query.message.unwrap().message_id, MessageId(99));
        assert_eq!(query.data.as_deref(), Some("claim"));
    }

    #[test]
    fn ignores_unknown_update_kinds() {
        let update: Update = serde_json::from_value(serde_json::json!({
            "update_id": 12,
            "edited_message": {"message_id": 1}
        }))
        .unwrap();
        assert!(update.message.is_none());
        assert!(update.callback_query.is_none());
    }

    #[test]
    fn menu_serializes_as_inline_keyboard() {
        let markup = InlineKeyboardMarkup::from(&Menu::new(vec![Action::Claim, Action::Release]));
        insta::assert_json_snapshot!(markup, @r#"
        {
          "inline_keyboard": [
            [
              {
                "text": "Взять номерок",
                "callback_data": "claim"
              }
            ],
            [
              {
                "text": "Сдать номерок",
                "callback_data": "release"
              }
            ]
          ]
        }
        "#);
    }

    #[test]
    fn error_envelope_carries_retry_after() {
        let response: ApiResponse<bool> = serde_json::from_value(serde_json::json!({
            "ok": false,
            "error_code": 429,
            "description": "Too Many Requests: retry after 3",
            "parameters": {"retry_after": 3}
        }))
        .unwrap();

        assert!(!response.ok);
        assert!(response.result.is_none());
        assert_eq!(response.error_code, Some(429));
        assert_eq!(
            response.parameters.unwrap().retry_after(),
            Some(Duration::from_secs(3))
        );
    }
}

//! Telegram Bot API channel.
//!
//! Inbound: webhook updates become question rows (the bot is the
//! clients' side of the practice). Outbound: answers are delivered back
//! over `sendMessage`.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use subtle::ConstantTimeEq;

use crate::config::TelegramConfig;
use crate::db::{CreateQuestionParams, Database, QuestionStore, TelegramProfile, UserStore};
use crate::error::{ChannelError, DatabaseError};
use crate::notify::{ChangeFeed, StoreEvent, StoreOp, StoreTable, preview};

// ============================================================================
// Telegram API Types
// ============================================================================

/// Telegram Update object (webhook payload).
/// https://core.telegram.org/bots/api#update
#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    /// Unique update identifier.
    pub update_id: i64,

    /// New incoming message.
    pub message: Option<TelegramMessage>,

    /// Edited message; treated the same as a new one.
    pub edited_message: Option<TelegramMessage>,
}

/// Telegram Message object.
/// https://core.telegram.org/bots/api#message
#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,

    /// Sender (absent for channel posts).
    pub from: Option<TelegramUser>,

    pub chat: TelegramChat,

    /// Unix time the message was sent.
    pub date: i64,

    pub text: Option<String>,
}

/// Telegram User object.
/// https://core.telegram.org/bots/api#user
#[derive(Debug, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub language_code: Option<String>,
}

/// Telegram Chat object.
/// https://core.telegram.org/bots/api#chat
#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    description: Option<String>,
}

// ============================================================================
// Outbound client
// ============================================================================

/// Minimal Bot API client for delivering answers to clients.
pub struct TelegramBot {
    http: reqwest::Client,
    token: SecretString,
    api_base: String,
}

impl TelegramBot {
    /// Build the bot when the channel is enabled and a token exists.
    pub fn from_config(config: &TelegramConfig) -> Option<Self> {
        if !config.enabled {
            return None;
        }
        let token = config.bot_token.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            token,
            api_base: config.api_base.trim_end_matches('/').to_string(),
        })
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_base,
            self.token.expose_secret()
        );
        let response = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .map_err(|e| ChannelError::TelegramApi {
                method: "sendMessage".to_string(),
                reason: e.to_string(),
            })?;

        let body: ApiResponse =
            response
                .json()
                .await
                .map_err(|e| ChannelError::TelegramApi {
                    method: "sendMessage".to_string(),
                    reason: format!("malformed response: {e}"),
                })?;
        if !body.ok {
            return Err(ChannelError::TelegramApi {
                method: "sendMessage".to_string(),
                reason: body
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Webhook ingestion
// ============================================================================

/// Constant-time check of `X-Telegram-Bot-Api-Secret-Token`.
///
/// When no secret is configured, every request passes (local setups
/// without `setWebhook` secrets).
pub fn webhook_secret_matches(expected: Option<&SecretString>, provided: Option<&str>) -> bool {
    match expected {
        None => true,
        Some(expected) => match provided {
            None => false,
            Some(provided) => {
                let expected = expected.expose_secret().as_bytes();
                expected.ct_eq(provided.as_bytes()).into()
            }
        },
    }
}

/// What became of one webhook update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// No usable message (service updates, media without text, posts).
    Ignored,
    /// A question row was stored.
    Stored { question_id: i64 },
}

/// Turn one update into a question row.
///
/// Finds or creates the sender, inserts the question, and publishes an
/// insert event so the dashboard bell lights up.
pub async fn ingest_update(
    db: &dyn Database,
    feed: &ChangeFeed,
    update: TelegramUpdate,
) -> Result<IngestOutcome, DatabaseError> {
    let Some(message) = update.message.or(update.edited_message) else {
        tracing::debug!(update_id = update.update_id, "update without message, ignored");
        return Ok(IngestOutcome::Ignored);
    };
    let Some(from) = message.from else {
        return Ok(IngestOutcome::Ignored);
    };
    let Some(text) = message.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    else {
        return Ok(IngestOutcome::Ignored);
    };

    let profile = TelegramProfile {
        telegram_id: from.id,
        first_name: Some(from.first_name.clone()),
        last_name: from.last_name.clone(),
        username: from.username.clone(),
    };
    let user = db.find_or_create_telegram_user(&profile).await?;

    let question = db
        .insert_question(&CreateQuestionParams {
            user_id: Some(user.id),
            case_id: None,
            telegram_id: from.id,
            text: text.to_string(),
            lang: from.language_code.clone().unwrap_or_else(|| "en".to_string()),
        })
        .await?;

    tracing::info!(
        question_id = question.id,
        telegram_id = from.id,
        "stored question from telegram"
    );
    feed.publish(StoreEvent {
        table: StoreTable::Questions,
        op: StoreOp::Insert,
        row_id: question.id,
        case_id: None,
        summary: format!("{} asked: {}", user.display_name(), preview(text)),
    });

    Ok(IngestOutcome::Stored {
        question_id: question.id,
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::SecretString;

    use super::{TelegramUpdate, webhook_secret_matches};

    #[test]
    fn update_payload_deserializes() {
        let raw = r#"{
            "update_id": 900021,
            "message": {
                "message_id": 42,
                "from": {
                    "id": 5551234,
                    "first_name": "Anna",
                    "last_name": "Kowalska",
                    "username": "annak",
                    "language_code": "pl"
                },
                "chat": { "id": 5551234, "type": "private" },
                "date": 1736160000,
                "text": "Do I need to translate my birth certificate?"
            }
        }"#;
        let update: TelegramUpdate = serde_json::from_str(raw).unwrap();
        let message = update.message.unwrap();
        assert_eq!(message.chat.chat_type, "private");
        assert_eq!(message.from.unwrap().id, 5551234);
    }

    #[test]
    fn update_without_message_still_parses() {
        let update: TelegramUpdate = serde_json::from_str(r#"{"update_id": 1}"#).unwrap();
        assert!(update.message.is_none());
    }

    #[test]
    fn secret_check_is_strict_only_when_configured() {
        let secret = SecretString::from("wh-secret-0123456789");
        assert!(webhook_secret_matches(None, None));
        assert!(webhook_secret_matches(None, Some("anything")));
        assert!(!webhook_secret_matches(Some(&secret), None));
        assert!(!webhook_secret_matches(Some(&secret), Some("wrong")));
        assert!(webhook_secret_matches(Some(&secret), Some("wh-secret-0123456789")));
    }
}

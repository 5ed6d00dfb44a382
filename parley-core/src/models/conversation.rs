use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CONVERSATION_OPEN: &str = "open";

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub account_id: Uuid,
    pub contact_id: Uuid,
    pub status: String,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    Inbound,
    Outbound,
}

impl MessageDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageDirection::Inbound => "inbound",
            MessageDirection::Outbound => "outbound",
        }
    }
}

/// Who authored a message: the end user, the bot, or a human agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderKind {
    User,
    Bot,
    Agent,
}

impl SenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderKind::User => "user",
            SenderKind::Bot => "bot",
            SenderKind::Agent => "agent",
        }
    }
}

/// Append-only message row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub direction: String,
    pub sender: String,
    pub body: String,
    pub ai_used: bool,
    pub model: Option<String>,
    pub latency_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for `append_message`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub direction: MessageDirection,
    pub sender: SenderKind,
    pub body: String,
    pub ai_used: bool,
    pub model: Option<String>,
    pub latency_ms: Option<i64>,
}

impl NewMessage {
    pub fn inbound(body: impl Into<String>) -> Self {
        Self {
            direction: MessageDirection::Inbound,
            sender: SenderKind::User,
            body: body.into(),
            ai_used: false,
            model: None,
            latency_ms: None,
        }
    }

    /// Bot reply that did not go through the generation model.
    pub fn canned_reply(body: impl Into<String>) -> Self {
        Self {
            direction: MessageDirection::Outbound,
            sender: SenderKind::Bot,
            body: body.into(),
            ai_used: false,
            model: None,
            latency_ms: None,
        }
    }

    pub fn generated_reply(body: impl Into<String>, model: impl Into<String>, latency_ms: i64) -> Self {
        Self {
            direction: MessageDirection::Outbound,
            sender: SenderKind::Bot,
            body: body.into(),
            ai_used: true,
            model: Some(model.into()),
            latency_ms: Some(latency_ms),
        }
    }
}

//! Conversation store: contact → conversation → message.
//!
//! All three steps are idempotent upserts except the message insert, so a save
//! that fails halfway is repaired by the next message simply re-running them.
//! The dispatcher never awaits these writes; it hands them to
//! `persist_in_background` (best-effort async persistence).

use std::sync::Arc;

use async_trait::async_trait;
use parley_core::models::{Contact, Conversation, Message, NewMessage, CONVERSATION_OPEN};
use parley_core::{AccountContext, StoreError};
use regex::Regex;
use sqlx::PgPool;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Keyed on (organization, account, address). Repeat calls bump
    /// `last_seen_at` and refresh the name when one is given.
    async fn find_or_create_contact(
        &self,
        ctx: &AccountContext,
        address: &str,
        name: Option<&str>,
    ) -> Result<Contact, StoreError>;

    /// At most one non-deleted conversation per (account, contact).
    async fn find_or_create_conversation(
        &self,
        ctx: &AccountContext,
        contact_id: Uuid,
    ) -> Result<Conversation, StoreError>;

    /// Insert the message and move the conversation preview forward.
    async fn append_message(
        &self,
        conversation_id: Uuid,
        message: &NewMessage,
        preview: &str,
    ) -> Result<Message, StoreError>;
}

// ============================================================================
// Save paths
// ============================================================================

pub async fn save_incoming_message(
    store: &dyn ConversationStore,
    ctx: &AccountContext,
    address: &str,
    push_name: Option<&str>,
    body: &str,
    preview_chars: usize,
) -> Result<Message, StoreError> {
    let name = contact_display_name(address, push_name);
    save(store, ctx, address, name.as_deref(), &NewMessage::inbound(body), preview_chars).await
}

pub async fn save_outgoing_message(
    store: &dyn ConversationStore,
    ctx: &AccountContext,
    address: &str,
    message: &NewMessage,
    preview_chars: usize,
) -> Result<Message, StoreError> {
    save(store, ctx, address, None, message, preview_chars).await
}

async fn save(
    store: &dyn ConversationStore,
    ctx: &AccountContext,
    address: &str,
    name: Option<&str>,
    message: &NewMessage,
    preview_chars: usize,
) -> Result<Message, StoreError> {
    let contact = store.find_or_create_contact(ctx, address, name).await?;
    let conversation = store.find_or_create_conversation(ctx, contact.id).await?;
    store
        .append_message(conversation.id, message, &preview(&message.body, preview_chars))
        .await
}

/// One pending write handed off by the dispatcher.
#[derive(Debug, Clone)]
pub enum PersistRecord {
    Incoming {
        address: String,
        push_name: Option<String>,
        body: String,
    },
    Outgoing {
        address: String,
        message: NewMessage,
    },
}

/// Best-effort async persistence: run the save on a detached task and send any
/// failure to the log. The returned handle exists for tests; the reply path
/// drops it.
pub fn persist_in_background(
    store: Arc<dyn ConversationStore>,
    ctx: AccountContext,
    record: PersistRecord,
    preview_chars: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (direction, result) = match &record {
            PersistRecord::Incoming {
                address,
                push_name,
                body,
            } => (
                "inbound",
                save_incoming_message(
                    store.as_ref(),
                    &ctx,
                    address,
                    push_name.as_deref(),
                    body,
                    preview_chars,
                )
                .await,
            ),
            PersistRecord::Outgoing { address, message } => (
                "outbound",
                save_outgoing_message(store.as_ref(), &ctx, address, message, preview_chars).await,
            ),
        };

        match result {
            Ok(message) => tracing::debug!(
                message_id = %message.id,
                conversation_id = %message.conversation_id,
                direction = direction,
                "Message persisted"
            ),
            Err(e) => tracing::warn!(
                account_id = %ctx.account_id,
                direction = direction,
                error = %e,
                "Failed to persist message"
            ),
        }
    })
}

// ============================================================================
// Helpers
// ============================================================================

/// Truncate a body for the conversation list preview, on a char boundary.
pub fn preview(body: &str, max_chars: usize) -> String {
    let body = body.trim();
    if body.chars().count() <= max_chars {
        return body.to_string();
    }
    let mut out: String = body.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Profile name when the transport reported one, else the phone digits of a
/// `<digits>@<domain>` address.
pub fn contact_display_name(address: &str, push_name: Option<&str>) -> Option<String> {
    if let Some(name) = push_name.map(str::trim).filter(|n| !n.is_empty()) {
        return Some(name.to_string());
    }
    let re = Regex::new(r"^\+?(\d{5,})(?::\d+)?@").ok()?;
    re.captures(address)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

// ============================================================================
// Postgres store
// ============================================================================

pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn find_or_create_contact(
        &self,
        ctx: &AccountContext,
        address: &str,
        name: Option<&str>,
    ) -> Result<Contact, StoreError> {
        let contact = sqlx::query_as::<_, Contact>(
            "INSERT INTO contacts (organization_id, account_id, address, name)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (organization_id, account_id, address)
             DO UPDATE SET
                last_seen_at = NOW(),
                name = COALESCE(EXCLUDED.name, contacts.name)
             RETURNING id, organization_id, account_id, address, name, first_seen_at, last_seen_at",
        )
        .bind(ctx.organization_id)
        .bind(ctx.account_id)
        .bind(address)
        .bind(name)
        .fetch_one(&self.pool)
        .await?;
        Ok(contact)
    }

    async fn find_or_create_conversation(
        &self,
        ctx: &AccountContext,
        contact_id: Uuid,
    ) -> Result<Conversation, StoreError> {
        // Partial unique index on (account_id, contact_id) WHERE deleted_at IS NULL.
        let conversation = sqlx::query_as::<_, Conversation>(
            "INSERT INTO conversations (organization_id, account_id, contact_id, status)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (account_id, contact_id) WHERE deleted_at IS NULL
             DO UPDATE SET updated_at = NOW()
             RETURNING id, organization_id, account_id, contact_id, status,
                       last_message_preview, last_message_at, created_at",
        )
        .bind(ctx.organization_id)
        .bind(ctx.account_id)
        .bind(contact_id)
        .bind(CONVERSATION_OPEN)
        .fetch_one(&self.pool)
        .await?;
        Ok(conversation)
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        message: &NewMessage,
        preview: &str,
    ) -> Result<Message, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, Message>(
            "INSERT INTO messages (conversation_id, direction, sender, body, ai_used, model, latency_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING id, conversation_id, direction, sender, body, ai_used, model, latency_ms, created_at",
        )
        .bind(conversation_id)
        .bind(message.direction.as_str())
        .bind(message.sender.as_str())
        .bind(&message.body)
        .bind(message.ai_used)
        .bind(message.model.as_deref())
        .bind(message.latency_ms)
        .fetch_one(&mut *tx)
        .await?;

        // Concurrent saves may commit out of order; the preview only moves forward.
        sqlx::query(
            "UPDATE conversations
             SET last_message_preview = $2, last_message_at = $3, updated_at = NOW()
             WHERE id = $1 AND (last_message_at IS NULL OR last_message_at <= $3)",
        )
        .bind(conversation_id)
        .bind(preview)
        .bind(row.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }
}

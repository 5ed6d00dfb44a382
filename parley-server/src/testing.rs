//! In-memory stand-ins for the store, transport, status and model seams.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parley_core::embeddings::{EmbeddingBackend, EmbeddingError};
use parley_core::generation::{GenerationBackend, GenerationError};
use parley_core::models::{
    AccountIdentity, Contact, Conversation, KnowledgeChunk, KnowledgeMatch, Message, NewMessage,
    CONVERSATION_OPEN,
};
use parley_core::similarity::score_optional;
use parley_core::{AccountContext, StoreError, TransportError};
use pgvector::Vector;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::status::{StatusSink, StatusUpdate};
use crate::subsystems::accounts::{AccountStore, StatusChange};
use crate::subsystems::conversations::ConversationStore;
use crate::subsystems::retrieve::ChunkSource;
use crate::transport::{Connection, Connector, MessagingClient, TransportEvent};

const WAIT_STEP: Duration = Duration::from_millis(5);
const WAIT_LIMIT: Duration = Duration::from_secs(5);

// ============================================================================
// Conversation store
// ============================================================================

#[derive(Default)]
struct ConversationTables {
    contacts: Vec<Contact>,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
}

#[derive(Default)]
pub struct MemoryConversationStore {
    tables: Mutex<ConversationTables>,
    fail: bool,
}

impl MemoryConversationStore {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn contact_count(&self) -> usize {
        self.tables.lock().unwrap().contacts.len()
    }

    pub fn conversation_count(&self) -> usize {
        self.tables.lock().unwrap().conversations.len()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.tables.lock().unwrap().messages.clone()
    }

    pub fn preview_for(&self, conversation_id: Uuid) -> Option<String> {
        self.tables
            .lock()
            .unwrap()
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .and_then(|c| c.last_message_preview.clone())
    }

    /// Persistence is detached, so tests poll until `n` rows landed.
    pub async fn wait_for_messages(&self, n: usize) -> Vec<Message> {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            let messages = self.messages();
            if messages.len() >= n || tokio::time::Instant::now() > deadline {
                return messages;
            }
            tokio::time::sleep(WAIT_STEP).await;
        }
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail {
            return Err(StoreError::Unavailable("memory store set to fail".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn find_or_create_contact(
        &self,
        ctx: &AccountContext,
        address: &str,
        name: Option<&str>,
    ) -> Result<Contact, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        let now = Utc::now();
        if let Some(existing) = tables.contacts.iter_mut().find(|c| {
            c.organization_id == ctx.organization_id
                && c.account_id == ctx.account_id
                && c.address == address
        }) {
            existing.last_seen_at = now;
            if let Some(name) = name {
                existing.name = Some(name.to_string());
            }
            return Ok(existing.clone());
        }
        let contact = Contact {
            id: Uuid::new_v4(),
            organization_id: ctx.organization_id,
            account_id: ctx.account_id,
            address: address.to_string(),
            name: name.map(str::to_string),
            first_seen_at: now,
            last_seen_at: now,
        };
        tables.contacts.push(contact.clone());
        Ok(contact)
    }

    async fn find_or_create_conversation(
        &self,
        ctx: &AccountContext,
        contact_id: Uuid,
    ) -> Result<Conversation, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables
            .conversations
            .iter()
            .find(|c| c.account_id == ctx.account_id && c.contact_id == contact_id)
        {
            return Ok(existing.clone());
        }
        let conversation = Conversation {
            id: Uuid::new_v4(),
            organization_id: ctx.organization_id,
            account_id: ctx.account_id,
            contact_id,
            status: CONVERSATION_OPEN.to_string(),
            last_message_preview: None,
            last_message_at: None,
            created_at: Utc::now(),
        };
        tables.conversations.push(conversation.clone());
        Ok(conversation)
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        message: &NewMessage,
        preview: &str,
    ) -> Result<Message, StoreError> {
        self.check()?;
        let mut tables = self.tables.lock().unwrap();
        let row = Message {
            id: Uuid::new_v4(),
            conversation_id,
            direction: message.direction.as_str().to_string(),
            sender: message.sender.as_str().to_string(),
            body: message.body.clone(),
            ai_used: message.ai_used,
            model: message.model.clone(),
            latency_ms: message.latency_ms,
            created_at: Utc::now(),
        };
        if let Some(conversation) = tables
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
        {
            if conversation.last_message_at.map_or(true, |at| at <= row.created_at) {
                conversation.last_message_preview = Some(preview.to_string());
                conversation.last_message_at = Some(row.created_at);
            }
        }
        tables.messages.push(row.clone());
        Ok(row)
    }
}

// ============================================================================
// Account store
// ============================================================================

#[derive(Default)]
pub struct MemoryAccountStore {
    context: Option<AccountContext>,
    changes: Mutex<Vec<StatusChange>>,
    identities: Mutex<Vec<AccountIdentity>>,
}

impl MemoryAccountStore {
    pub fn new(context: AccountContext) -> Self {
        Self {
            context: Some(context),
            ..Default::default()
        }
    }

    pub fn changes(&self) -> Vec<StatusChange> {
        self.changes.lock().unwrap().clone()
    }

    pub fn identities(&self) -> Vec<AccountIdentity> {
        self.identities.lock().unwrap().clone()
    }
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
    async fn load_account_context(&self, account_id: Option<Uuid>) -> Result<AccountContext, StoreError> {
        match (self.context, account_id) {
            (Some(ctx), Some(id)) if ctx.account_id != id => Err(StoreError::AccountNotFound),
            (Some(ctx), _) => Ok(ctx),
            (None, _) => Err(StoreError::AccountNotFound),
        }
    }

    async fn record_status(&self, _account_id: Uuid, change: &StatusChange) -> Result<(), StoreError> {
        self.changes.lock().unwrap().push(change.clone());
        Ok(())
    }

    async fn record_identity(&self, _account_id: Uuid, identity: &AccountIdentity) -> Result<(), StoreError> {
        self.identities.lock().unwrap().push(identity.clone());
        Ok(())
    }
}

// ============================================================================
// Status sink
// ============================================================================

#[derive(Default)]
pub struct RecordingStatusSink {
    updates: Mutex<Vec<StatusUpdate>>,
}

impl RecordingStatusSink {
    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates.lock().unwrap().clone()
    }

    /// Poll until an update satisfies `pred`; `None` after the wait limit.
    pub async fn wait_for(&self, pred: impl Fn(&StatusUpdate) -> bool) -> Option<StatusUpdate> {
        if !self.wait_until(|updates| updates.iter().any(|u| pred(u))).await {
            return None;
        }
        self.updates().into_iter().find(|u| pred(u))
    }

    /// Poll until the whole history satisfies `pred`.
    pub async fn wait_until(&self, pred: impl Fn(&[StatusUpdate]) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            if pred(&self.updates()) {
                return true;
            }
            if tokio::time::Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(WAIT_STEP).await;
        }
    }
}

impl StatusSink for RecordingStatusSink {
    fn publish_status(&self, update: StatusUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
pub struct FakeClient {
    sent: Mutex<Vec<(String, String)>>,
    destroyed: AtomicBool,
    fail_sends: bool,
}

impl FakeClient {
    pub fn failing_sends() -> Self {
        Self {
            fail_sends: true,
            ..Default::default()
        }
    }

    pub fn sent_bodies(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, b)| b.clone()).collect()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingClient for FakeClient {
    async fn send_text(&self, to: &str, body: &str) -> Result<(), TransportError> {
        if self.fail_sends {
            return Err(TransportError::Protocol("send rejected".to_string()));
        }
        self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
        Ok(())
    }

    async fn destroy(&self) -> Result<(), TransportError> {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return Err(TransportError::Destroyed);
        }
        Ok(())
    }
}

/// Hands out one scripted connection per `connect` call. `Err` entries make
/// that attempt fail. Senders are kept alive so event streams stay open.
#[derive(Default)]
pub struct FakeConnector {
    script: Mutex<VecDeque<Result<Vec<TransportEvent>, String>>>,
    clients: Mutex<Vec<Arc<FakeClient>>>,
    senders: Mutex<Vec<mpsc::Sender<TransportEvent>>>,
    attempts: AtomicUsize,
}

impl FakeConnector {
    pub fn new(script: Vec<Result<Vec<TransportEvent>, String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn clients(&self) -> Vec<Arc<FakeClient>> {
        self.clients.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _ctx: &AccountContext) -> Result<Connection, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let events = match next {
            Some(Ok(events)) => events,
            Some(Err(reason)) => return Err(TransportError::Protocol(reason)),
            None => return Err(TransportError::Protocol("script exhausted".to_string())),
        };

        let (tx, rx) = mpsc::channel(events.len().max(1) + 8);
        for event in events {
            let _ = tx.try_send(event);
        }
        self.senders.lock().unwrap().push(tx);

        let client = Arc::new(FakeClient::default());
        self.clients.lock().unwrap().push(client.clone());
        Ok(Connection { client, events: rx })
    }
}

// ============================================================================
// Model backends
// ============================================================================

pub struct StaticEmbedding {
    vector: Vec<f32>,
    fail: bool,
}

impl StaticEmbedding {
    pub fn new(vector: Vec<f32>) -> Self {
        Self { vector, fail: false }
    }

    pub fn failing() -> Self {
        Self {
            vector: Vec::new(),
            fail: true,
        }
    }
}

#[async_trait]
impl EmbeddingBackend for StaticEmbedding {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if self.fail {
            return Err(EmbeddingError::Api {
                code: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(self.vector.clone())
    }

    fn dimensions(&self) -> usize {
        self.vector.len()
    }

    fn name(&self) -> &str {
        "static"
    }
}

enum Script {
    Reply(String),
    Fail,
    Panic,
}

pub struct ScriptedGeneration {
    script: Script,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedGeneration {
    fn with(script: Script) -> Self {
        Self {
            script,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn replying(text: &str) -> Self {
        Self::with(Script::Reply(text.to_string()))
    }

    pub fn failing() -> Self {
        Self::with(Script::Fail)
    }

    pub fn panicking() -> Self {
        Self::with(Script::Panic)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedGeneration {
    async fn generate(&self, _system: &str, user_content: &str) -> Result<String, GenerationError> {
        match &self.script {
            Script::Panic => panic!("scripted generation panic"),
            Script::Fail => Err(GenerationError::Api {
                code: 500,
                message: "scripted failure".to_string(),
            }),
            Script::Reply(text) => {
                self.prompts.lock().unwrap().push(user_content.to_string());
                Ok(text.clone())
            }
        }
    }

    fn model(&self) -> &str {
        "scripted-model"
    }
}

// ============================================================================
// Knowledge
// ============================================================================

pub fn chunk(title: &str, content: &str, embedding: Vec<f32>) -> KnowledgeChunk {
    KnowledgeChunk {
        id: Uuid::new_v4(),
        source_id: Uuid::new_v4(),
        title: title.to_string(),
        chunk_index: 0,
        content: content.to_string(),
        embedding: Some(Vector::from(embedding)),
        metadata: serde_json::json!({}),
    }
}

pub fn knowledge_match(title: &str, text: &str, score: f32) -> KnowledgeMatch {
    KnowledgeMatch {
        id: Uuid::new_v4(),
        text: text.to_string(),
        title: title.to_string(),
        score,
        index: 0,
        metadata: serde_json::json!({}),
    }
}

pub struct MemoryChunkSource {
    organization_id: Uuid,
    accounts: HashMap<Uuid, Uuid>,
    chunks: Vec<KnowledgeChunk>,
    fixed_matches: Option<Vec<KnowledgeMatch>>,
    fail_nearest: bool,
    scans: AtomicUsize,
}

impl MemoryChunkSource {
    pub fn new(organization_id: Uuid) -> Self {
        Self {
            organization_id,
            accounts: HashMap::new(),
            chunks: Vec::new(),
            fixed_matches: None,
            fail_nearest: false,
            scans: AtomicUsize::new(0),
        }
    }

    pub fn organization_id(&self) -> Uuid {
        self.organization_id
    }

    pub fn with_chunks(mut self, chunks: Vec<KnowledgeChunk>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_account(mut self, account_id: Uuid) -> Self {
        self.accounts.insert(account_id, self.organization_id);
        self
    }

    /// Nearest-neighbour answers with these regardless of the query vector.
    pub fn with_fixed_matches(mut self, matches: Vec<KnowledgeMatch>) -> Self {
        self.fixed_matches = Some(matches);
        self
    }

    pub fn with_failing_nearest(mut self) -> Self {
        self.fail_nearest = true;
        self
    }

    pub fn scan_calls(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChunkSource for MemoryChunkSource {
    async fn organization_for_account(&self, account_id: Uuid) -> Result<Option<Uuid>, StoreError> {
        Ok(self.accounts.get(&account_id).copied())
    }

    async fn nearest(
        &self,
        organization_id: Uuid,
        _account_id: Option<Uuid>,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<KnowledgeMatch>, StoreError> {
        if self.fail_nearest {
            return Err(StoreError::Unavailable("pgvector missing".to_string()));
        }
        if organization_id != self.organization_id {
            return Ok(Vec::new());
        }
        if let Some(fixed) = &self.fixed_matches {
            return Ok(fixed.clone());
        }
        let mut matches: Vec<KnowledgeMatch> = self
            .chunks
            .iter()
            .map(|c| KnowledgeMatch {
                id: c.id,
                text: c.content.clone(),
                title: c.title.clone(),
                score: score_optional(query, c.embedding.as_ref().map(|v| v.as_slice())),
                index: c.chunk_index,
                metadata: c.metadata.clone(),
            })
            .collect();
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn ready_chunks(
        &self,
        organization_id: Uuid,
        _account_id: Option<Uuid>,
        cap: i64,
    ) -> Result<Vec<KnowledgeChunk>, StoreError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        if organization_id != self.organization_id {
            return Ok(Vec::new());
        }
        Ok(self.chunks.iter().take(cap.max(0) as usize).cloned().collect())
    }
}

//! Per-message dispatcher.
//!
//! Each inbound message runs on its own task:
//! 1. Empty bodies are dropped without side effects
//! 2. The inbound message is handed to best-effort async persistence
//! 3. The health-check token gets a fixed acknowledgement
//! 4. Otherwise: retrieve → generate → send → persist the reply
//!
//! Any failure or panic in steps 3-4 turns into an apology to the sender. Nothing
//! propagates out of `handle`.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use parley_core::config::DispatcherConfig;
use parley_core::models::NewMessage;
use parley_core::{AccountContext, TransportError};
use thiserror::Error;
use tokio::task::JoinHandle;

use super::conversations::{persist_in_background, ConversationStore, PersistRecord};
use super::reply::ReplyGenerator;
use super::retrieve::{KnowledgeRetriever, SearchScope};
use crate::transport::{InboundMessage, MessagingClient};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Reply send failed: {0}")]
    Send(#[from] TransportError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Empty body; nothing sent or stored.
    Ignored,
    HealthCheck,
    Replied { ai_used: bool },
    /// Something failed and the apology path ran.
    Apologized,
}

pub struct Dispatcher {
    ctx: AccountContext,
    retriever: Arc<KnowledgeRetriever>,
    generator: Arc<ReplyGenerator>,
    store: Arc<dyn ConversationStore>,
    config: DispatcherConfig,
    top_k: usize,
}

impl Dispatcher {
    pub fn new(
        ctx: AccountContext,
        retriever: Arc<KnowledgeRetriever>,
        generator: Arc<ReplyGenerator>,
        store: Arc<dyn ConversationStore>,
        config: DispatcherConfig,
    ) -> Self {
        let top_k = retriever.default_top_k();
        Self {
            ctx,
            retriever,
            generator,
            store,
            config,
            top_k,
        }
    }

    /// Handle one message on its own task. Concurrent messages are not ordered.
    pub fn spawn(
        self: &Arc<Self>,
        client: Arc<dyn MessagingClient>,
        message: InboundMessage,
    ) -> JoinHandle<DispatchOutcome> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move { dispatcher.handle(client.as_ref(), &message).await })
    }

    pub async fn handle(&self, client: &dyn MessagingClient, message: &InboundMessage) -> DispatchOutcome {
        if message.body.trim().is_empty() {
            tracing::debug!(from = %message.from, "Ignoring empty message");
            return DispatchOutcome::Ignored;
        }

        let started = Instant::now();
        self.persist(PersistRecord::Incoming {
            address: message.from.clone(),
            push_name: message.push_name.clone(),
            body: message.body.clone(),
        });

        let result = AssertUnwindSafe(self.respond(client, message, started))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                tracing::error!(from = %message.from, message_id = ?message.message_id, error = %e, "Reply pipeline failed");
                self.apologize(client, message).await
            }
            Err(_) => {
                tracing::error!(from = %message.from, message_id = ?message.message_id, "Reply pipeline panicked");
                self.apologize(client, message).await
            }
        }
    }

    async fn respond(
        &self,
        client: &dyn MessagingClient,
        message: &InboundMessage,
        started: Instant,
    ) -> Result<DispatchOutcome, DispatchError> {
        if is_health_check(&message.body, &self.config.health_check_token) {
            client
                .send_text(&message.from, &self.config.health_check_reply)
                .await?;
            self.persist(PersistRecord::Outgoing {
                address: message.from.clone(),
                message: NewMessage::canned_reply(self.config.health_check_reply.clone()),
            });
            return Ok(DispatchOutcome::HealthCheck);
        }

        let scope = SearchScope {
            organization_id: Some(self.ctx.organization_id),
            account_id: Some(self.ctx.account_id),
        };
        let matches = self.retriever.search(&message.body, self.top_k, &scope).await;
        let reply = self.generator.generate(&message.body, &matches).await;

        client.send_text(&message.from, &reply.text).await?;

        let latency_ms = started.elapsed().as_millis() as i64;
        let record = match reply.model() {
            Some(model) => NewMessage::generated_reply(reply.text.clone(), model, latency_ms),
            None => NewMessage::canned_reply(reply.text.clone()),
        };
        self.persist(PersistRecord::Outgoing {
            address: message.from.clone(),
            message: record,
        });

        tracing::info!(
            from = %message.from,
            matches = matches.len(),
            ai_used = reply.ai_used(),
            latency_ms = latency_ms,
            "Replied"
        );
        Ok(DispatchOutcome::Replied {
            ai_used: reply.ai_used(),
        })
    }

    async fn apologize(&self, client: &dyn MessagingClient, message: &InboundMessage) -> DispatchOutcome {
        match client.send_text(&message.from, &self.config.apology_reply).await {
            Ok(()) => self.persist(PersistRecord::Outgoing {
                address: message.from.clone(),
                message: NewMessage::canned_reply(self.config.apology_reply.clone()),
            }),
            Err(e) => {
                tracing::warn!(from = %message.from, error = %e, "Apology could not be delivered")
            }
        }
        DispatchOutcome::Apologized
    }

    fn persist(&self, record: PersistRecord) {
        // Detached: the reply path never waits on storage.
        let _ = persist_in_background(
            Arc::clone(&self.store),
            self.ctx,
            record,
            self.config.preview_chars,
        );
    }
}

pub fn is_health_check(body: &str, token: &str) -> bool {
    body.trim().to_lowercase() == token.trim().to_lowercase()
}

//! Session lifecycle manager.
//!
//! One `SessionManager` per account owns that account's connection. Transport
//! events are mapped to `LifecycleEvent`s and fed through `Session::apply`, the
//! single transition function, which returns the effects to run (persist,
//! broadcast, teardown). Inbound chat messages bypass the state machine and go
//! straight to the dispatcher on their own tasks.
//!
//! States:
//!
//! ```text
//! pending_pairing ──ready──▶ connected ──disconnected──▶ disconnected
//!        ▲                       │ "logout"                  │ "logout"
//!        │                       ▼                           ▼
//!        └────── start ◀──── logging_out ◀───────────────────┘
//!   (any state) ──auth failure / transport error / failed start──▶ error
//! ```
//!
//! Logout teardown: destroy the connection (errors swallowed), wait the grace
//! delay, delete the session directories best-effort, wait the reinit delay,
//! connect again. A failed reconnect lands in `error` and is not retried.
//! Shutdown during teardown abandons it before the reconnect.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parley_core::config::SessionConfig;
use parley_core::models::{AccountIdentity, AccountStatus};
use parley_core::retry::RetryPolicy;
use parley_core::{pairing, AccountContext};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::accounts::{AccountStore, StatusChange};
use super::cleanup::remove_session_dirs;
use super::dispatch::Dispatcher;
use crate::status::{StatusSink, StatusUpdate};
use crate::transport::{Connection, Connector, TransportEvent};

/// Disconnect reason that triggers logout teardown, compared case-insensitively.
pub const LOGOUT_REASON: &str = "logout";

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// A fresh connection was constructed.
    Started,
    StartFailed(String),
    /// Pairing payload already rendered for display.
    PairingChallenge { image: String },
    Ready(AccountIdentity),
    AuthFailure(String),
    Disconnected(String),
    TransportError(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Persist(StatusChange),
    PersistIdentity(AccountIdentity),
    /// Publish this view of the session.
    Broadcast(Session),
    BeginTeardown,
}

/// In-memory session state. Recreated wholesale with each manager.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub status: AccountStatus,
    pub pairing_image: Option<String>,
    pub last_error: Option<String>,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            status: AccountStatus::PendingPairing,
            pairing_image: None,
            last_error: None,
        }
    }
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, account_id: Uuid) -> StatusUpdate {
        StatusUpdate {
            account_id,
            status: self.status,
            connected: self.status == AccountStatus::Connected,
            pairing_image: self.pairing_image.clone(),
            last_error: self.last_error.clone(),
            updated_at: Utc::now(),
        }
    }

    /// The transition function. Events other than `Started`/`StartFailed` are
    /// ignored while logging out: they belong to the connection being torn down.
    pub fn apply(&mut self, event: LifecycleEvent) -> Vec<Effect> {
        if self.status == AccountStatus::LoggingOut
            && !matches!(event, LifecycleEvent::Started | LifecycleEvent::StartFailed(_))
        {
            return Vec::new();
        }

        let mut effects = Vec::new();
        match event {
            LifecycleEvent::Started => {
                self.enter(AccountStatus::PendingPairing, None, None);
                effects.push(Effect::Persist(self.change()));
            }
            LifecycleEvent::StartFailed(reason)
            | LifecycleEvent::AuthFailure(reason)
            | LifecycleEvent::TransportError(reason) => {
                self.enter(AccountStatus::Error, None, Some(reason));
                effects.push(Effect::Persist(self.change()));
            }
            LifecycleEvent::PairingChallenge { image } => {
                self.enter(AccountStatus::PendingPairing, Some(image), None);
                effects.push(Effect::Persist(StatusChange {
                    stamp_pairing: true,
                    ..self.change()
                }));
            }
            LifecycleEvent::Ready(identity) => {
                self.enter(AccountStatus::Connected, None, None);
                effects.push(Effect::Persist(StatusChange {
                    stamp_connected: true,
                    ..self.change()
                }));
                if identity.phone_number.is_some() || identity.display_name.is_some() {
                    effects.push(Effect::PersistIdentity(identity));
                }
            }
            LifecycleEvent::Disconnected(reason) => {
                let prior = self.status;
                let last_error = self.last_error.take();
                self.enter(AccountStatus::Disconnected, None, last_error);
                effects.push(Effect::Persist(self.change()));

                let can_log_out = matches!(prior, AccountStatus::Connected | AccountStatus::Disconnected);
                if reason.eq_ignore_ascii_case(LOGOUT_REASON) && can_log_out {
                    effects.push(Effect::Broadcast(self.clone()));
                    self.status = AccountStatus::LoggingOut;
                    effects.push(Effect::Persist(self.change()));
                    effects.push(Effect::Broadcast(self.clone()));
                    effects.push(Effect::BeginTeardown);
                    return effects;
                }
            }
        }
        effects.push(Effect::Broadcast(self.clone()));
        effects
    }

    fn enter(&mut self, status: AccountStatus, pairing_image: Option<String>, last_error: Option<String>) {
        self.status = status;
        self.pairing_image = pairing_image;
        self.last_error = last_error;
    }

    fn change(&self) -> StatusChange {
        StatusChange {
            status: self.status,
            last_error: self.last_error.clone(),
            stamp_pairing: false,
            stamp_connected: false,
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

enum Exit {
    Logout,
    /// The event stream ended without a logout.
    Closed,
    Shutdown,
}

pub struct SessionManager {
    ctx: AccountContext,
    connector: Arc<dyn Connector>,
    accounts: Arc<dyn AccountStore>,
    status: Arc<dyn StatusSink>,
    dispatcher: Arc<Dispatcher>,
    config: SessionConfig,
    session: Session,
}

impl SessionManager {
    pub fn new(
        ctx: AccountContext,
        connector: Arc<dyn Connector>,
        accounts: Arc<dyn AccountStore>,
        status: Arc<dyn StatusSink>,
        dispatcher: Arc<Dispatcher>,
        config: SessionConfig,
    ) -> Self {
        Self {
            ctx,
            connector,
            accounts,
            status,
            dispatcher,
            config,
            session: Session::new(),
        }
    }

    /// Drive the account until shutdown. Returns the final session state.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Session {
        tracing::info!(account_id = %self.ctx.account_id, "Session manager starting");

        let mut connection = self.start().await;
        loop {
            let Some(mut conn) = connection.take() else {
                tracing::info!(
                    account_id = %self.ctx.account_id,
                    status = %self.session.status,
                    "No live connection, idle until shutdown"
                );
                let _ = shutdown.recv().await;
                break;
            };

            match self.drive(&mut conn, &mut shutdown).await {
                Exit::Shutdown => {
                    if let Err(e) = conn.client.destroy().await {
                        tracing::debug!(error = %e, "Destroy on shutdown failed");
                    }
                    break;
                }
                Exit::Closed => {}
                Exit::Logout => {
                    if !self.teardown(conn, &mut shutdown).await {
                        break;
                    }
                    connection = self.start().await;
                }
            }
        }

        tracing::info!(account_id = %self.ctx.account_id, "Session manager stopped");
        self.session
    }

    async fn start(&mut self) -> Option<Connection> {
        match self.connector.connect(&self.ctx).await {
            Ok(conn) => {
                self.transition(LifecycleEvent::Started).await;
                Some(conn)
            }
            Err(e) => {
                tracing::error!(account_id = %self.ctx.account_id, error = %e, "Failed to start connection");
                self.transition(LifecycleEvent::StartFailed(e.to_string())).await;
                None
            }
        }
    }

    async fn drive(&mut self, conn: &mut Connection, shutdown: &mut broadcast::Receiver<()>) -> Exit {
        loop {
            tokio::select! {
                event = conn.events.recv() => {
                    let event = match event {
                        Some(TransportEvent::Message(message)) => {
                            if self.session.status == AccountStatus::Connected {
                                self.dispatcher.spawn(Arc::clone(&conn.client), message);
                            } else {
                                tracing::debug!(status = %self.session.status, "Dropping message on inactive session");
                            }
                            continue;
                        }
                        Some(other) => match self.lifecycle_event(other) {
                            Some(event) => event,
                            None => continue,
                        },
                        None => {
                            if self.session.status != AccountStatus::Disconnected {
                                self.transition(LifecycleEvent::Disconnected("connection_closed".to_string()))
                                    .await;
                            }
                            return Exit::Closed;
                        }
                    };
                    if self.transition(event).await {
                        return Exit::Logout;
                    }
                }
                _ = shutdown.recv() => return Exit::Shutdown,
            }
        }
    }

    fn lifecycle_event(&self, event: TransportEvent) -> Option<LifecycleEvent> {
        let event = match event {
            TransportEvent::PairingChallenge(payload) => {
                if let Ok(art) = pairing::render_terminal(&payload) {
                    tracing::info!(account_id = %self.ctx.account_id, "Scan to pair:\n{}", art);
                }
                let image = pairing::render_data_uri(&payload).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "QR render failed, broadcasting raw payload");
                    payload
                });
                LifecycleEvent::PairingChallenge { image }
            }
            TransportEvent::Message(_) => return None,
            TransportEvent::Ready(identity) => LifecycleEvent::Ready(identity),
            TransportEvent::AuthFailure(reason) => LifecycleEvent::AuthFailure(reason),
            TransportEvent::Disconnected(reason) => LifecycleEvent::Disconnected(reason),
            TransportEvent::Error(message) => LifecycleEvent::TransportError(message),
        };
        Some(event)
    }

    /// Apply one event and run its effects. Returns true when teardown is due.
    async fn transition(&mut self, event: LifecycleEvent) -> bool {
        let account_id = self.ctx.account_id;
        let mut teardown = false;

        for effect in self.session.apply(event) {
            match effect {
                Effect::Persist(change) => {
                    if let Err(e) = self.accounts.record_status(account_id, &change).await {
                        tracing::warn!(account_id = %account_id, status = %change.status, error = %e, "Failed to persist account status");
                    }
                }
                Effect::PersistIdentity(identity) => {
                    if let Err(e) = self.accounts.record_identity(account_id, &identity).await {
                        tracing::warn!(account_id = %account_id, error = %e, "Failed to persist account identity");
                    }
                }
                Effect::Broadcast(view) => self.status.publish_status(view.snapshot(account_id)),
                Effect::BeginTeardown => teardown = true,
            }
        }
        teardown
    }

    /// Returns false when shutdown arrived first; nothing should reconnect then.
    async fn teardown(&mut self, conn: Connection, shutdown: &mut broadcast::Receiver<()>) -> bool {
        let account_id = self.ctx.account_id;
        tracing::info!(account_id = %account_id, "Logout received, tearing session down");

        let Connection { client, events } = conn;
        drop(events);
        if let Err(e) = client.destroy().await {
            tracing::debug!(account_id = %account_id, error = %e, "Destroy failed, continuing teardown");
        }
        drop(client);

        let config = &self.config;
        let cleanup = async {
            tokio::time::sleep(Duration::from_millis(config.teardown_grace_ms)).await;

            let policy = RetryPolicy::new(config.cleanup_attempts, config.cleanup_backoff_ms);
            let report = remove_session_dirs(&config.expanded_dirs(), policy).await;
            tracing::info!(
                account_id = %account_id,
                removed_files = report.removed_files,
                skipped_files = report.skipped_files,
                removed_dirs = report.removed_dirs,
                "Session files cleaned up"
            );

            tokio::time::sleep(Duration::from_millis(config.reinit_delay_ms)).await;
        };

        tokio::select! {
            _ = cleanup => true,
            _ = shutdown.recv() => {
                tracing::info!(account_id = %account_id, "Shutdown during teardown, not reconnecting");
                false
            }
        }
    }
}

//! Status broadcast sink.
//!
//! The session manager publishes a snapshot on every state transition. The sink
//! is one-way: publishing never fails and never waits for a consumer. The
//! watch-backed sink keeps only the latest snapshot, which `GET /status` reads.

use chrono::{DateTime, Utc};
use parley_core::models::AccountStatus;
use serde::Serialize;
use tokio::sync::watch;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusUpdate {
    pub account_id: Uuid,
    pub status: AccountStatus,
    pub connected: bool,
    /// `data:` URI of the pairing QR while pending.
    pub pairing_image: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

pub trait StatusSink: Send + Sync {
    fn publish_status(&self, update: StatusUpdate);
}

pub struct WatchStatusSink {
    tx: watch::Sender<Option<StatusUpdate>>,
}

impl WatchStatusSink {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<StatusUpdate>> {
        self.tx.subscribe()
    }
}

impl Default for WatchStatusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusSink for WatchStatusSink {
    fn publish_status(&self, update: StatusUpdate) {
        tracing::info!(
            account_id = %update.account_id,
            status = %update.status,
            connected = update.connected,
            "Session status changed"
        );
        // send_replace stores the value even with no live receivers.
        self.tx.send_replace(Some(update));
    }
}

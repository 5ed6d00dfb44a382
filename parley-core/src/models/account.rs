use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// The (organization, account) pair a session manager is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContext {
    pub organization_id: Uuid,
    pub account_id: Uuid,
}

/// Phone number and profile name reported by the transport once ready.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountIdentity {
    pub phone_number: Option<String>,
    pub display_name: Option<String>,
}

/// Lifecycle status, persisted as text on the account row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    PendingPairing,
    Connected,
    Disconnected,
    Error,
    LoggingOut,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::PendingPairing => "pending_pairing",
            AccountStatus::Connected => "connected",
            AccountStatus::Disconnected => "disconnected",
            AccountStatus::Error => "error",
            AccountStatus::LoggingOut => "logging_out",
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

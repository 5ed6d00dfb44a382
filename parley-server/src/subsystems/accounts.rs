//! Account record access for the session manager.
//!
//! Resolves which (organization, account) pair this process drives and writes
//! lifecycle status, timestamps and the resolved identity back to the account
//! row. Every write here is best-effort from the caller's point of view.

use async_trait::async_trait;
use parley_core::models::{AccountIdentity, AccountStatus};
use parley_core::{AccountContext, StoreError};
use sqlx::PgPool;
use uuid::Uuid;

/// A status write plus which timestamp (if any) it stamps.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub status: AccountStatus,
    /// Written as-is; `None` clears a previous error.
    pub last_error: Option<String>,
    pub stamp_pairing: bool,
    pub stamp_connected: bool,
}

impl StatusChange {
    pub fn to(status: AccountStatus) -> Self {
        Self {
            status,
            last_error: None,
            stamp_pairing: false,
            stamp_connected: false,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }
}

#[async_trait]
pub trait AccountStore: Send + Sync {
    /// The configured account, or the oldest one when none is configured.
    async fn load_account_context(&self, account_id: Option<Uuid>) -> Result<AccountContext, StoreError>;

    async fn record_status(&self, account_id: Uuid, change: &StatusChange) -> Result<(), StoreError>;

    async fn record_identity(&self, account_id: Uuid, identity: &AccountIdentity) -> Result<(), StoreError>;
}

pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn load_account_context(&self, account_id: Option<Uuid>) -> Result<AccountContext, StoreError> {
        let row: Option<(Uuid, Uuid)> = match account_id {
            Some(id) => {
                sqlx::query_as(
                    "SELECT id, organization_id FROM accounts WHERE id = $1 AND deleted_at IS NULL",
                )
                .bind(id)
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(
                    "SELECT id, organization_id FROM accounts
                     WHERE deleted_at IS NULL
                     ORDER BY created_at ASC
                     LIMIT 1",
                )
                .fetch_optional(&self.pool)
                .await?
            }
        };

        let (account_id, organization_id) = row.ok_or(StoreError::AccountNotFound)?;
        Ok(AccountContext {
            organization_id,
            account_id,
        })
    }

    async fn record_status(&self, account_id: Uuid, change: &StatusChange) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE accounts SET
                status = $2,
                last_error = $3,
                last_pairing_at = CASE WHEN $4 THEN NOW() ELSE last_pairing_at END,
                last_connected_at = CASE WHEN $5 THEN NOW() ELSE last_connected_at END,
                updated_at = NOW()
             WHERE id = $1",
        )
        .bind(account_id)
        .bind(change.status.as_str())
        .bind(change.last_error.as_deref())
        .bind(change.stamp_pairing)
        .bind(change.stamp_connected)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_identity(&self, account_id: Uuid, identity: &AccountIdentity) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE accounts SET
                phone_number = COALESCE($2, phone_number),
                display_name = COALESCE($3, display_name),
                updated_at = NOW()
             WHERE id = $1",
        )
        .bind(account_id)
        .bind(identity.phone_number.as_deref())
        .bind(identity.display_name.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

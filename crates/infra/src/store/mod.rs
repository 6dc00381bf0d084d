//! Storage contracts for identities, sessions and revocations.
//!
//! The orchestrator only sees these traits; concrete adapters (in-memory,
//! Postgres, Redis) are chosen at startup and shared behind `Arc<dyn ...>`.

pub mod in_memory;
pub mod postgres;
#[cfg(feature = "redis")]
pub mod redis_blacklist;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tollgate_auth::{Identity, ShadowUser};
use tollgate_core::{SessionId, TokenId, UserId};

pub use in_memory::{
    InMemoryBlacklistStore, InMemoryCredentialStore, InMemorySessionStore, InMemoryShadowUserStore,
};
pub use postgres::{PostgresCredentialStore, PostgresSessionStore, PostgresShadowUserStore};
#[cfg(feature = "redis")]
pub use redis_blacklist::RedisBlacklistStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The backing service could not be reached or did not answer in time.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store conflict: {0}")]
    Conflict(String),

    /// A stored row could not be decoded into its domain type.
    #[error("corrupt stored data: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("user not found")]
    UserNotFound,

    /// The account exists but the password did not match. The id is kept for
    /// the audit trail only.
    #[error("invalid credentials")]
    BadCredentials { user_id: UserId },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Canonical identity source (username/password directory).
#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    /// Verify a username/password pair. Exactly one password-hash
    /// verification runs whether or not the user exists.
    async fn verify(&self, username: &str, password: &str) -> Result<Identity, CredentialError>;

    /// Stamp the canonical `last_login`.
    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError>;
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Local projection of canonical identities.
#[async_trait::async_trait]
pub trait ShadowUserStore: Send + Sync {
    async fn get(&self, id: UserId) -> Result<Option<ShadowUser>, StoreError>;

    /// Create the shadow row if absent, otherwise overwrite its mutable fields
    /// from `identity`. Stamps `last_login = now` either way.
    async fn upsert(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<(ShadowUser, UpsertOutcome), StoreError>;
}

/// A persisted refresh-token session. Only the token hash is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: SessionId,
    pub subject_id: UserId,
    /// Hex SHA-256 of the current refresh token.
    pub token_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_refreshed_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl SessionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, record: SessionRecord) -> Result<(), StoreError>;

    async fn get(&self, session_id: SessionId) -> Result<Option<SessionRecord>, StoreError>;

    /// Atomically replace `expected_hash` with `new_hash` on an unrevoked
    /// session. Returns `false` when the stored hash no longer matches or the
    /// session is revoked or missing.
    async fn compare_and_swap(
        &self,
        session_id: SessionId,
        expected_hash: &str,
        new_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Mark the session revoked. Returns `true` if this call changed its
    /// state; unknown or already revoked sessions return `false`.
    async fn revoke(&self, session_id: SessionId) -> Result<bool, StoreError>;
}

/// Identifier placed on the revocation blacklist. Never the raw token text.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BlacklistKey {
    Token(TokenId),
    Session(SessionId),
}

impl core::fmt::Display for BlacklistKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            BlacklistKey::Token(jti) => write!(f, "token:{jti}"),
            BlacklistKey::Session(sid) => write!(f, "session:{sid}"),
        }
    }
}

/// TTL-bounded set of revoked identifiers.
#[async_trait::async_trait]
pub trait BlacklistStore: Send + Sync {
    /// Insert `key` for `ttl`. Re-inserting extends the entry to the later expiry.
    async fn insert(&self, key: BlacklistKey, ttl: std::time::Duration) -> Result<(), StoreError>;

    async fn contains(&self, key: BlacklistKey) -> Result<bool, StoreError>;

    /// True if any of `keys` is present.
    async fn contains_any(&self, keys: &[BlacklistKey]) -> Result<bool, StoreError> {
        for key in keys {
            if self.contains(*key).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

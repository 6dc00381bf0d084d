//! In-memory store adapters.
//!
//! Intended for tests/dev. Every map sits behind a `std::sync::RwLock` that is
//! never held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Duration, Utc};

use tollgate_auth::{Identity, PasswordVerifier, ShadowUser};
use tollgate_core::{Clock, DomainError, DomainResult, SessionId, SystemClock, UserId};

use super::{
    BlacklistKey, BlacklistStore, CredentialError, CredentialStore, SessionRecord, SessionStore,
    ShadowUserStore, StoreError, UpsertOutcome,
};

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".to_string())
}

#[derive(Debug, Clone)]
struct CredentialRecord {
    identity: Identity,
    password_hash: String,
}

/// Canonical directory held in memory, keyed by username.
#[derive(Debug)]
pub struct InMemoryCredentialStore {
    users: RwLock<HashMap<String, CredentialRecord>>,
    verifier: Arc<PasswordVerifier>,
}

impl InMemoryCredentialStore {
    pub fn new(verifier: PasswordVerifier) -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
            verifier: Arc::new(verifier),
        }
    }

    /// Add (or replace) a user with a plaintext password that is hashed here.
    pub fn put(&self, identity: Identity, password: &str) -> DomainResult<()> {
        let password_hash = self.verifier.hash(password)?;
        let mut users = self
            .users
            .write()
            .map_err(|_| DomainError::validation("credential store lock poisoned"))?;
        users.insert(
            identity.username.clone(),
            CredentialRecord {
                identity,
                password_hash,
            },
        );
        Ok(())
    }

    pub fn identity(&self, username: &str) -> Result<Option<Identity>, StoreError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.get(username).map(|r| r.identity.clone()))
    }
}

#[async_trait::async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn verify(&self, username: &str, password: &str) -> Result<Identity, CredentialError> {
        let record = {
            let users = self.users.read().map_err(|_| poisoned())?;
            users.get(username).cloned()
        };

        let verifier = self.verifier.clone();
        let password = password.to_owned();
        let stored = record.as_ref().map(|r| r.password_hash.clone());
        let matches = tokio::task::spawn_blocking(move || verifier.verify(&password, stored.as_deref()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("password verification task failed: {e}")))?;

        match record {
            None => Err(CredentialError::UserNotFound),
            Some(record) if !matches => Err(CredentialError::BadCredentials {
                user_id: record.identity.id,
            }),
            Some(record) => Ok(record.identity),
        }
    }

    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        if let Some(record) = users.values_mut().find(|r| r.identity.id == id) {
            record.identity.last_login = Some(at);
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryShadowUserStore {
    users: RwLock<HashMap<UserId, ShadowUser>>,
}

impl InMemoryShadowUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        Ok(self.users.read().map_err(|_| poisoned())?.len())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

#[async_trait::async_trait]
impl ShadowUserStore for InMemoryShadowUserStore {
    async fn get(&self, id: UserId) -> Result<Option<ShadowUser>, StoreError> {
        let users = self.users.read().map_err(|_| poisoned())?;
        Ok(users.get(&id).cloned())
    }

    async fn upsert(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<(ShadowUser, UpsertOutcome), StoreError> {
        let mut users = self.users.write().map_err(|_| poisoned())?;
        match users.get_mut(&identity.id) {
            Some(existing) => {
                existing.refresh_from(identity, now);
                Ok((existing.clone(), UpsertOutcome::Updated))
            }
            None => {
                let shadow = ShadowUser::project(identity, now);
                users.insert(identity.id, shadow.clone());
                Ok((shadow, UpsertOutcome::Created))
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, SessionRecord>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, record: SessionRecord) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        if sessions.contains_key(&record.session_id) {
            return Err(StoreError::Conflict(format!(
                "session {} already exists",
                record.session_id
            )));
        }
        sessions.insert(record.session_id, record);
        Ok(())
    }

    async fn get(&self, session_id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let sessions = self.sessions.read().map_err(|_| poisoned())?;
        Ok(sessions.get(&session_id).cloned())
    }

    async fn compare_and_swap(
        &self,
        session_id: SessionId,
        expected_hash: &str,
        new_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        match sessions.get_mut(&session_id) {
            Some(record) if !record.revoked && record.token_hash == expected_hash => {
                record.token_hash = new_hash.to_string();
                record.last_refreshed_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn revoke(&self, session_id: SessionId) -> Result<bool, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned())?;
        match sessions.get_mut(&session_id) {
            Some(record) if !record.revoked => {
                record.revoked = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

/// Blacklist with expiry evaluated against an injected clock.
pub struct InMemoryBlacklistStore {
    entries: RwLock<HashMap<BlacklistKey, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryBlacklistStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of unexpired entries.
    pub fn len(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.values().filter(|exp| **exp > now).count())
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }
}

impl Default for InMemoryBlacklistStore {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for InMemoryBlacklistStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryBlacklistStore").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl BlacklistStore for InMemoryBlacklistStore {
    async fn insert(&self, key: BlacklistKey, ttl: std::time::Duration) -> Result<(), StoreError> {
        let ttl = Duration::from_std(ttl)
            .map_err(|e| StoreError::Conflict(format!("blacklist ttl out of range: {e}")))?;
        let now = self.clock.now();
        let expires_at = now + ttl;

        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.retain(|_, exp| *exp > now);
        let slot = entries.entry(key).or_insert(expires_at);
        if *slot < expires_at {
            *slot = expires_at;
        }
        Ok(())
    }

    async fn contains(&self, key: BlacklistKey) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(&key).is_some_and(|exp| *exp > now))
    }
}

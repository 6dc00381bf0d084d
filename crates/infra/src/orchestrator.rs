//! Session lifecycle: login, validate, refresh, revoke, logout.
//!
//! ```text
//! Anonymous --login--> Active --refresh--> Active (same session, rotated refresh token)
//!                        |
//!                        +--revoke | logout | expiry--> Revoked (terminal)
//! ```
//!
//! The orchestrator holds only immutable configuration and store handles, so a
//! single instance is shared by every request behind an `Arc`.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::instrument;

use tollgate_auth::{
    AccessClaims, AuthConfig, AuthError, IssuedToken, ProjectionSource, RefreshClaims, ShadowUser,
    TokenCodec, UserProfile, hash_token,
};
use tollgate_core::{Clock, DomainResult, SessionId, TokenId, UserId};

use crate::resilience::{bounded, retry_read};
use crate::store::{
    BlacklistKey, BlacklistStore, CredentialError, CredentialStore, SessionRecord, SessionStore,
    ShadowUserStore, StoreError,
};
use crate::sync::UserSyncEngine;

/// Target of the login audit trail. Consumers route it separately from
/// operational logs.
pub const AUDIT_TARGET: &str = "tollgate::audit";

/// Store handles the orchestrator composes.
#[derive(Clone)]
pub struct AuthStores {
    pub credentials: Arc<dyn CredentialStore>,
    pub shadows: Arc<dyn ShadowUserStore>,
    pub sessions: Arc<dyn SessionStore>,
    pub blacklist: Arc<dyn BlacklistStore>,
}

/// Request metadata recorded on the session row and in audit events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
    #[serde(skip)]
    pub session_id: SessionId,
}

/// Result of a successful `validate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUser {
    pub profile: UserProfile,
    pub session_id: SessionId,
    pub token_id: TokenId,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevokeTarget {
    RefreshToken(String),
    Session(SessionId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevokeOutcome {
    /// Session the target resolved to, if any.
    pub session_id: Option<SessionId>,
    /// Whether a known session is now revoked.
    pub revoked: bool,
}

impl RevokeOutcome {
    fn nothing() -> Self {
        Self {
            session_id: None,
            revoked: false,
        }
    }
}

pub struct AuthOrchestrator {
    config: AuthConfig,
    codec: TokenCodec,
    stores: AuthStores,
    sync: UserSyncEngine,
    clock: Arc<dyn Clock>,
}

impl AuthOrchestrator {
    pub fn new(config: AuthConfig, stores: AuthStores, clock: Arc<dyn Clock>) -> DomainResult<Self> {
        config.validate()?;
        let codec = TokenCodec::new(&config);
        let sync = UserSyncEngine::new(
            stores.credentials.clone(),
            stores.shadows.clone(),
            config.store_timeout,
        );
        Ok(Self {
            config,
            codec,
            stores,
            sync,
            clock,
        })
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Verify credentials, sync the shadow user and open a new session.
    #[instrument(skip(self, password, client), err)]
    pub async fn login(
        &self,
        username: &str,
        password: &str,
        client: &ClientInfo,
    ) -> Result<TokenPair, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::BadCredentials);
        }

        let credentials = self.stores.credentials.as_ref();
        let verified = retry_read(
            &self.config.read_retry,
            "verify_credentials",
            self.config.store_timeout,
            move || credentials.verify(username, password),
        )
        .await;

        let identity = match verified {
            Ok(identity) => identity,
            Err(CredentialError::UserNotFound) => {
                audit_login(username, None, "user_not_found", client);
                return Err(AuthError::BadCredentials);
            }
            Err(CredentialError::BadCredentials { user_id }) => {
                audit_login(username, Some(user_id), "invalid_password", client);
                return Err(AuthError::BadCredentials);
            }
            Err(CredentialError::Store(e)) => return Err(e.into()),
        };

        if !identity.active {
            audit_login(username, Some(identity.id), "account_disabled", client);
            return Err(AuthError::AccountDisabled);
        }

        let now = self.clock.now();
        let synced = self.sync.sync(&identity, now).await?;
        let profile = synced.user.profile();

        let session_id = SessionId::new();
        let access = self.codec.issue_access(&profile, session_id, now)?;
        let refresh = self.codec.issue_refresh(profile.user_id, session_id, now)?;

        let record = SessionRecord {
            session_id,
            subject_id: profile.user_id,
            token_hash: refresh.hash(),
            created_at: now,
            expires_at: refresh.claims.exp,
            last_refreshed_at: None,
            revoked: false,
            user_agent: client.user_agent.clone(),
            ip_address: client.ip_address.clone(),
        };
        bounded::<_, StoreError, _>(
            "create_session",
            self.config.store_timeout,
            self.stores.sessions.create(record),
        )
        .await?;

        audit_login(username, Some(profile.user_id), "success", client);
        Ok(self.pair(access, refresh.token, session_id))
    }

    /// Decide whether an access token is currently acceptable and project the
    /// user it identifies.
    ///
    /// Fails closed: if the blacklist cannot be consulted the token is denied
    /// with `UpstreamUnavailable`.
    #[instrument(skip_all, err)]
    pub async fn validate(&self, access_token: &str) -> Result<ValidatedUser, AuthError> {
        if access_token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }

        let now = self.clock.now();
        let claims: AccessClaims = self.codec.decode(access_token, now)?;

        let keys = [BlacklistKey::Token(claims.jti), BlacklistKey::Session(claims.sid)];
        if self.is_blacklisted(&keys).await? {
            return Err(AuthError::Blacklisted);
        }

        let profile = match self.config.projection {
            ProjectionSource::Claims => claims.profile(),
            ProjectionSource::ShadowStore => {
                let user = self
                    .shadow_user(claims.sub)
                    .await?
                    .ok_or(AuthError::UserNotFound)?;
                if !user.active {
                    return Err(AuthError::AccountDisabled);
                }
                user.profile()
            }
        };

        Ok(ValidatedUser {
            profile,
            session_id: claims.sid,
            token_id: claims.jti,
            expires_at: claims.exp,
        })
    }

    /// Exchange a refresh token for a new access token and a rotated refresh
    /// token. The session id never changes.
    #[instrument(skip_all, err)]
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, AuthError> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }

        let now = self.clock.now();
        let claims: RefreshClaims = self.codec.decode(refresh_token, now)?;
        let session_id = claims.sid;

        let session = self.session(session_id).await?.ok_or(AuthError::SessionNotFound)?;
        if session.subject_id != claims.sub {
            return Err(AuthError::SessionNotFound);
        }
        if session.revoked {
            return Err(AuthError::SessionRevoked);
        }
        if session.is_expired(now) {
            return Err(AuthError::Expired);
        }

        let presented_hash = hash_token(refresh_token);
        if session.token_hash != presented_hash {
            tracing::warn!(session_id = %session_id, "stale refresh token presented");
            return Err(AuthError::SessionReplayed);
        }

        let user = self
            .shadow_user(claims.sub)
            .await?
            .ok_or(AuthError::UserNotFound)?;
        if !user.active {
            return Err(AuthError::AccountDisabled);
        }
        let profile = user.profile();

        // The rotated token never outlives the session it belongs to.
        let remaining = (session.expires_at - now).min(self.config.refresh_ttl);
        if remaining < Duration::seconds(1) {
            return Err(AuthError::Expired);
        }
        let access = self.codec.issue_access(&profile, session_id, now)?;
        let rotated = RefreshClaims::new(profile.user_id, session_id, now, remaining);
        let rotated_token = self.codec.mint(&rotated)?;

        let swapped = bounded::<_, StoreError, _>(
            "rotate_session",
            self.config.store_timeout,
            self.stores
                .sessions
                .compare_and_swap(session_id, &presented_hash, &hash_token(&rotated_token), now),
        )
        .await?;
        if !swapped {
            tracing::warn!(session_id = %session_id, "refresh lost rotation race");
            return Err(AuthError::SessionReplayed);
        }

        tracing::info!(session_id = %session_id, user_id = %profile.user_id, "session refreshed");
        Ok(self.pair(access, rotated_token, session_id))
    }

    /// Revoke a session by id or by one of its refresh tokens. Idempotent.
    ///
    /// A refresh token that fails verification identifies nothing and is
    /// ignored; an expired but authentic one still revokes its session.
    #[instrument(skip_all, err)]
    pub async fn revoke(&self, target: RevokeTarget) -> Result<RevokeOutcome, AuthError> {
        let session_id = match target {
            RevokeTarget::Session(session_id) => session_id,
            RevokeTarget::RefreshToken(token) => match self.codec.verify::<RefreshClaims>(&token) {
                Ok(claims) => claims.sid,
                Err(e) => {
                    let e = AuthError::from(e);
                    tracing::debug!(kind = e.kind(), "ignoring unverifiable token on revoke");
                    return Ok(RevokeOutcome::nothing());
                }
            },
        };

        self.revoke_session(session_id, self.clock.now()).await
    }

    /// Blacklist an access token for its remaining lifetime and revoke the
    /// session it was minted under.
    #[instrument(skip_all, err)]
    pub async fn logout(&self, access_token: &str) -> Result<RevokeOutcome, AuthError> {
        if access_token.trim().is_empty() {
            return Err(AuthError::MissingToken);
        }

        let now = self.clock.now();
        let claims: AccessClaims = self.codec.decode(access_token, now)?;

        let remaining = (claims.exp - now).max(Duration::seconds(1));
        self.blacklist(BlacklistKey::Token(claims.jti), remaining).await?;

        self.revoke_session(claims.sid, now).await
    }

    async fn revoke_session(
        &self,
        session_id: SessionId,
        now: DateTime<Utc>,
    ) -> Result<RevokeOutcome, AuthError> {
        let Some(session) = self.session(session_id).await? else {
            tracing::debug!(session_id = %session_id, "revoke of unknown session");
            return Ok(RevokeOutcome {
                session_id: Some(session_id),
                revoked: false,
            });
        };

        // Outstanding access tokens may live up to one access ttl past now.
        let ttl = (session.expires_at - now).max(self.config.access_ttl);
        self.blacklist(BlacklistKey::Session(session_id), ttl).await?;

        let changed = bounded::<_, StoreError, _>(
            "revoke_session",
            self.config.store_timeout,
            self.stores.sessions.revoke(session_id),
        )
        .await?;

        if changed {
            tracing::info!(session_id = %session_id, user_id = %session.subject_id, "session revoked");
        }
        Ok(RevokeOutcome {
            session_id: Some(session_id),
            revoked: true,
        })
    }

    async fn blacklist(&self, key: BlacklistKey, ttl: Duration) -> Result<(), AuthError> {
        let ttl = ttl
            .to_std()
            .map_err(|e| AuthError::Internal(format!("invalid blacklist ttl: {e}")))?;
        bounded::<_, StoreError, _>(
            "blacklist_insert",
            self.config.store_timeout,
            self.stores.blacklist.insert(key, ttl),
        )
        .await?;
        Ok(())
    }

    async fn is_blacklisted(&self, keys: &[BlacklistKey]) -> Result<bool, AuthError> {
        let blacklist = self.stores.blacklist.as_ref();
        let found = retry_read::<_, StoreError, _, _>(
            &self.config.read_retry,
            "blacklist_check",
            self.config.store_timeout,
            move || blacklist.contains_any(keys),
        )
        .await?;
        Ok(found)
    }

    async fn session(&self, session_id: SessionId) -> Result<Option<SessionRecord>, AuthError> {
        let sessions = self.stores.sessions.as_ref();
        let record = retry_read::<_, StoreError, _, _>(
            &self.config.read_retry,
            "get_session",
            self.config.store_timeout,
            move || sessions.get(session_id),
        )
        .await?;
        Ok(record)
    }

    async fn shadow_user(&self, id: UserId) -> Result<Option<ShadowUser>, AuthError> {
        let shadows = self.stores.shadows.as_ref();
        let user = retry_read::<_, StoreError, _, _>(
            &self.config.read_retry,
            "get_shadow_user",
            self.config.store_timeout,
            move || shadows.get(id),
        )
        .await?;
        Ok(user)
    }

    fn pair(&self, access: IssuedToken<AccessClaims>, refresh_token: String, session_id: SessionId) -> TokenPair {
        TokenPair {
            access_token: access.token,
            refresh_token,
            token_type: "bearer",
            expires_in: self.codec.access_ttl().num_seconds(),
            session_id,
        }
    }
}

fn audit_login(username: &str, user_id: Option<UserId>, outcome: &'static str, client: &ClientInfo) {
    tracing::info!(
        target: AUDIT_TARGET,
        event = "login",
        username,
        user_id = %user_id.map(|id| id.to_string()).unwrap_or_default(),
        outcome,
        ip_address = client.ip_address.as_deref().unwrap_or("unknown"),
        user_agent = client.user_agent.as_deref().unwrap_or("unknown"),
    );
}

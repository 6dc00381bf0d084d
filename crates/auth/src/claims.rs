use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tollgate_core::{SessionId, TokenId, UserId};

use crate::{Permission, PermissionSet, Role, UserProfile};

/// Discriminator carried in every token as the `typ` claim.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

impl core::fmt::Display for TokenType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common surface of every claim set the codec can mint or decode.
pub trait TokenClaims: Serialize + DeserializeOwned {
    /// The `typ` a token must carry to decode as this claim set.
    const TYPE: TokenType;

    fn token_type(&self) -> TokenType;
    fn issued_at(&self) -> DateTime<Utc>;
    fn expires_at(&self) -> DateTime<Utc>;
}

/// Short-lived, stateless bearer credential.
///
/// Carries everything forward-auth needs so validation can project the user
/// without a store round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: UserId,
    pub jti: TokenId,
    /// Session the token was minted under; revoking the session revokes it.
    pub sid: SessionId,
    pub typ: TokenType,

    pub username: String,
    pub email: String,
    pub role: Role,
    pub permissions: Vec<Permission>,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,
}

impl AccessClaims {
    pub fn new(profile: &UserProfile, sid: SessionId, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        let iat = issued_at.trunc_subsecs(0);
        Self {
            sub: profile.user_id,
            jti: TokenId::new(),
            sid,
            typ: TokenType::Access,
            username: profile.username.clone(),
            email: profile.email.clone(),
            role: profile.role.clone(),
            permissions: profile.permissions.iter().cloned().collect(),
            iat,
            exp: iat + ttl,
        }
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.sub,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            permissions: self.permissions.iter().cloned().collect::<PermissionSet>(),
        }
    }
}

impl TokenClaims for AccessClaims {
    const TYPE: TokenType = TokenType::Access;

    fn token_type(&self) -> TokenType {
        self.typ
    }

    fn issued_at(&self) -> DateTime<Utc> {
        self.iat
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.exp
    }
}

/// Long-lived credential bound to a persisted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: UserId,
    pub jti: TokenId,
    pub sid: SessionId,
    pub typ: TokenType,

    #[serde(with = "chrono::serde::ts_seconds")]
    pub iat: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub exp: DateTime<Utc>,
}

impl RefreshClaims {
    pub fn new(sub: UserId, sid: SessionId, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        let iat = issued_at.trunc_subsecs(0);
        Self {
            sub,
            jti: TokenId::new(),
            sid,
            typ: TokenType::Refresh,
            iat,
            exp: iat + ttl,
        }
    }
}

impl TokenClaims for RefreshClaims {
    const TYPE: TokenType = TokenType::Refresh;

    fn token_type(&self) -> TokenType {
        self.typ
    }

    fn issued_at(&self) -> DateTime<Utc> {
        self.iat
    }

    fn expires_at(&self) -> DateTime<Utc> {
        self.exp
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenWindowError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (issued_at is in the future)")]
    NotYetValid,

    #[error("invalid token time window (expires_at <= issued_at)")]
    InvalidTimeWindow,
}

/// Tolerated clock skew between issuer and validator for `iat`.
pub const ISSUED_AT_LEEWAY_SECS: i64 = 30;

/// Deterministically check a claim set's time window against `now`.
///
/// Signature verification happens before this, in the codec.
pub fn validate_window<C: TokenClaims>(claims: &C, now: DateTime<Utc>) -> Result<(), TokenWindowError> {
    if claims.expires_at() <= claims.issued_at() {
        return Err(TokenWindowError::InvalidTimeWindow);
    }
    if now + Duration::seconds(ISSUED_AT_LEEWAY_SECS) < claims.issued_at() {
        return Err(TokenWindowError::NotYetValid);
    }
    if now >= claims.expires_at() {
        return Err(TokenWindowError::Expired);
    }
    Ok(())
}

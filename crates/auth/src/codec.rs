//! Compact signed token encoding (JWT, HMAC-SHA2).
//!
//! The signature is computed over the exact `header.payload` bytes that are
//! transmitted and verified over the bytes received, so there is no
//! re-serialization step that could drift. Decoding always checks the `typ`
//! claim before the claim shape is interpreted: an access token can never be
//! accepted where a refresh token is expected, or the other way round, even if
//! the two claim sets happened to deserialize into each other.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;

use tollgate_core::{SessionId, UserId};

use crate::claims::{AccessClaims, RefreshClaims, TokenClaims, TokenType, TokenWindowError, validate_window};
use crate::{AuthConfig, AuthError, UserProfile};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("bad signature")]
    BadSignature,

    #[error("token has expired")]
    Expired,

    #[error("token type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: TokenType, found: String },

    #[error("token encoding failed: {0}")]
    Encode(String),
}

impl From<CodecError> for AuthError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::Malformed(msg) => AuthError::MalformedToken(msg),
            CodecError::BadSignature => AuthError::BadSignature,
            CodecError::Expired => AuthError::Expired,
            CodecError::TypeMismatch { expected, found } => AuthError::TypeMismatch { expected, found },
            CodecError::Encode(msg) => AuthError::Internal(msg),
        }
    }
}

/// A freshly minted token together with the claims it carries.
#[derive(Debug, Clone)]
pub struct IssuedToken<C> {
    pub token: String,
    pub claims: C,
}

impl<C> IssuedToken<C> {
    /// Digest stored in place of the raw token.
    pub fn hash(&self) -> String {
        hash_token(&self.token)
    }
}

/// Hex-encoded SHA-256 of the raw token text.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub struct TokenCodec {
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenCodec {
    pub fn new(config: &AuthConfig) -> Self {
        let algorithm = config.algorithm.as_jwt();
        let secret = config.secret().as_bytes();

        // Expiry is checked against the injected clock in `decode`, not by the
        // library against wall time.
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;
        validation.required_spec_claims.clear();

        Self {
            algorithm,
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            access_ttl: config.access_ttl,
            refresh_ttl: config.refresh_ttl,
        }
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    /// Sign an arbitrary claim set.
    pub fn mint<C: TokenClaims>(&self, claims: &C) -> Result<String, CodecError> {
        if claims.token_type() != C::TYPE {
            return Err(CodecError::TypeMismatch {
                expected: C::TYPE,
                found: claims.token_type().to_string(),
            });
        }
        jsonwebtoken::encode(&Header::new(self.algorithm), claims, &self.encoding)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }

    pub fn issue_access(
        &self,
        profile: &UserProfile,
        sid: SessionId,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken<AccessClaims>, CodecError> {
        let claims = AccessClaims::new(profile, sid, now, self.access_ttl);
        let token = self.mint(&claims)?;
        Ok(IssuedToken { token, claims })
    }

    pub fn issue_refresh(
        &self,
        sub: UserId,
        sid: SessionId,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken<RefreshClaims>, CodecError> {
        let claims = RefreshClaims::new(sub, sid, now, self.refresh_ttl);
        let token = self.mint(&claims)?;
        Ok(IssuedToken { token, claims })
    }

    /// Verify signature, type and shape, then the time window against `now`.
    pub fn decode<C: TokenClaims>(&self, token: &str, now: DateTime<Utc>) -> Result<C, CodecError> {
        let claims = self.verify::<C>(token)?;
        validate_window(&claims, now).map_err(|e| match e {
            TokenWindowError::Expired => CodecError::Expired,
            other => CodecError::Malformed(other.to_string()),
        })?;
        Ok(claims)
    }

    /// Verify signature, type and shape without looking at the time window.
    ///
    /// Only revocation uses this: an expired but authentic refresh token still
    /// identifies the session to revoke.
    pub fn verify<C: TokenClaims>(&self, token: &str) -> Result<C, CodecError> {
        if token.trim().is_empty() {
            return Err(CodecError::Malformed("empty token".to_string()));
        }

        let data = jsonwebtoken::decode::<JsonValue>(token, &self.decoding, &self.validation)
            .map_err(map_jwt_error)?;

        let found = data
            .claims
            .get("typ")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| CodecError::Malformed("missing typ claim".to_string()))?;
        if found != C::TYPE.as_str() {
            return Err(CodecError::TypeMismatch {
                expected: C::TYPE,
                found: found.to_string(),
            });
        }

        serde_json::from_value::<C>(data.claims).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}

impl core::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &self.algorithm)
            .field("access_ttl", &self.access_ttl)
            .field("refresh_ttl", &self.refresh_ttl)
            .finish_non_exhaustive()
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> CodecError {
    match err.kind() {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => CodecError::BadSignature,
        ErrorKind::ExpiredSignature => CodecError::Expired,
        _ => CodecError::Malformed(err.to_string()),
    }
}

use thiserror::Error;

use crate::TokenType;

/// Every way an authentication operation can fail.
///
/// Each variant is preserved internally (logs, `kind()` labels); the HTTP
/// layer collapses all credential/token failures into a single response so
/// callers cannot tell which check failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("invalid credentials")]
    BadCredentials,

    #[error("account is disabled")]
    AccountDisabled,

    #[error("malformed token: {0}")]
    MalformedToken(String),

    #[error("token signature mismatch")]
    BadSignature,

    #[error("token has expired")]
    Expired,

    #[error("token has been revoked")]
    Blacklisted,

    #[error("token type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: TokenType, found: String },

    #[error("user not found")]
    UserNotFound,

    #[error("session not found")]
    SessionNotFound,

    #[error("session has been revoked")]
    SessionRevoked,

    #[error("refresh token was already used")]
    SessionReplayed,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("user sync failed: {0}")]
    SyncFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedToken(msg.into())
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::UpstreamUnavailable(msg.into())
    }

    /// Stable label for structured logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing_token",
            AuthError::BadCredentials => "bad_credentials",
            AuthError::AccountDisabled => "account_disabled",
            AuthError::MalformedToken(_) => "malformed_token",
            AuthError::BadSignature => "bad_signature",
            AuthError::Expired => "expired",
            AuthError::Blacklisted => "blacklisted",
            AuthError::TypeMismatch { .. } => "type_mismatch",
            AuthError::UserNotFound => "user_not_found",
            AuthError::SessionNotFound => "session_not_found",
            AuthError::SessionRevoked => "session_revoked",
            AuthError::SessionReplayed => "session_replayed",
            AuthError::UpstreamUnavailable(_) => "upstream_unavailable",
            AuthError::SyncFailed(_) => "sync_failed",
            AuthError::Internal(_) => "internal",
        }
    }

    /// True for failures caused by what the caller presented (credentials or
    /// tokens), as opposed to the service being unable to decide.
    pub fn is_credential_failure(&self) -> bool {
        !matches!(
            self,
            AuthError::AccountDisabled
                | AuthError::UpstreamUnavailable(_)
                | AuthError::SyncFailed(_)
                | AuthError::Internal(_)
        )
    }
}

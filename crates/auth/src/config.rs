//! Immutable authentication configuration.
//!
//! Built once at startup and injected into the codec and orchestrator. Nothing
//! in the service reads signing material from process-wide state.

use std::str::FromStr;
use std::time::Duration as StdDuration;

use chrono::Duration;
use jsonwebtoken::Algorithm;

use tollgate_core::{DomainError, DomainResult};

/// HMAC signing key. `Debug` never prints the key material.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> DomainResult<Self> {
        let bytes = bytes.into();
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(DomainError::validation("signing secret is empty"));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl core::fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "SigningSecret(<{} bytes redacted>)", self.0.len())
    }
}

/// Supported signing algorithm identifiers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum SigningAlgorithm {
    #[default]
    Hs256,
    Hs384,
    Hs512,
}

impl SigningAlgorithm {
    pub fn as_jwt(&self) -> Algorithm {
        match self {
            SigningAlgorithm::Hs256 => Algorithm::HS256,
            SigningAlgorithm::Hs384 => Algorithm::HS384,
            SigningAlgorithm::Hs512 => Algorithm::HS512,
        }
    }
}

impl FromStr for SigningAlgorithm {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HS256" => Ok(SigningAlgorithm::Hs256),
            "HS384" => Ok(SigningAlgorithm::Hs384),
            "HS512" => Ok(SigningAlgorithm::Hs512),
            other => Err(DomainError::validation(format!(
                "unsupported signing algorithm '{other}' (expected HS256, HS384 or HS512)"
            ))),
        }
    }
}

/// Where `Validate` takes the projected user fields from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ProjectionSource {
    /// Trust the claims embedded in the access token.
    #[default]
    Claims,
    /// Re-read the shadow user on every validation (fresher, one extra round trip).
    ShadowStore,
}

impl FromStr for ProjectionSource {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claims" => Ok(ProjectionSource::Claims),
            "store" | "shadow" | "shadow_store" => Ok(ProjectionSource::ShadowStore),
            other => Err(DomainError::validation(format!(
                "unknown projection source '{other}' (expected claims or store)"
            ))),
        }
    }
}

/// Bounded retry for idempotent reads.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    pub base_delay: StdDuration,
    pub max_delay: StdDuration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based), doubling up to `max_delay`.
    pub fn backoff(&self, retry: u32) -> StdDuration {
        let factor = 1u32.checked_shl(retry.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: StdDuration::from_millis(25),
            max_delay: StdDuration::from_millis(250),
        }
    }
}

pub const DEFAULT_ACCESS_TTL_SECS: i64 = 3600;
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 604_800;
pub const DEFAULT_STORE_TIMEOUT_MS: u64 = 2000;

#[derive(Debug, Clone)]
pub struct AuthConfig {
    secret: SigningSecret,
    pub algorithm: SigningAlgorithm,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub projection: ProjectionSource,
    /// Upper bound on every individual store call.
    pub store_timeout: StdDuration,
    pub read_retry: RetryPolicy,
}

impl AuthConfig {
    pub fn new(secret: SigningSecret) -> Self {
        Self {
            secret,
            algorithm: SigningAlgorithm::default(),
            access_ttl: Duration::seconds(DEFAULT_ACCESS_TTL_SECS),
            refresh_ttl: Duration::seconds(DEFAULT_REFRESH_TTL_SECS),
            projection: ProjectionSource::default(),
            store_timeout: StdDuration::from_millis(DEFAULT_STORE_TIMEOUT_MS),
            read_retry: RetryPolicy::default(),
        }
    }

    pub fn with_algorithm(mut self, algorithm: SigningAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn with_ttls(mut self, access: Duration, refresh: Duration) -> Self {
        self.access_ttl = access;
        self.refresh_ttl = refresh;
        self
    }

    pub fn with_projection(mut self, projection: ProjectionSource) -> Self {
        self.projection = projection;
        self
    }

    pub fn with_store_timeout(mut self, timeout: StdDuration) -> Self {
        self.store_timeout = timeout;
        self
    }

    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    pub fn secret(&self) -> &SigningSecret {
        &self.secret
    }

    /// Reject configurations that cannot produce a working token lifecycle.
    pub fn validate(&self) -> DomainResult<()> {
        if self.access_ttl <= Duration::zero() {
            return Err(DomainError::validation("access token ttl must be positive"));
        }
        if self.refresh_ttl < self.access_ttl {
            return Err(DomainError::validation(
                "refresh token ttl must not be shorter than access token ttl",
            ));
        }
        if self.read_retry.attempts == 0 {
            return Err(DomainError::validation("read retry attempts must be at least 1"));
        }
        if self.store_timeout.is_zero() {
            return Err(DomainError::validation("store timeout must be positive"));
        }
        Ok(())
    }
}

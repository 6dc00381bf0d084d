//! Process configuration, read once from the environment at startup.

use std::net::SocketAddr;
use std::time::Duration as StdDuration;

use anyhow::{Context, bail};
use chrono::Duration;

use tollgate_auth::{AuthConfig, ProjectionSource, RetryPolicy, SigningAlgorithm, SigningSecret};
use tollgate_auth::config::{DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS, DEFAULT_STORE_TIMEOUT_MS};

/// The example secret shipped in deployment templates. Never accepted.
pub const PLACEHOLDER_SECRET: &str = "your-super-secret-jwt-key-256-bit-change-this";

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Admin account seeded into the in-memory directory when no database is configured.
#[derive(Clone)]
pub struct BootstrapAdmin {
    pub username: String,
    pub password: String,
}

impl core::fmt::Debug for BootstrapAdmin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BootstrapAdmin")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub auth: AuthConfig,
    pub bind_addr: SocketAddr,
    /// Absent: in-memory credential, shadow and session stores.
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Absent: in-memory blacklist.
    pub redis_url: Option<String>,
    pub bootstrap_admin: Option<BootstrapAdmin>,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let raw_secret = lookup("JWT_SECRET").unwrap_or_default();
        if raw_secret.trim() == PLACEHOLDER_SECRET {
            bail!("JWT_SECRET is still the placeholder value; set a real secret");
        }
        let secret = SigningSecret::new(raw_secret).context("JWT_SECRET must be set and non-empty")?;

        let algorithm = match get("JWT_ALGORITHM") {
            Some(v) => v.parse::<SigningAlgorithm>().context("invalid JWT_ALGORITHM")?,
            None => SigningAlgorithm::default(),
        };
        let access_ttl = parse_or(&get, "ACCESS_TOKEN_EXPIRY_SECONDS", DEFAULT_ACCESS_TTL_SECS)?;
        let refresh_ttl = parse_or(&get, "REFRESH_TOKEN_EXPIRY_SECONDS", DEFAULT_REFRESH_TTL_SECS)?;
        let projection = match get("VALIDATE_PROJECTION") {
            Some(v) => v.parse::<ProjectionSource>().context("invalid VALIDATE_PROJECTION")?,
            None => ProjectionSource::default(),
        };
        let store_timeout_ms = parse_or(&get, "STORE_TIMEOUT_MS", DEFAULT_STORE_TIMEOUT_MS)?;
        let read_retry_attempts = parse_or(&get, "READ_RETRY_ATTEMPTS", RetryPolicy::default().attempts)?;

        let auth = AuthConfig::new(secret)
            .with_algorithm(algorithm)
            .with_ttls(Duration::seconds(access_ttl), Duration::seconds(refresh_ttl))
            .with_projection(projection)
            .with_store_timeout(StdDuration::from_millis(store_timeout_ms))
            .with_read_retry(RetryPolicy {
                attempts: read_retry_attempts,
                ..RetryPolicy::default()
            });
        auth.validate().context("invalid token configuration")?;

        let bind_addr = get("BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .parse::<SocketAddr>()
            .context("invalid BIND_ADDR")?;

        let bootstrap_admin = get("BOOTSTRAP_ADMIN_PASSWORD").map(|password| BootstrapAdmin {
            username: get("BOOTSTRAP_ADMIN_USERNAME").unwrap_or_else(|| "admin".to_string()),
            password,
        });

        Ok(Self {
            auth,
            bind_addr,
            database_url: get("DATABASE_URL"),
            database_max_connections: parse_or(&get, "DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
            redis_url: get("REDIS_URL"),
            bootstrap_admin,
        })
    }
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(v) => v.parse::<T>().with_context(|| format!("invalid {key}: {v:?}")),
        None => Ok(default),
    }
}

//! Store selection and orchestrator construction.
//!
//! `DATABASE_URL` switches the credential, shadow and session stores to
//! Postgres; `REDIS_URL` (with the `redis` feature) moves the blacklist to
//! Redis. Anything unset falls back to the in-memory adapters.

use std::sync::Arc;

use anyhow::Context;

use tollgate_auth::{Identity, Permission, PasswordVerifier, Role};
use tollgate_core::{Clock, SystemClock, UserId};
use tollgate_infra::store::{
    InMemoryBlacklistStore, InMemoryCredentialStore, InMemorySessionStore, InMemoryShadowUserStore,
    PostgresCredentialStore, PostgresSessionStore, PostgresShadowUserStore, postgres::connect_pool,
};
use tollgate_infra::{AuthOrchestrator, AuthStores, BlacklistStore};

use crate::settings::{BootstrapAdmin, Settings};

const BOOTSTRAP_PERMISSIONS: [&str; 2] = ["mcp:read", "mcp:write"];

pub async fn build_orchestrator(settings: &Settings) -> anyhow::Result<Arc<AuthOrchestrator>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let verifier = PasswordVerifier::new().context("failed to initialise password verifier")?;
    let blacklist = build_blacklist(settings, clock.clone()).await?;

    let stores = match settings.database_url.as_deref() {
        Some(url) => {
            let pool = connect_pool(
                url,
                settings.database_max_connections,
                settings.auth.store_timeout,
            )
            .await
            .context("failed to connect to postgres")?;
            tracing::info!(max_connections = settings.database_max_connections, "using postgres stores");

            AuthStores {
                credentials: Arc::new(PostgresCredentialStore::new(pool.clone(), verifier)),
                shadows: Arc::new(PostgresShadowUserStore::new(pool.clone())),
                sessions: Arc::new(PostgresSessionStore::new(pool)),
                blacklist,
            }
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory stores (sessions are lost on restart)");
            AuthStores {
                credentials: Arc::new(in_memory_directory(verifier, settings.bootstrap_admin.as_ref())?),
                shadows: Arc::new(InMemoryShadowUserStore::new()),
                sessions: Arc::new(InMemorySessionStore::new()),
                blacklist,
            }
        }
    };

    let orchestrator = AuthOrchestrator::new(settings.auth.clone(), stores, clock)
        .context("failed to build auth orchestrator")?;
    Ok(Arc::new(orchestrator))
}

async fn build_blacklist(
    settings: &Settings,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<dyn BlacklistStore>> {
    #[cfg(feature = "redis")]
    if let Some(url) = settings.redis_url.as_deref() {
        let store = tollgate_infra::store::RedisBlacklistStore::connect(url)
            .await
            .context("failed to connect to redis")?;
        tracing::info!("using redis blacklist");
        return Ok(Arc::new(store));
    }

    #[cfg(not(feature = "redis"))]
    if settings.redis_url.is_some() {
        tracing::warn!("REDIS_URL is set but the redis feature is disabled; using in-memory blacklist");
    }

    Ok(Arc::new(InMemoryBlacklistStore::with_clock(clock)))
}

/// In-memory canonical directory, optionally seeded with one admin.
fn in_memory_directory(
    verifier: PasswordVerifier,
    admin: Option<&BootstrapAdmin>,
) -> anyhow::Result<InMemoryCredentialStore> {
    let store = InMemoryCredentialStore::new(verifier);

    let Some(admin) = admin else {
        tracing::warn!("no BOOTSTRAP_ADMIN_PASSWORD set; the in-memory directory is empty");
        return Ok(store);
    };

    let identity = Identity {
        id: UserId::new(),
        username: admin.username.clone(),
        email: format!("{}@localhost", admin.username),
        role: Role::new("admin"),
        permissions: BOOTSTRAP_PERMISSIONS.iter().map(|p| Permission::new(*p)).collect(),
        active: true,
        last_login: None,
    };
    store
        .put(identity, &admin.password)
        .context("failed to seed bootstrap admin")?;

    tracing::warn!(username = %admin.username, "bootstrapped in-memory admin (password taken from env)");
    Ok(store)
}

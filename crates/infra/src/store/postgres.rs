//! Postgres-backed store adapters.
//!
//! Queries are runtime-checked (`sqlx::query` + `bind`) so the crate builds
//! without a live database. Tables (schema owned by the migration tooling):
//!
//! | Table | Used by | Key columns |
//! |-------|---------|-------------|
//! | `omni_dashboard.admin_users` | `PostgresCredentialStore` | `id uuid`, `username`, `email`, `password_hash`, `role`, `is_active`, `last_login` |
//! | `auth_service.roles` | `PostgresCredentialStore` | `name`, `permissions jsonb` (array of strings) |
//! | `auth_service.users` | `PostgresShadowUserStore` | `id uuid pk`, `username`, `email`, `role`, `permissions jsonb`, `active`, `created_at`, `updated_at`, `last_login_at` |
//! | `auth_service.user_sessions` | `PostgresSessionStore` | `session_id uuid pk`, `user_id`, `refresh_token_hash`, `device_info`, `ip_address`, `created_at`, `expires_at`, `last_refreshed_at`, `revoked` |
//!
//! ## Error Mapping
//!
//! | SQLx Error | StoreError |
//! |------------|------------|
//! | Database, code `23505` (unique violation) | `Conflict` |
//! | Column decode / decode | `Corrupt` |
//! | Anything else (I/O, pool timeout, pool closed, TLS, other database errors) | `Unavailable` |

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;

use tollgate_auth::{Identity, PasswordVerifier, Permission, PermissionSet, Role, ShadowUser};
use tollgate_core::{SessionId, UserId};

use super::{
    CredentialError, CredentialStore, SessionRecord, SessionStore, ShadowUserStore, StoreError,
    UpsertOutcome,
};

/// Build a bounded connection pool.
pub async fn connect_pool(
    database_url: &str,
    max_connections: u32,
    acquire_timeout: StdDuration,
) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect(database_url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Canonical directory: `admin_users` joined with role permissions.
#[derive(Debug, Clone)]
pub struct PostgresCredentialStore {
    pool: Arc<PgPool>,
    verifier: Arc<PasswordVerifier>,
}

impl PostgresCredentialStore {
    pub fn new(pool: PgPool, verifier: PasswordVerifier) -> Self {
        Self {
            pool: Arc::new(pool),
            verifier: Arc::new(verifier),
        }
    }
}

#[async_trait::async_trait]
impl CredentialStore for PostgresCredentialStore {
    // `password` is skipped: it must never reach a span.
    #[instrument(skip(self, password), err)]
    async fn verify(&self, username: &str, password: &str) -> Result<Identity, CredentialError> {
        let row = sqlx::query(
            r#"
            SELECT
                u.id,
                u.username,
                u.email,
                u.password_hash,
                u.role,
                u.is_active,
                u.last_login,
                COALESCE(r.permissions, '[]'::jsonb) AS permissions
            FROM omni_dashboard.admin_users u
            LEFT JOIN auth_service.roles r ON r.name = u.role
            WHERE u.username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("verify_credentials", e))?;

        let record = row
            .map(|r| CredentialRow::from_row(&r))
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("failed to decode admin_users row: {e}")))?;

        let verifier = self.verifier.clone();
        let password = password.to_owned();
        let stored = record.as_ref().and_then(|r| r.password_hash.clone());
        let matches = tokio::task::spawn_blocking(move || verifier.verify(&password, stored.as_deref()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("password verification task failed: {e}")))?;

        match record {
            None => Err(CredentialError::UserNotFound),
            Some(record) if !matches => Err(CredentialError::BadCredentials {
                user_id: UserId::from_uuid(record.id),
            }),
            Some(record) => Ok(record.try_into()?),
        }
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn record_login(&self, id: UserId, at: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query("UPDATE omni_dashboard.admin_users SET last_login = $2 WHERE id = $1")
            .bind(id.as_uuid())
            .bind(at)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_login", e))?;
        Ok(())
    }
}

/// Local shadow users in `auth_service.users`.
#[derive(Debug, Clone)]
pub struct PostgresShadowUserStore {
    pool: Arc<PgPool>,
}

impl PostgresShadowUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait::async_trait]
impl ShadowUserStore for PostgresShadowUserStore {
    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn get(&self, id: UserId) -> Result<Option<ShadowUser>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, username, email, role, permissions, active, created_at, updated_at, last_login_at
            FROM auth_service.users
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_shadow_user", e))?;

        row.map(|r| ShadowUserRow::from_row(&r))
            .transpose()
            .map_err(|e| StoreError::Corrupt(format!("failed to decode shadow user row: {e}")))?
            .map(ShadowUser::try_from)
            .transpose()
    }

    #[instrument(skip(self, identity), fields(user_id = %identity.id), err)]
    async fn upsert(
        &self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<(ShadowUser, UpsertOutcome), StoreError> {
        let permissions: Vec<&str> = identity.permissions.iter().map(Permission::as_str).collect();

        // `xmax = 0` only holds for a row version produced by the INSERT branch.
        let row = sqlx::query(
            r#"
            INSERT INTO auth_service.users (
                id, username, email, role, permissions, active, created_at, updated_at, last_login_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $7, $7)
            ON CONFLICT (id) DO UPDATE SET
                username = EXCLUDED.username,
                email = EXCLUDED.email,
                role = EXCLUDED.role,
                permissions = EXCLUDED.permissions,
                active = EXCLUDED.active,
                updated_at = EXCLUDED.updated_at,
                last_login_at = EXCLUDED.last_login_at
            RETURNING
                id, username, email, role, permissions, active, created_at, updated_at, last_login_at,
                (xmax = 0) AS inserted
            "#,
        )
        .bind(identity.id.as_uuid())
        .bind(&identity.username)
        .bind(&identity.email)
        .bind(identity.role.as_str())
        .bind(sqlx::types::Json(permissions))
        .bind(identity.active)
        .bind(now)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_shadow_user", e))?;

        let inserted: bool = row
            .try_get("inserted")
            .map_err(|e| StoreError::Corrupt(format!("missing upsert marker: {e}")))?;
        let shadow = ShadowUserRow::from_row(&row)
            .map_err(|e| StoreError::Corrupt(format!("failed to decode shadow user row: {e}")))?;

        let outcome = if inserted {
            UpsertOutcome::Created
        } else {
            UpsertOutcome::Updated
        };
        Ok((shadow.try_into()?, outcome))
    }
}

/// Refresh-token sessions in `auth_service.user_sessions`.
#[derive(Debug, Clone)]
pub struct PostgresSessionStore {
    pool: Arc<PgPool>,
}

impl PostgresSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }
}

#[async_trait::async_trait]
impl SessionStore for PostgresSessionStore {
    #[instrument(skip(self, record), fields(session_id = %record.session_id, user_id = %record.subject_id), err)]
    async fn create(&self, record: SessionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO auth_service.user_sessions (
                session_id,
                user_id,
                refresh_token_hash,
                device_info,
                ip_address,
                created_at,
                expires_at,
                last_refreshed_at,
                revoked
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.session_id.as_uuid())
        .bind(record.subject_id.as_uuid())
        .bind(&record.token_hash)
        .bind(&record.user_agent)
        .bind(&record.ip_address)
        .bind(record.created_at)
        .bind(record.expires_at)
        .bind(record.last_refreshed_at)
        .bind(record.revoked)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("create_session", e))?;
        Ok(())
    }

    #[instrument(skip(self), fields(session_id = %session_id), err)]
    async fn get(&self, session_id: SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                session_id, user_id, refresh_token_hash, device_info, ip_address,
                created_at, expires_at, last_refreshed_at, revoked
            FROM auth_service.user_sessions
            WHERE session_id = $1
            "#,
        )
        .bind(session_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_session", e))?;

        row.map(|r| SessionRow::from_row(&r))
            .transpose()
            .map(|r| r.map(SessionRecord::from))
            .map_err(|e| StoreError::Corrupt(format!("failed to decode session row: {e}")))
    }

    #[instrument(skip(self, expected_hash, new_hash), fields(session_id = %session_id), err)]
    async fn compare_and_swap(
        &self,
        session_id: SessionId,
        expected_hash: &str,
        new_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE auth_service.user_sessions
            SET refresh_token_hash = $3, last_refreshed_at = $4
            WHERE session_id = $1 AND refresh_token_hash = $2 AND NOT revoked
            "#,
        )
        .bind(session_id.as_uuid())
        .bind(expected_hash)
        .bind(new_hash)
        .bind(now)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("rotate_session", e))?;

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self), fields(session_id = %session_id), err)]
    async fn revoke(&self, session_id: SessionId) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE auth_service.user_sessions SET revoked = TRUE WHERE session_id = $1 AND NOT revoked",
        )
        .bind(session_id.as_uuid())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("revoke_session", e))?;

        Ok(result.rows_affected() == 1)
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn permissions_from_json(value: serde_json::Value) -> Result<PermissionSet, StoreError> {
    let names: Vec<String> = serde_json::from_value(value)
        .map_err(|e| StoreError::Corrupt(format!("permissions is not a string array: {e}")))?;
    Ok(names.into_iter().map(Permission::new).collect())
}

// SQLx row types

#[derive(Debug)]
struct CredentialRow {
    id: uuid::Uuid,
    username: String,
    email: Option<String>,
    password_hash: Option<String>,
    role: String,
    is_active: bool,
    last_login: Option<DateTime<Utc>>,
    permissions: serde_json::Value,
}

impl<'r> FromRow<'r, PgRow> for CredentialRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(CredentialRow {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            password_hash: row.try_get("password_hash")?,
            role: row.try_get("role")?,
            is_active: row.try_get("is_active")?,
            last_login: row.try_get("last_login")?,
            permissions: row.try_get("permissions")?,
        })
    }
}

impl TryFrom<CredentialRow> for Identity {
    type Error = StoreError;

    fn try_from(row: CredentialRow) -> Result<Self, Self::Error> {
        Ok(Identity {
            id: UserId::from_uuid(row.id),
            username: row.username,
            email: row.email.unwrap_or_default(),
            role: Role::new(row.role),
            permissions: permissions_from_json(row.permissions)?,
            active: row.is_active,
            last_login: row.last_login,
        })
    }
}

#[derive(Debug)]
struct ShadowUserRow {
    id: uuid::Uuid,
    username: String,
    email: String,
    role: String,
    permissions: serde_json::Value,
    active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    last_login_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for ShadowUserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(ShadowUserRow {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            email: row.try_get("email")?,
            role: row.try_get("role")?,
            permissions: row.try_get("permissions")?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            last_login_at: row.try_get("last_login_at")?,
        })
    }
}

impl TryFrom<ShadowUserRow> for ShadowUser {
    type Error = StoreError;

    fn try_from(row: ShadowUserRow) -> Result<Self, Self::Error> {
        Ok(ShadowUser {
            id: UserId::from_uuid(row.id),
            username: row.username,
            email: row.email,
            role: Role::new(row.role),
            permissions: permissions_from_json(row.permissions)?,
            active: row.active,
            created_at: row.created_at,
            updated_at: row.updated_at,
            last_login: row.last_login_at,
        })
    }
}

#[derive(Debug)]
struct SessionRow {
    session_id: uuid::Uuid,
    user_id: uuid::Uuid,
    refresh_token_hash: String,
    device_info: Option<String>,
    ip_address: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_refreshed_at: Option<DateTime<Utc>>,
    revoked: bool,
}

impl<'r> FromRow<'r, PgRow> for SessionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(SessionRow {
            session_id: row.try_get("session_id")?,
            user_id: row.try_get("user_id")?,
            refresh_token_hash: row.try_get("refresh_token_hash")?,
            device_info: row.try_get("device_info")?,
            ip_address: row.try_get("ip_address")?,
            created_at: row.try_get("created_at")?,
            expires_at: row.try_get("expires_at")?,
            last_refreshed_at: row.try_get("last_refreshed_at")?,
            revoked: row.try_get("revoked")?,
        })
    }
}

impl From<SessionRow> for SessionRecord {
    fn from(row: SessionRow) -> Self {
        SessionRecord {
            session_id: SessionId::from_uuid(row.session_id),
            subject_id: UserId::from_uuid(row.user_id),
            token_hash: row.refresh_token_hash,
            created_at: row.created_at,
            expires_at: row.expires_at,
            last_refreshed_at: row.last_refreshed_at,
            revoked: row.revoked,
            user_agent: row.device_info,
            ip_address: row.ip_address,
        }
    }
}

//! Redis-backed revocation blacklist (optional, feature `redis`).
//!
//! Entries are plain keys (`<prefix>token:<jti>`, `<prefix>session:<sid>`)
//! expired by Redis itself. Requires Redis 7+ for `PEXPIRE ... GT`.

use redis::aio::ConnectionManager;

use super::{BlacklistKey, BlacklistStore, StoreError};

const DEFAULT_PREFIX: &str = "tollgate:blacklist:";

#[derive(Clone)]
pub struct RedisBlacklistStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisBlacklistStore {
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(map_redis_error)?;
        let conn = client.get_connection_manager().await.map_err(map_redis_error)?;
        Ok(Self {
            conn,
            prefix: DEFAULT_PREFIX.to_string(),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, key: BlacklistKey) -> String {
        format!("{}{}", self.prefix, key)
    }
}

impl core::fmt::Debug for RedisBlacklistStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisBlacklistStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

fn map_redis_error(err: redis::RedisError) -> StoreError {
    StoreError::Unavailable(format!("redis: {err}"))
}

#[async_trait::async_trait]
impl BlacklistStore for RedisBlacklistStore {
    #[tracing::instrument(skip(self), fields(key = %key), err)]
    async fn insert(&self, key: BlacklistKey, ttl: std::time::Duration) -> Result<(), StoreError> {
        let key = self.key(key);
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn.clone();

        // NX keeps an existing entry; GT only ever lengthens its expiry.
        redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(&key)
            .arg(1)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms)
            .ignore()
            .cmd("PEXPIRE")
            .arg(&key)
            .arg(ttl_ms)
            .arg("GT")
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(map_redis_error)
    }

    #[tracing::instrument(skip(self), fields(key = %key), err)]
    async fn contains(&self, key: BlacklistKey) -> Result<bool, StoreError> {
        self.contains_any(&[key]).await
    }

    async fn contains_any(&self, keys: &[BlacklistKey]) -> Result<bool, StoreError> {
        if keys.is_empty() {
            return Ok(false);
        }
        let mut cmd = redis::cmd("EXISTS");
        for key in keys {
            cmd.arg(self.key(*key));
        }
        let mut conn = self.conn.clone();
        let present: u64 = cmd.query_async(&mut conn).await.map_err(map_redis_error)?;
        Ok(present > 0)
    }
}

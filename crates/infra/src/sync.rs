//! Lazy, one-directional reconciliation of canonical identities into the
//! local shadow store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::instrument;

use tollgate_auth::{AuthError, Identity, ShadowUser};

use crate::resilience::bounded;
use crate::store::{CredentialStore, ShadowUserStore, StoreError, UpsertOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub user: ShadowUser,
    pub outcome: UpsertOutcome,
}

pub struct UserSyncEngine {
    credentials: Arc<dyn CredentialStore>,
    shadows: Arc<dyn ShadowUserStore>,
    timeout: Duration,
}

impl UserSyncEngine {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        shadows: Arc<dyn ShadowUserStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            credentials,
            shadows,
            timeout,
        }
    }

    /// Create or refresh the shadow row for `identity` and stamp `last_login`
    /// on both sides.
    ///
    /// The shadow write is fatal (`SyncFailed`); the canonical timestamp is
    /// best-effort.
    #[instrument(skip(self, identity), fields(user_id = %identity.id, username = %identity.username), err)]
    pub async fn sync(&self, identity: &Identity, now: DateTime<Utc>) -> Result<SyncResult, AuthError> {
        let (user, outcome) = bounded::<_, StoreError, _>(
            "upsert_shadow_user",
            self.timeout,
            self.shadows.upsert(identity, now),
        )
        .await
        .map_err(|e| AuthError::SyncFailed(e.to_string()))?;

        if let Err(e) = bounded::<_, StoreError, _>(
            "record_canonical_login",
            self.timeout,
            self.credentials.record_login(identity.id, now),
        )
        .await
        {
            tracing::warn!(error = %e, "failed to stamp canonical last_login");
        }

        tracing::debug!(?outcome, "shadow user synced");
        Ok(SyncResult { user, outcome })
    }
}

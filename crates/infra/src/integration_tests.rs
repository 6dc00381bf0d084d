//! Integration tests for the full session lifecycle.
//!
//! Tests: Login → UserSyncEngine → SessionStore → Validate / Refresh / Revoke / Logout
//!
//! Verifies:
//! - Validate projects exactly what the credential source holds
//! - Refresh rotation is single-use under concurrency
//! - Revocation and logout take effect immediately
//! - Store outages make validation fail closed

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration as StdDuration;

    use chrono::{Duration, Utc};

    use tollgate_auth::{
        AuthConfig, AuthError, Identity, PasswordVerifier, Permission, ProjectionSource, RetryPolicy,
        Role, SigningSecret, hash_token,
    };
    use tollgate_core::{Clock, ManualClock, SessionId, UserId};

    use crate::orchestrator::{AuthOrchestrator, AuthStores, ClientInfo, RevokeTarget};
    use crate::store::{
        BlacklistKey, BlacklistStore, InMemoryBlacklistStore, InMemoryCredentialStore,
        InMemorySessionStore, InMemoryShadowUserStore, SessionStore, ShadowUserStore, StoreError,
    };

    const ADMIN_PASSWORD: &str = "correct-pw";

    struct Harness {
        orchestrator: Arc<AuthOrchestrator>,
        clock: Arc<ManualClock>,
        credentials: Arc<InMemoryCredentialStore>,
        shadows: Arc<InMemoryShadowUserStore>,
        sessions: Arc<InMemorySessionStore>,
        admin: Identity,
        verifier: PasswordVerifier,
    }

    fn test_config() -> AuthConfig {
        AuthConfig::new(SigningSecret::new("integration-test-secret").unwrap())
            .with_store_timeout(StdDuration::from_millis(100))
            .with_read_retry(RetryPolicy {
                attempts: 2,
                base_delay: StdDuration::from_millis(1),
                max_delay: StdDuration::from_millis(2),
            })
    }

    fn identity(username: &str, role: &str, permissions: &[&'static str], active: bool) -> Identity {
        Identity {
            id: UserId::new(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            role: Role::new(role.to_string()),
            permissions: permissions.iter().map(|p| Permission::new(*p)).collect(),
            active,
            last_login: None,
        }
    }

    fn setup_with(config: AuthConfig, blacklist: Option<Arc<dyn BlacklistStore>>) -> Harness {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let verifier = PasswordVerifier::with_params(1024, 1, 1).unwrap();
        let credentials = Arc::new(InMemoryCredentialStore::new(verifier.clone()));
        let shadows = Arc::new(InMemoryShadowUserStore::new());
        let sessions = Arc::new(InMemorySessionStore::new());
        let blacklist = blacklist
            .unwrap_or_else(|| Arc::new(InMemoryBlacklistStore::with_clock(clock.clone())) as Arc<dyn BlacklistStore>);

        let admin = identity("admin", "admin", &["mcp:admin", "mcp:read", "mcp:write"], true);
        credentials.put(admin.clone(), ADMIN_PASSWORD).unwrap();
        credentials
            .put(identity("dev", "developer", &["mcp:read"], true), "dev-pw")
            .unwrap();
        credentials
            .put(identity("former", "developer", &["mcp:read"], false), "former-pw")
            .unwrap();

        let stores = AuthStores {
            credentials: credentials.clone(),
            shadows: shadows.clone(),
            sessions: sessions.clone(),
            blacklist,
        };
        let orchestrator = AuthOrchestrator::new(config, stores, clock.clone() as Arc<dyn Clock>).unwrap();

        Harness {
            orchestrator: Arc::new(orchestrator),
            clock,
            credentials,
            shadows,
            sessions,
            admin,
            verifier,
        }
    }

    fn setup() -> Harness {
        setup_with(test_config(), None)
    }

    fn client() -> ClientInfo {
        ClientInfo {
            user_agent: Some("integration-test".to_string()),
            ip_address: Some("10.0.0.7".to_string()),
        }
    }

    /// Blacklist whose every call hangs well past any store timeout.
    struct StallingBlacklist;

    #[async_trait::async_trait]
    impl BlacklistStore for StallingBlacklist {
        async fn insert(&self, _: BlacklistKey, _: StdDuration) -> Result<(), StoreError> {
            tokio::time::sleep(StdDuration::from_secs(30)).await;
            Ok(())
        }

        async fn contains(&self, _: BlacklistKey) -> Result<bool, StoreError> {
            tokio::time::sleep(StdDuration::from_secs(30)).await;
            Ok(false)
        }
    }

    /// Blacklist that refuses every connection and counts attempts.
    #[derive(Default)]
    struct UnreachableBlacklist {
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl BlacklistStore for UnreachableBlacklist {
        async fn insert(&self, _: BlacklistKey, _: StdDuration) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }

        async fn contains(&self, _: BlacklistKey) -> Result<bool, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn login_then_validate_projects_credential_source() {
        let h = setup();
        let pair = h.orchestrator.login("admin", ADMIN_PASSWORD, &client()).await.unwrap();

        assert_eq!(pair.token_type, "bearer");
        assert_eq!(pair.expires_in, 3600);

        let user = h.orchestrator.validate(&pair.access_token).await.unwrap();
        assert_eq!(user.profile.user_id, h.admin.id);
        assert_eq!(user.profile.role, h.admin.role);
        assert_eq!(user.profile.permissions, h.admin.permissions);
        assert_eq!(user.profile.permissions_header(), "mcp:admin,mcp:read,mcp:write");
        assert_eq!(user.session_id, pair.session_id);
    }

    #[tokio::test]
    async fn login_revoke_refresh_scenario() {
        let h = setup();
        let pair = h.orchestrator.login("admin", ADMIN_PASSWORD, &client()).await.unwrap();
        assert_eq!(pair.expires_in, 3600);

        let user = h.orchestrator.validate(&pair.access_token).await.unwrap();
        assert_eq!(user.profile.role.as_str(), "admin");

        let outcome = h
            .orchestrator
            .revoke(RevokeTarget::RefreshToken(pair.refresh_token.clone()))
            .await
            .unwrap();
        assert!(outcome.revoked);
        assert_eq!(outcome.session_id, Some(pair.session_id));

        let err = h.orchestrator.refresh(&pair.refresh_token).await.unwrap_err();
        assert_eq!(err, AuthError::SessionRevoked);

        // Idempotent.
        let again = h.orchestrator.revoke(RevokeTarget::Session(pair.session_id)).await.unwrap();
        assert!(again.revoked);

        // Outstanding access tokens die with the session.
        let err = h.orchestrator.validate(&pair.access_token).await.unwrap_err();
        assert_eq!(err, AuthError::Blacklisted);
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_fail_identically() {
        let h = setup();
        let unknown = h.orchestrator.login("nobody", "whatever", &client()).await.unwrap_err();
        let wrong = h.orchestrator.login("admin", "wrong-pw", &client()).await.unwrap_err();

        assert_eq!(unknown, AuthError::BadCredentials);
        assert_eq!(unknown, wrong);
        assert!(h.shadows.is_empty().unwrap());
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_each_cost_one_hash() {
        let h = setup();
        let before = h.verifier.verifications();

        h.orchestrator.login("nobody", "whatever", &client()).await.unwrap_err();
        assert_eq!(h.verifier.verifications(), before + 1);

        h.orchestrator.login("admin", "wrong-pw", &client()).await.unwrap_err();
        assert_eq!(h.verifier.verifications(), before + 2);

        h.orchestrator.login("admin", ADMIN_PASSWORD, &client()).await.unwrap();
        assert_eq!(h.verifier.verifications(), before + 3);
    }

    /// In-memory sink for formatted log lines.
    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogCapture {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn wrong_password_audit_event_names_the_account() {
        let h = setup();
        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        h.orchestrator.login("admin", "wrong-pw", &client()).await.unwrap_err();
        h.orchestrator.login("nobody", "whatever", &client()).await.unwrap_err();

        let logs = capture.contents();
        let invalid = logs
            .lines()
            .find(|l| l.contains("outcome=\"invalid_password\""))
            .expect("invalid_password audit event");
        assert!(invalid.contains(&h.admin.id.to_string()));
        assert!(invalid.contains("tollgate::audit"));
        assert!(!logs.contains("wrong-pw"));

        let unknown = logs
            .lines()
            .find(|l| l.contains("outcome=\"user_not_found\""))
            .expect("user_not_found audit event");
        assert!(!unknown.contains(&h.admin.id.to_string()));
    }

    #[tokio::test]
    async fn disabled_account_is_only_reported_after_correct_password() {
        let h = setup();
        let err = h.orchestrator.login("former", "former-pw", &client()).await.unwrap_err();
        assert_eq!(err, AuthError::AccountDisabled);

        let err = h.orchestrator.login("former", "guess", &client()).await.unwrap_err();
        assert_eq!(err, AuthError::BadCredentials);
        assert!(h.shadows.is_empty().unwrap());
    }

    #[tokio::test]
    async fn shadow_user_is_created_lazily_once() {
        let h = setup();
        assert!(h.shadows.is_empty().unwrap());

        h.orchestrator.login("admin", ADMIN_PASSWORD, &client()).await.unwrap();
        h.orchestrator.login("admin", ADMIN_PASSWORD, &client()).await.unwrap();

        assert_eq!(h.shadows.len().unwrap(), 1);
        let shadow = h.shadows.get(h.admin.id).await.unwrap().unwrap();
        assert_eq!(shadow.username, "admin");
        assert!(h.credentials.identity("admin").unwrap().unwrap().last_login.is_some());
    }

    #[tokio::test]
    async fn session_stores_only_the_refresh_token_hash() {
        let h = setup();
        let pair = h.orchestrator.login("dev", "dev-pw", &client()).await.unwrap();

        let record = h.sessions.get(pair.session_id).await.unwrap().unwrap();
        assert_eq!(record.token_hash, hash_token(&pair.refresh_token));
        assert_ne!(record.token_hash, pair.refresh_token);
        assert_eq!(record.user_agent.as_deref(), Some("integration-test"));
        assert_eq!(record.ip_address.as_deref(), Some("10.0.0.7"));
        assert!(!record.revoked);
    }

    #[tokio::test]
    async fn refresh_rotates_token_and_keeps_session() {
        let h = setup();
        let first = h.orchestrator.login("dev", "dev-pw", &client()).await.unwrap();

        h.clock.advance(Duration::seconds(5));
        let second = h.orchestrator.refresh(&first.refresh_token).await.unwrap();
        assert_eq!(second.session_id, first.session_id);
        assert_ne!(second.refresh_token, first.refresh_token);
        assert!(h.orchestrator.validate(&second.access_token).await.is_ok());

        // The consumed token is now stale.
        let err = h.orchestrator.refresh(&first.refresh_token).await.unwrap_err();
        assert_eq!(err, AuthError::SessionReplayed);

        let record = h.sessions.get(first.session_id).await.unwrap().unwrap();
        assert_eq!(record.token_hash, hash_token(&second.refresh_token));
        assert_eq!(record.last_refreshed_at, Some(h.clock.now()));

        assert!(h.orchestrator.refresh(&second.refresh_token).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_refresh_of_one_token_has_exactly_one_winner() {
        let h = setup();
        let pair = h.orchestrator.login("dev", "dev-pw", &client()).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let orchestrator = h.orchestrator.clone();
            let token = pair.refresh_token.clone();
            handles.push(tokio::spawn(async move { orchestrator.refresh(&token).await }));
        }

        let mut successes = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(e) => assert_eq!(e, AuthError::SessionReplayed),
            }
        }
        assert_eq!(successes, 1);
    }

    #[tokio::test]
    async fn expired_access_token_fails_with_expired() {
        let h = setup();
        let pair = h.orchestrator.login("dev", "dev-pw", &client()).await.unwrap();

        h.clock.advance(Duration::seconds(3601));
        let err = h.orchestrator.validate(&pair.access_token).await.unwrap_err();
        assert_eq!(err, AuthError::Expired);
    }

    #[tokio::test]
    async fn token_types_are_not_interchangeable() {
        let h = setup();
        let pair = h.orchestrator.login("dev", "dev-pw", &client()).await.unwrap();

        let err = h.orchestrator.validate(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::TypeMismatch { .. }));

        let err = h.orchestrator.refresh(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::TypeMismatch { .. }));
    }

    #[tokio::test]
    async fn validate_without_token_is_missing_token() {
        let h = setup();
        assert_eq!(h.orchestrator.validate("  ").await.unwrap_err(), AuthError::MissingToken);
        assert!(matches!(
            h.orchestrator.validate("not-a-token").await.unwrap_err(),
            AuthError::MalformedToken(_)
        ));
    }

    #[tokio::test]
    async fn stalled_blacklist_fails_closed() {
        let h = setup_with(test_config(), Some(Arc::new(StallingBlacklist)));
        let pair = h.orchestrator.login("dev", "dev-pw", &client()).await.unwrap();

        let err = h.orchestrator.validate(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn unreachable_blacklist_is_retried_then_fails_closed() {
        let blacklist = Arc::new(UnreachableBlacklist::default());
        let h = setup_with(test_config(), Some(blacklist.clone()));
        let pair = h.orchestrator.login("dev", "dev-pw", &client()).await.unwrap();

        let err = h.orchestrator.validate(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable(_)));
        assert_eq!(blacklist.calls.load(Ordering::SeqCst), 2);

        // Writes are never retried and surface the outage too.
        let err = h
            .orchestrator
            .revoke(RevokeTarget::Session(pair.session_id))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn revoke_ignores_unverifiable_tokens_and_unknown_sessions() {
        let h = setup();

        let outcome = h
            .orchestrator
            .revoke(RevokeTarget::RefreshToken("garbage".to_string()))
            .await
            .unwrap();
        assert!(!outcome.revoked);
        assert_eq!(outcome.session_id, None);

        let outcome = h.orchestrator.revoke(RevokeTarget::Session(SessionId::new())).await.unwrap();
        assert!(!outcome.revoked);
    }

    #[tokio::test]
    async fn expired_refresh_token_still_revokes_its_session() {
        let h = setup();
        let pair = h.orchestrator.login("dev", "dev-pw", &client()).await.unwrap();

        h.clock.advance(Duration::days(8));
        let err = h.orchestrator.refresh(&pair.refresh_token).await.unwrap_err();
        assert_eq!(err, AuthError::Expired);

        let outcome = h
            .orchestrator
            .revoke(RevokeTarget::RefreshToken(pair.refresh_token.clone()))
            .await
            .unwrap();
        assert!(outcome.revoked);
        assert!(h.sessions.get(pair.session_id).await.unwrap().unwrap().revoked);
    }

    #[tokio::test]
    async fn logout_blacklists_access_token_and_revokes_session() {
        let h = setup();
        let pair = h.orchestrator.login("admin", ADMIN_PASSWORD, &client()).await.unwrap();

        let outcome = h.orchestrator.logout(&pair.access_token).await.unwrap();
        assert!(outcome.revoked);

        assert_eq!(h.orchestrator.validate(&pair.access_token).await.unwrap_err(), AuthError::Blacklisted);
        assert_eq!(h.orchestrator.refresh(&pair.refresh_token).await.unwrap_err(), AuthError::SessionRevoked);
    }

    #[tokio::test]
    async fn refresh_picks_up_fresh_role_and_permissions() {
        let h = setup();
        let pair = h.orchestrator.login("dev", "dev-pw", &client()).await.unwrap();
        let dev_id = h.orchestrator.validate(&pair.access_token).await.unwrap().profile.user_id;

        let mut promoted = h.credentials.identity("dev").unwrap().unwrap();
        assert_eq!(promoted.id, dev_id);
        promoted.role = Role::new("admin");
        promoted.permissions.insert(Permission::new("mcp:write"));
        h.shadows.upsert(&promoted, h.clock.now()).await.unwrap();

        let refreshed = h.orchestrator.refresh(&pair.refresh_token).await.unwrap();
        let user = h.orchestrator.validate(&refreshed.access_token).await.unwrap();
        assert_eq!(user.profile.role.as_str(), "admin");
        assert_eq!(user.profile.permissions_header(), "mcp:read,mcp:write");
    }

    #[tokio::test]
    async fn shadow_projection_reflects_store_not_claims() {
        let h = setup_with(test_config().with_projection(ProjectionSource::ShadowStore), None);
        let pair = h.orchestrator.login("dev", "dev-pw", &client()).await.unwrap();

        let mut changed = h.credentials.identity("dev").unwrap().unwrap();
        changed.role = Role::new("viewer");
        h.shadows.upsert(&changed, h.clock.now()).await.unwrap();

        let user = h.orchestrator.validate(&pair.access_token).await.unwrap();
        assert_eq!(user.profile.role.as_str(), "viewer");

        changed.active = false;
        h.shadows.upsert(&changed, h.clock.now()).await.unwrap();
        assert_eq!(h.orchestrator.validate(&pair.access_token).await.unwrap_err(), AuthError::AccountDisabled);
    }

    #[tokio::test]
    async fn revoked_session_blacklist_outlives_outstanding_access_tokens() {
        let h = setup();
        let pair = h.orchestrator.login("dev", "dev-pw", &client()).await.unwrap();
        h.orchestrator.revoke(RevokeTarget::Session(pair.session_id)).await.unwrap();

        h.clock.advance(Duration::seconds(3599));
        assert_eq!(h.orchestrator.validate(&pair.access_token).await.unwrap_err(), AuthError::Blacklisted);
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_at_construction() {
        let config = test_config().with_ttls(Duration::seconds(0), Duration::seconds(60));
        let stores = AuthStores {
            credentials: Arc::new(InMemoryCredentialStore::new(PasswordVerifier::with_params(1024, 1, 1).unwrap())),
            shadows: Arc::new(InMemoryShadowUserStore::new()),
            sessions: Arc::new(InMemorySessionStore::new()),
            blacklist: Arc::new(InMemoryBlacklistStore::new()),
        };
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::default());
        assert!(AuthOrchestrator::new(config, stores, clock).is_err());
    }
}

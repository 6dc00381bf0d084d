//! Infrastructure layer: store contracts and adapters, user sync, and the
//! session orchestrator.

pub mod orchestrator;
pub mod resilience;
pub mod store;
pub mod sync;

#[cfg(test)]
mod integration_tests;

pub use orchestrator::{
    AUDIT_TARGET, AuthOrchestrator, AuthStores, ClientInfo, RevokeOutcome, RevokeTarget, TokenPair,
    ValidatedUser,
};
pub use store::{
    BlacklistKey, BlacklistStore, CredentialError, CredentialStore, SessionRecord, SessionStore,
    ShadowUserStore, StoreError, UpsertOutcome,
};
pub use sync::{SyncResult, UserSyncEngine};

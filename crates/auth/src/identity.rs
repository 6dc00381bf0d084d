//! Identity model: canonical identities, their local shadow projection, and
//! the profile exposed to downstream services.

use std::borrow::Cow;
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tollgate_core::UserId;

/// Role identifier (e.g. "admin", "developer", "viewer").
///
/// Roles are opaque strings at this layer; mapping roles to permissions is
/// owned by the canonical directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Role(Cow<'static, str>);

impl Role {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Permission identifier (e.g. "mcp:read").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(Cow<'static, str>);

impl Permission {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for Permission {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered set so tokens and headers render permissions deterministically.
pub type PermissionSet = BTreeSet<Permission>;

/// A verified identity from the canonical directory.
///
/// The password hash never leaves the credential store, so it is not part of
/// this type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub permissions: PermissionSet,
    pub active: bool,
    pub last_login: Option<DateTime<Utc>>,
}

/// Local projection of a canonical identity, keyed by the same id.
///
/// # Invariants
/// - Created lazily on first successful login, never auto-deleted.
/// - Only the sync engine writes it; canonical fields always win.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowUser {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub permissions: PermissionSet,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl ShadowUser {
    /// Project a canonical identity into a fresh shadow row.
    pub fn project(identity: &Identity, now: DateTime<Utc>) -> Self {
        Self {
            id: identity.id,
            username: identity.username.clone(),
            email: identity.email.clone(),
            role: identity.role.clone(),
            permissions: identity.permissions.clone(),
            active: identity.active,
            created_at: now,
            updated_at: now,
            last_login: Some(now),
        }
    }

    /// Overwrite every mutable field from the canonical identity.
    pub fn refresh_from(&mut self, identity: &Identity, now: DateTime<Utc>) {
        self.username = identity.username.clone();
        self.email = identity.email.clone();
        self.role = identity.role.clone();
        self.permissions = identity.permissions.clone();
        self.active = identity.active;
        self.updated_at = now;
        self.last_login = Some(now);
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            user_id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
            role: self.role.clone(),
            permissions: self.permissions.clone(),
        }
    }
}

/// What a successful validation projects to the forward-auth caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub permissions: PermissionSet,
}

impl UserProfile {
    /// Comma-joined permissions, as sent in `X-User-Permissions`.
    pub fn permissions_header(&self) -> String {
        self.permissions
            .iter()
            .map(Permission::as_str)
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> Identity {
        Identity {
            id: UserId::new(),
            username: "john.doe".to_string(),
            email: "john@example.com".to_string(),
            role: Role::new("developer"),
            permissions: [Permission::new("mcp:write"), Permission::new("mcp:read")]
                .into_iter()
                .collect(),
            active: true,
            last_login: None,
        }
    }

    #[test]
    fn refresh_overwrites_with_canonical_fields() {
        let now = Utc::now();
        let mut canonical = identity();
        let mut shadow = ShadowUser::project(&canonical, now);

        canonical.email = "john.doe@example.com".to_string();
        canonical.role = Role::new("admin");
        canonical.permissions.clear();
        shadow.refresh_from(&canonical, now);

        assert_eq!(shadow.email, "john.doe@example.com");
        assert_eq!(shadow.role.as_str(), "admin");
        assert!(shadow.permissions.is_empty());
        assert_eq!(shadow.created_at, now);
    }

    #[test]
    fn permissions_header_is_sorted_and_comma_joined() {
        let shadow = ShadowUser::project(&identity(), Utc::now());
        assert_eq!(shadow.profile().permissions_header(), "mcp:read,mcp:write");
    }
}

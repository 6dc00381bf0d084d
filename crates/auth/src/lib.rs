//! `tollgate-auth`: pure authentication boundary.
//!
//! Token encoding, claims, password verification and the error taxonomy live
//! here. This crate is intentionally decoupled from HTTP and storage.

pub mod claims;
pub mod codec;
pub mod config;
pub mod error;
pub mod identity;
pub mod password;

pub use claims::{AccessClaims, RefreshClaims, TokenClaims, TokenType, TokenWindowError, validate_window};
pub use codec::{CodecError, IssuedToken, TokenCodec, hash_token};
pub use config::{AuthConfig, ProjectionSource, RetryPolicy, SigningAlgorithm, SigningSecret};
pub use error::AuthError;
pub use identity::{Identity, Permission, PermissionSet, Role, ShadowUser, UserProfile};
pub use password::PasswordVerifier;

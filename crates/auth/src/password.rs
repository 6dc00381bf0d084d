//! Password verification with uniform cost.
//!
//! New hashes are Argon2id PHC strings. The canonical directory also holds
//! bcrypt hashes (`$2a$`, `$2b$`, `$2y$`), which are verified as-is.
//!
//! Every call to [`PasswordVerifier::verify`] performs exactly one hash
//! verification, whether or not the account exists, so response time does not
//! reveal which usernames are registered.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHasher, SaltString};
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordVerifier as _, Version};

use tollgate_core::{DomainError, DomainResult};

#[derive(Clone)]
pub struct PasswordVerifier {
    argon2: Argon2<'static>,
    /// Verified against when there is no real hash to check.
    dummy_hash: String,
    /// Hashes actually computed by `verify`, shared by every clone.
    verifications: Arc<AtomicU64>,
}

impl PasswordVerifier {
    pub fn new() -> DomainResult<Self> {
        Self::from_argon2(Argon2::default())
    }

    /// Custom cost parameters (memory KiB, iterations, parallelism).
    pub fn with_params(m_cost: u32, t_cost: u32, p_cost: u32) -> DomainResult<Self> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|e| DomainError::validation(format!("invalid argon2 params: {e}")))?;
        Self::from_argon2(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    fn from_argon2(argon2: Argon2<'static>) -> DomainResult<Self> {
        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = argon2
            .hash_password(b"tollgate-dummy-password", &salt)
            .map_err(|e| DomainError::validation(format!("argon2 hashing failed: {e}")))?
            .to_string();
        Ok(Self {
            argon2,
            dummy_hash,
            verifications: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Produce a PHC string for `password`.
    pub fn hash(&self, password: &str) -> DomainResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|e| DomainError::validation(format!("argon2 hashing failed: {e}")))
    }

    /// Check `password` against `stored`. A missing or unparseable hash is
    /// verified against the dummy hash and always yields `false`.
    pub fn verify(&self, password: &str, stored: Option<&str>) -> bool {
        if let Some(hash) = stored.filter(|h| is_bcrypt(h)) {
            return match bcrypt::verify(password, hash) {
                Ok(matches) => {
                    self.verifications.fetch_add(1, Ordering::Relaxed);
                    matches
                }
                Err(e) => {
                    // Rejected before any hashing ran.
                    tracing::warn!(error = %e, "stored bcrypt hash is malformed");
                    self.verify_dummy(password);
                    false
                }
            };
        }

        match stored.and_then(|h| PasswordHash::new(h).ok()) {
            Some(hash) => self.verify_argon2(password, &hash),
            None => {
                self.verify_dummy(password);
                false
            }
        }
    }

    fn verify_argon2(&self, password: &str, hash: &PasswordHash<'_>) -> bool {
        self.verifications.fetch_add(1, Ordering::Relaxed);
        self.argon2.verify_password(password.as_bytes(), hash).is_ok()
    }

    fn verify_dummy(&self, password: &str) {
        if let Ok(dummy) = PasswordHash::new(&self.dummy_hash) {
            let _ = self.verify_argon2(password, &dummy);
        }
    }

    /// Total verifications run by this verifier and its clones.
    pub fn verifications(&self) -> u64 {
        self.verifications.load(Ordering::Relaxed)
    }
}

fn is_bcrypt(hash: &str) -> bool {
    ["$2a$", "$2b$", "$2y$"].iter().any(|p| hash.starts_with(p))
}

impl core::fmt::Debug for PasswordVerifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PasswordVerifier").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cheap() -> PasswordVerifier {
        PasswordVerifier::with_params(1024, 1, 1).unwrap()
    }

    #[test]
    fn correct_password_verifies() {
        let verifier = cheap();
        let hash = verifier.hash("correct horse").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verifier.verify("correct horse", Some(&hash)));
        assert!(!verifier.verify("battery staple", Some(&hash)));
    }

    #[test]
    fn missing_or_corrupt_hash_never_verifies() {
        let verifier = cheap();
        assert!(!verifier.verify("anything", None));
        assert!(!verifier.verify("anything", Some("not-a-phc-string")));
        assert!(!verifier.verify("tollgate-dummy-password", None));
    }

    #[test]
    fn bcrypt_hashes_from_the_directory_verify() {
        let verifier = cheap();
        let stored = "$2a$05$CCCCCCCCCCCCCCCCCCCCC.E5YPO9kmyuRGyh0XouQYb4YMJKvyOeW";
        assert!(verifier.verify("U*U", Some(stored)));
        assert!(!verifier.verify("U*V", Some(stored)));

        let stored_2b = bcrypt::hash_with_salt("s3cret", 4, [7u8; 16]).unwrap().format_for_version(bcrypt::Version::TwoB);
        assert!(verifier.verify("s3cret", Some(&stored_2b)));
        assert!(!verifier.verify("s3cret", Some("$2b$04$truncated")));
    }

    #[test]
    fn every_path_runs_exactly_one_verification() {
        let verifier = cheap();
        let argon = verifier.hash("pw").unwrap();
        let clone = verifier.clone();

        verifier.verify("pw", Some(&argon));
        assert_eq!(clone.verifications(), 1);
        verifier.verify("wrong", Some(&argon));
        assert_eq!(clone.verifications(), 2);
        verifier.verify("pw", None);
        assert_eq!(clone.verifications(), 3);
        verifier.verify("pw", Some("not-a-phc-string"));
        assert_eq!(clone.verifications(), 4);
        verifier.verify("U*U", Some("$2a$05$CCCCCCCCCCCCCCCCCCCCC.E5YPO9kmyuRGyh0XouQYb4YMJKvyOeW"));
        assert_eq!(clone.verifications(), 5);
        verifier.verify("U*U", Some("$2b$04$truncated"));
        assert_eq!(clone.verifications(), 6);
    }

    #[test]
    fn invalid_params_are_rejected() {
        assert!(PasswordVerifier::with_params(0, 0, 0).is_err());
    }
}

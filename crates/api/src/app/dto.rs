use serde::{Deserialize, Serialize};

use tollgate_infra::ValidatedUser;

// -------------------------
// Request DTOs
// -------------------------

#[derive(Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

// Hand-written so the password never reaches a log line.
impl core::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct RevokeRequest {
    pub refresh_token: Option<String>,
    pub session_id: Option<String>,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub user_id: String,
    pub username: String,
    pub role: String,
}

impl From<&ValidatedUser> for ValidateResponse {
    fn from(user: &ValidatedUser) -> Self {
        Self {
            valid: true,
            user_id: user.profile.user_id.to_string(),
            username: user.profile.username.clone(),
            role: user.profile.role.to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RevokeResponse {
    pub revoked: bool,
}

#[derive(Debug, Serialize)]
pub struct LogoutResponse {
    pub logged_out: bool,
}

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, rejection::JsonRejection},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::IntoResponse,
};

use tollgate_core::SessionId;
use tollgate_infra::{AuthOrchestrator, RevokeTarget, ValidatedUser};

use crate::app::{dto, errors};
use crate::middleware::{client_info, extract_bearer};

pub const X_USER_ID: &str = "x-user-id";
pub const X_USER_EMAIL: &str = "x-user-email";
pub const X_USER_ROLE: &str = "x-user-role";
pub const X_USER_PERMISSIONS: &str = "x-user-permissions";
pub const X_USER_USERNAME: &str = "x-user-username";

pub async fn login(
    Extension(auth): Extension<Arc<AuthOrchestrator>>,
    headers: HeaderMap,
    body: Result<Json<dto::LoginRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_request(rejection),
    };

    if body.username.trim().is_empty() || body.password.is_empty() {
        return errors::json_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "username and password are required",
        );
    }

    match auth
        .login(body.username.trim(), &body.password, &client_info(&headers))
        .await
    {
        Ok(pair) => (StatusCode::OK, Json(pair)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// Forward-auth check. On success the projected identity travels back to the
/// proxy as `X-User-*` headers.
pub async fn validate(
    Extension(auth): Extension<Arc<AuthOrchestrator>>,
    headers: HeaderMap,
) -> axum::response::Response {
    let token = match extract_bearer(&headers) {
        Ok(t) => t,
        Err(e) => return errors::deny_to_response(e),
    };

    match auth.validate(token).await {
        Ok(user) => {
            let body = dto::ValidateResponse::from(&user);
            (StatusCode::OK, identity_headers(&user), Json(body)).into_response()
        }
        Err(e) => errors::deny_to_response(e),
    }
}

pub async fn refresh(
    Extension(auth): Extension<Arc<AuthOrchestrator>>,
    body: Result<Json<dto::RefreshRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_request(rejection),
    };

    match auth.refresh(body.refresh_token.trim()).await {
        Ok(pair) => (StatusCode::OK, Json(pair)).into_response(),
        Err(e) => errors::auth_error_to_response(e),
    }
}

/// Revocation never tells the caller whether the target was valid; only a
/// failed store write surfaces as an error.
pub async fn revoke(
    Extension(auth): Extension<Arc<AuthOrchestrator>>,
    body: Result<Json<dto::RevokeRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return bad_request(rejection),
    };

    let refresh_token = body.refresh_token.filter(|t| !t.trim().is_empty());
    let session_id = body.session_id.filter(|s| !s.trim().is_empty());

    let target = match (refresh_token, session_id) {
        (Some(token), _) => RevokeTarget::RefreshToken(token.trim().to_string()),
        (None, Some(raw)) => match raw.trim().parse::<SessionId>() {
            Ok(sid) => RevokeTarget::Session(sid),
            Err(_) => {
                tracing::debug!("revoke with unparseable session id");
                return revoked(false);
            }
        },
        (None, None) => {
            return errors::json_error(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                "refresh_token or session_id is required",
            );
        }
    };

    match auth.revoke(target).await {
        Ok(outcome) => revoked(outcome.revoked),
        Err(e) => errors::auth_error_to_response(e),
    }
}

pub async fn logout(
    Extension(auth): Extension<Arc<AuthOrchestrator>>,
    headers: HeaderMap,
) -> axum::response::Response {
    let result = match extract_bearer(&headers) {
        Ok(token) => auth.logout(token).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(_) => logged_out(true),
        Err(e) if e.is_credential_failure() => {
            tracing::debug!(kind = e.kind(), "logout with unusable token");
            logged_out(false)
        }
        Err(e) => errors::auth_error_to_response(e),
    }
}

fn identity_headers(user: &ValidatedUser) -> HeaderMap {
    let profile = &user.profile;
    let values = [
        (X_USER_ID, profile.user_id.to_string()),
        (X_USER_EMAIL, profile.email.clone()),
        (X_USER_ROLE, profile.role.to_string()),
        (X_USER_PERMISSIONS, profile.permissions_header()),
        (X_USER_USERNAME, profile.username.clone()),
    ];

    let mut headers = HeaderMap::with_capacity(values.len());
    for (name, value) in values {
        match HeaderValue::from_str(&value) {
            Ok(v) => {
                headers.insert(HeaderName::from_static(name), v);
            }
            Err(_) => tracing::warn!(header = name, "identity value is not a valid header; omitted"),
        }
    }
    headers
}

fn revoked(revoked: bool) -> axum::response::Response {
    (StatusCode::OK, Json(dto::RevokeResponse { revoked })).into_response()
}

fn logged_out(logged_out: bool) -> axum::response::Response {
    (StatusCode::OK, Json(dto::LogoutResponse { logged_out })).into_response()
}

fn bad_request(rejection: JsonRejection) -> axum::response::Response {
    errors::json_error(StatusCode::BAD_REQUEST, "invalid_request", rejection.body_text())
}

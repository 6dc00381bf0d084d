use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use tollgate_auth::AuthError;

/// The one body every credential or token failure produces.
pub const UNAUTHORIZED_MESSAGE: &str = "invalid or expired credentials";

/// Map an orchestrator failure to a response.
///
/// Every credential/token failure collapses into the same 401 so callers
/// cannot tell which check failed; the precise kind is only logged.
pub fn auth_error_to_response(err: AuthError) -> axum::response::Response {
    log_failure(&err);
    match err {
        AuthError::AccountDisabled => {
            json_error(StatusCode::FORBIDDEN, "account_disabled", "account is disabled")
        }
        AuthError::UpstreamUnavailable(_) | AuthError::SyncFailed(_) => service_unavailable(),
        AuthError::Internal(_) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "internal error",
        ),
        _ => unauthorized(),
    }
}

/// Forward-auth variant: anything short of an outage is a plain deny.
pub fn deny_to_response(err: AuthError) -> axum::response::Response {
    log_failure(&err);
    match err {
        AuthError::UpstreamUnavailable(_) | AuthError::SyncFailed(_) | AuthError::Internal(_) => {
            service_unavailable()
        }
        _ => unauthorized(),
    }
}

pub fn unauthorized() -> axum::response::Response {
    json_error(StatusCode::UNAUTHORIZED, "unauthorized", UNAUTHORIZED_MESSAGE)
}

pub fn service_unavailable() -> axum::response::Response {
    json_error(
        StatusCode::SERVICE_UNAVAILABLE,
        "service_unavailable",
        "authentication backend unavailable, try again later",
    )
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

fn log_failure(err: &AuthError) {
    if err.is_credential_failure() {
        tracing::info!(kind = err.kind(), "request rejected");
    } else {
        tracing::warn!(kind = err.kind(), error = %err, "request failed");
    }
}

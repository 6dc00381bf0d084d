//! Request header helpers shared by the handlers.

use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, USER_AGENT};

use tollgate_auth::AuthError;
use tollgate_infra::ClientInfo;

/// Pull the token out of `Authorization: Bearer <token>`.
pub fn extract_bearer(headers: &HeaderMap) -> Result<&str, AuthError> {
    let header = headers.get(AUTHORIZATION).ok_or(AuthError::MissingToken)?;

    let header = header
        .to_str()
        .map_err(|_| AuthError::malformed("authorization header is not valid ascii"))?;

    let header = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .ok_or(AuthError::MissingToken)?;

    let token = header.trim();
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }

    Ok(token)
}

/// Caller metadata for session rows and audit events. Behind a proxy the
/// first `X-Forwarded-For` hop is the client.
pub fn client_info(headers: &HeaderMap) -> ClientInfo {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    let ip_address = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| header("x-real-ip"))
        .map(str::to_string);

    ClientInfo {
        user_agent: header(USER_AGENT.as_str()).map(str::to_string),
        ip_address,
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_static(v));
        }
        map
    }

    #[test]
    fn bearer_token_is_extracted_and_trimmed() {
        let h = headers(&[("authorization", "Bearer  abc.def.ghi ")]);
        assert_eq!(extract_bearer(&h).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn missing_or_non_bearer_header_is_missing_token() {
        assert_eq!(extract_bearer(&HeaderMap::new()).unwrap_err(), AuthError::MissingToken);
        let h = headers(&[("authorization", "Basic dXNlcjpwdw==")]);
        assert_eq!(extract_bearer(&h).unwrap_err(), AuthError::MissingToken);
        let h = headers(&[("authorization", "Bearer   ")]);
        assert_eq!(extract_bearer(&h).unwrap_err(), AuthError::MissingToken);
    }

    #[test]
    fn client_ip_prefers_first_forwarded_hop() {
        let h = headers(&[
            ("x-forwarded-for", "203.0.113.9, 10.0.0.1"),
            ("x-real-ip", "10.0.0.1"),
            ("user-agent", "curl/8.0"),
        ]);
        let info = client_info(&h);
        assert_eq!(info.ip_address.as_deref(), Some("203.0.113.9"));
        assert_eq!(info.user_agent.as_deref(), Some("curl/8.0"));

        let info = client_info(&headers(&[("x-real-ip", "198.51.100.4")]));
        assert_eq!(info.ip_address.as_deref(), Some("198.51.100.4"));
    }
}

//! # Authentication Module
//!
//! Every route except `/health` needs a bearer token. The service does not
//! validate tokens itself: it forwards them to the permission search and the
//! import services, which reject unknown tokens.
//!
//! The one exception is `POST /invalidations`: with `invalidation_token`
//! configured, only that token may publish.
//!
//! ```text
//! Authorization: Bearer <token>
//! ```

use super::types::ApiError;
use axum::{
    body::Body,
    http::{Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use device_selection_core::SelectionError;
use subtle::ConstantTimeEq;

/// The caller's bearer token, available to handlers as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token(pub String);

/// Extract the token from an `Authorization` header value.
///
/// Accepts `Bearer <token>` (scheme case-insensitive) and a bare token.
#[must_use]
pub fn parse_bearer(value: &str) -> Option<&str> {
    let value = value.trim();
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        Some(_) => return None,
        None => value,
    };
    (!token.is_empty()).then_some(token)
}

/// Constant-time token comparison. Both sides are padded to the same
/// length so the comparison time does not depend on where they differ.
#[must_use]
pub fn tokens_match(provided: &str, expected: &str) -> bool {
    let (provided, expected) = (provided.as_bytes(), expected.as_bytes());
    let max_len = provided.len().max(expected.len());
    let mut padded_provided = vec![0u8; max_len];
    let mut padded_expected = vec![0u8; max_len];
    padded_provided[..provided.len()].copy_from_slice(provided);
    padded_expected[..expected.len()].copy_from_slice(expected);

    let bytes_match: bool = padded_provided.ct_eq(&padded_expected).into();
    bytes_match && provided.len() == expected.len()
}

/// Bearer token middleware.
pub async fn bearer_auth_middleware(mut request: Request<Body>, next: Next) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_bearer)
        .map(str::to_string);

    match token {
        Some(token) => {
            request.extensions_mut().insert(Token(token));
            next.run(request).await
        }
        None => {
            tracing::warn!(
                event = "auth_failure",
                reason = "missing_authorization_header",
                path = %request.uri().path(),
                "Missing bearer token"
            );
            ApiError(SelectionError::Unauthorized("missing bearer token".into())).into_response()
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_values() {
        assert_eq!(parse_bearer("Bearer abc"), Some("abc"));
        assert_eq!(parse_bearer("bearer  abc "), Some("abc"));
        assert_eq!(parse_bearer("abc"), Some("abc"));
        assert_eq!(parse_bearer("Basic abc"), None);
        assert_eq!(parse_bearer("Bearer "), None);
        assert_eq!(parse_bearer(""), None);
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_match("admin-secret", "admin-secret"));
        assert!(!tokens_match("admin-secre", "admin-secret"));
        assert!(!tokens_match("admin-secret-", "admin-secret"));
        assert!(!tokens_match("", "admin-secret"));
    }
}

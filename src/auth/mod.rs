pub mod cookie;
pub mod middleware;
pub mod verifier;

use crate::config::CredentialSource;
use crate::error::{AuthError, Result};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use secrecy::{Secret, SecretString};

pub use middleware::{forward_auth_middleware, ForwardAuth};
pub use verifier::HttpVerifier;

/// Identity asserted to downstream handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Email address written to the identity header
    pub email: String,
    /// How the identity was obtained
    pub method: AuthMethodType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethodType {
    /// Returned by the verification endpoint
    Verified,
    /// Operator-configured, never verified
    StaticBypass,
}

/// Read the caller's credential from the configured source.
///
/// An absent source, an `Authorization` header without the exact `Bearer `
/// prefix, and an empty token all yield [`AuthError::MissingCredentials`].
pub fn extract_credential(headers: &HeaderMap, source: &CredentialSource) -> Result<SecretString> {
    let token = match source {
        CredentialSource::Cookie { name } => cookie::find(headers, name),
        CredentialSource::Bearer => bearer_token(headers).map(str::to_string),
    };

    match token {
        Some(token) if !token.is_empty() => Ok(Secret::new(token)),
        _ => Err(AuthError::MissingCredentials),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header::COOKIE, HeaderValue};
    use secrecy::ExposeSecret;

    fn haatc() -> CredentialSource {
        CredentialSource::Cookie {
            name: "haatc".to_string(),
        }
    }

    #[test]
    fn test_extract_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("theme=dark; haatc=abc123"));

        let token = extract_credential(&headers, &haatc()).unwrap();
        assert_eq!(token.expose_secret(), "abc123");
    }

    #[test]
    fn test_missing_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("auth_token=abc123"));

        assert!(matches!(
            extract_credential(&headers, &haatc()),
            Err(AuthError::MissingCredentials)
        ));
        assert!(matches!(
            extract_credential(&HeaderMap::new(), &haatc()),
            Err(AuthError::MissingCredentials)
        ));
    }

    #[test]
    fn test_empty_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("haatc="));

        assert!(extract_credential(&headers, &haatc()).is_err());
    }

    #[test]
    fn test_extract_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok-1"));

        let token = extract_credential(&headers, &CredentialSource::Bearer).unwrap();
        assert_eq!(token.expose_secret(), "tok-1");
    }

    #[test]
    fn test_bearer_prefix_is_exact() {
        for value in ["bearer tok-1", "Basic dXNlcjpwYXNz", "Bearertok-1", "Bearer "] {
            let mut headers = HeaderMap::new();
            headers.insert(AUTHORIZATION, HeaderValue::from_static(value));
            assert!(
                extract_credential(&headers, &CredentialSource::Bearer).is_err(),
                "{} should be rejected",
                value
            );
        }
    }

    #[test]
    fn test_sources_are_not_combined() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok-1"));
        assert!(extract_credential(&headers, &haatc()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("haatc=abc123"));
        assert!(extract_credential(&headers, &CredentialSource::Bearer).is_err());
    }
}

/* src/auth.rs */

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use std::collections::HashSet;

/// Claims we read out of an accepted bearer token.
#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[serde(default)]
    roles: Vec<String>,
    exp: i64,
}

/// Verified identity, attached to the request as an extension.
#[derive(Debug, Clone)]
pub struct Principal {
    pub subject: String,
    pub roles: HashSet<String>,
    pub expires_at: DateTime<Utc>,
}

/// Validates HMAC-signed bearer tokens against the shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);
        // No clock skew allowance: an expired token is expired.
        validation.leeway = 0;
        TokenVerifier {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Checks signature and expiry, returning the identity the token proves.
    pub fn verify(&self, token: &str) -> Result<Principal> {
        let data =
            decode::<Claims>(token, &self.key, &self.validation).context("token rejected")?;
        let expires_at =
            DateTime::from_timestamp(data.claims.exp, 0).context("token expiry out of range")?;

        Ok(Principal {
            subject: data.claims.sub,
            roles: data.claims.roles.into_iter().collect(),
            expires_at,
        })
    }
}

/// Extracts the token from an `Authorization: Bearer ...` header, if any.
pub fn bearer_token(headers: &http::HeaderMap) -> Option<&str> {
    headers
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::{HeaderMap, HeaderValue};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use serde_json::json;

    const SECRET: &str = "unit-test-secret";

    fn mint(claims: &serde_json::Value, secret: &str) -> String {
        encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn future_exp() -> i64 {
        Utc::now().timestamp() + 600
    }

    #[test]
    fn accepts_a_well_formed_token() {
        let token = mint(
            &json!({ "sub": "alice", "roles": ["admin", "user"], "exp": future_exp() }),
            SECRET,
        );

        let principal = TokenVerifier::new(SECRET).verify(&token).unwrap();
        assert_eq!(principal.subject, "alice");
        assert!(principal.roles.contains("admin"));
        assert!(principal.roles.contains("user"));
        assert!(principal.expires_at > Utc::now());
    }

    #[test]
    fn roles_are_optional() {
        let token = mint(&json!({ "sub": "bob", "exp": future_exp() }), SECRET);

        let principal = TokenVerifier::new(SECRET).verify(&token).unwrap();
        assert_eq!(principal.subject, "bob");
        assert!(principal.roles.is_empty());
    }

    #[test]
    fn rejects_a_token_signed_with_another_secret() {
        let token = mint(&json!({ "sub": "alice", "exp": future_exp() }), "other");
        assert!(TokenVerifier::new(SECRET).verify(&token).is_err());
    }

    #[test]
    fn rejects_an_expired_token() {
        let expired = Utc::now().timestamp() - 7200;
        let token = mint(&json!({ "sub": "alice", "exp": expired }), SECRET);
        assert!(TokenVerifier::new(SECRET).verify(&token).is_err());
    }

    #[test]
    fn rejects_a_token_without_a_subject() {
        let token = mint(&json!({ "exp": future_exp() }), SECRET);
        assert!(TokenVerifier::new(SECRET).verify(&token).is_err());
    }

    #[test]
    fn rejects_garbage_tokens() {
        assert!(TokenVerifier::new(SECRET).verify("not.a.token").is_err());
        assert!(TokenVerifier::new(SECRET).verify("").is_err());
    }

    #[test]
    fn bearer_token_requires_the_bearer_scheme() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Basic dXNlcjpwYXNz"),
        );
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(bearer_token(&headers), Some("abc.def.ghi"));
    }
}

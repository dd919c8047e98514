//! Token issuing and request authorization.

use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use regex::Regex;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, trace};

use super::config::{AuthConfig, TokenMethod};

/// Authentication and authorization failures.
///
/// The display text of the client-facing variants is sent verbatim in the
/// `WWW-Authenticate` header.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("User name or secret is invalid")]
    InvalidCredentials,
    #[error("Invalid authentication request format")]
    InvalidRequestFormat,
    #[error("Invalid token specified")]
    InvalidToken,
    #[error("Token is expired")]
    TokenExpired,
    #[error("User doesn't have required permissions")]
    InsufficientScope,
    #[error("failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

impl AuthError {
    /// Whether the error is a 401 for the client rather than a server fault.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        !matches!(self, Self::Signing(_))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    name: String,
    iat: u64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Credentials {
    name: String,
    secret: String,
}

/// Body returned by a successful `POST /authenticate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub jwt: String,
    pub method: String,
    pub expires_in: u64,
}

struct User {
    name: String,
    secret: String,
    scope: Vec<Regex>,
}

impl User {
    fn permits(&self, required: &str) -> bool {
        self.scope.iter().any(|pattern| pattern.is_match(required))
    }
}

/// Issues HMAC-signed tokens to configured users and checks them on requests.
pub struct JwtAuthenticator {
    users: Vec<User>,
    algorithm: Algorithm,
    encoding: EncodingKey,
    decoding: DecodingKey,
    expiration_time: u64,
    method: TokenMethod,
}

impl JwtAuthenticator {
    /// Compiles every user's scope patterns.
    ///
    /// # Errors
    ///
    /// Returns the first scope pattern that is not a valid regular expression.
    pub fn new(config: &AuthConfig) -> Result<Self, regex::Error> {
        let users = config
            .users
            .iter()
            .map(|user| {
                Ok(User {
                    name: user.name.clone(),
                    secret: user.secret.clone(),
                    scope: user
                        .scope
                        .iter()
                        .map(|pattern| Regex::new(pattern))
                        .collect::<Result<_, _>>()?,
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            users,
            algorithm: config.algorithm.into(),
            encoding: EncodingKey::from_secret(config.decode_key.as_bytes()),
            decoding: DecodingKey::from_secret(config.decode_key.as_bytes()),
            expiration_time: config.expiration_time,
            method: config.method,
        })
    }

    /// The gate only applies when at least one user is configured.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.users.is_empty()
    }

    /// Exchanges a `{"name", "secret"}` body for a signed token.
    ///
    /// # Errors
    ///
    /// - `InvalidRequestFormat` unless the body is exactly those two strings.
    /// - `InvalidCredentials` for an unknown user or wrong secret.
    pub fn authenticate(&self, body: &[u8]) -> Result<TokenResponse, AuthError> {
        let credentials: Credentials =
            serde_json::from_slice(body).map_err(|_| AuthError::InvalidRequestFormat)?;

        let user = self
            .users
            .iter()
            .find(|user| user.name == credentials.name)
            .filter(|user| {
                bool::from(user.secret.as_bytes().ct_eq(credentials.secret.as_bytes()))
            })
            .ok_or(AuthError::InvalidCredentials)?;

        let jwt = self.issue(&user.name, now_secs())?;
        debug!(user = %user.name, "issued access token");
        Ok(TokenResponse {
            jwt,
            method: self.method.as_str().to_string(),
            expires_in: self.expiration_time,
        })
    }

    /// Checks `authorization` (raw token or `Bearer <token>`) against the
    /// permission string `"<METHOD> <path>"`.
    ///
    /// # Errors
    ///
    /// `InvalidToken`, `TokenExpired` or `InsufficientScope`.
    pub fn authorize(&self, authorization: Option<&str>, required: &str) -> Result<(), AuthError> {
        let raw = authorization.ok_or(AuthError::InvalidToken)?.trim();
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();

        let mut validation = Validation::new(self.algorithm);
        validation.validate_exp = false;
        validation.required_spec_claims.clear();

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map_err(|error| {
                trace!(error = %error, "token rejected");
                AuthError::InvalidToken
            })?
            .claims;

        if claims.name.is_empty() {
            return Err(AuthError::InvalidToken);
        }
        if now_secs() >= claims.iat.saturating_add(self.expiration_time) {
            trace!(user = %claims.name, "expired token submitted");
            return Err(AuthError::TokenExpired);
        }

        let user = self
            .users
            .iter()
            .find(|user| user.name == claims.name)
            .ok_or(AuthError::InvalidToken)?;

        if user.permits(required) {
            Ok(())
        } else {
            trace!(user = %user.name, required, "insufficient scope");
            Err(AuthError::InsufficientScope)
        }
    }

    /// Signs a token for `name` issued at `iat` (Unix seconds).
    pub(crate) fn issue(&self, name: &str, iat: u64) -> Result<String, AuthError> {
        let claims = Claims {
            name: name.to_string(),
            iat,
        };
        Ok(encode(&Header::new(self.algorithm), &claims, &self.encoding)?)
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::config::{JwtAlgorithm, UserConfig};

    fn config() -> AuthConfig {
        AuthConfig {
            algorithm: JwtAlgorithm::Hs512,
            decode_key: "some-very-secure-key".to_string(),
            users: vec![
                UserConfig {
                    name: "admin".to_string(),
                    secret: "not-same-as-name".to_string(),
                    scope: vec![".*".to_string()],
                },
                UserConfig {
                    name: "put-all".to_string(),
                    secret: "put-secret".to_string(),
                    scope: vec!["PUT .*".to_string()],
                },
            ],
            ..AuthConfig::default()
        }
    }

    fn token_for(auth: &JwtAuthenticator, body: &str) -> String {
        auth.authenticate(body.as_bytes()).unwrap().jwt
    }

    #[test]
    fn authenticate_issues_header_token() {
        let auth = JwtAuthenticator::new(&config()).unwrap();
        let response = auth
            .authenticate(br#"{"name": "admin", "secret": "not-same-as-name"}"#)
            .unwrap();
        assert_eq!(response.method, "header");
        assert_eq!(response.expires_in, 3600);
        assert_eq!(response.jwt.split('.').count(), 3);
    }

    #[test]
    fn wrong_secret_or_user_is_invalid_credentials() {
        let auth = JwtAuthenticator::new(&config()).unwrap();
        for body in [
            r#"{"name": "admin", "secret": "wrong"}"#,
            r#"{"name": "nobody", "secret": "not-same-as-name"}"#,
        ] {
            let err = auth.authenticate(body.as_bytes()).unwrap_err();
            assert_eq!(err.to_string(), "User name or secret is invalid");
        }
    }

    #[test]
    fn malformed_body_is_invalid_format() {
        let auth = JwtAuthenticator::new(&config()).unwrap();
        for body in [
            "not json",
            r#"{"name": "admin"}"#,
            r#"{"name": "admin", "secret": 5}"#,
            r#"{"name": "admin", "secret": "not-same-as-name", "extra": 1}"#,
        ] {
            let err = auth.authenticate(body.as_bytes()).unwrap_err();
            assert_eq!(err.to_string(), "Invalid authentication request format");
        }
    }

    #[test]
    fn admin_scope_passes_everything() {
        let auth = JwtAuthenticator::new(&config()).unwrap();
        let token = token_for(&auth, r#"{"name": "admin", "secret": "not-same-as-name"}"#);
        assert!(auth.authorize(Some(&token), "GET /endpoints").is_ok());
        let bearer = format!("Bearer {token}");
        assert!(auth.authorize(Some(&bearer), "DELETE /notification/callback").is_ok());
    }

    #[test]
    fn restricted_scope_fails_listing() {
        let auth = JwtAuthenticator::new(&config()).unwrap();
        let token = token_for(&auth, r#"{"name": "put-all", "secret": "put-secret"}"#);
        assert!(auth.authorize(Some(&token), "PUT /subscriptions/dev1/3/0/0").is_ok());
        let err = auth.authorize(Some(&token), "GET /endpoints").unwrap_err();
        assert_eq!(err.to_string(), "User doesn't have required permissions");
    }

    #[test]
    fn missing_or_garbage_token_is_invalid() {
        let auth = JwtAuthenticator::new(&config()).unwrap();
        assert!(matches!(
            auth.authorize(None, "GET /endpoints"),
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            auth.authorize(Some("Bearer abc.def.ghi"), "GET /endpoints"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn token_signed_with_other_key_is_invalid() {
        let auth = JwtAuthenticator::new(&config()).unwrap();
        let other = JwtAuthenticator::new(&AuthConfig {
            decode_key: "other-key".to_string(),
            ..config()
        })
        .unwrap();
        let token = other.issue("admin", now_secs()).unwrap();
        assert!(matches!(
            auth.authorize(Some(&token), "GET /endpoints"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn expired_token_is_rejected() {
        let auth = JwtAuthenticator::new(&config()).unwrap();
        let token = auth.issue("admin", now_secs() - 3600).unwrap();
        let err = auth.authorize(Some(&token), "GET /endpoints").unwrap_err();
        assert_eq!(err.to_string(), "Token is expired");
    }

    #[test]
    fn token_for_removed_user_is_invalid() {
        let auth = JwtAuthenticator::new(&config()).unwrap();
        let token = auth.issue("ghost", now_secs()).unwrap();
        assert!(matches!(
            auth.authorize(Some(&token), "GET /endpoints"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn invalid_scope_pattern_fails_construction() {
        let mut bad = config();
        bad.users[0].scope = vec!["(".to_string()];
        assert!(JwtAuthenticator::new(&bad).is_err());
    }

    #[test]
    fn gate_disabled_without_users() {
        let auth = JwtAuthenticator::new(&AuthConfig::default()).unwrap();
        assert!(!auth.is_enabled());
        assert!(JwtAuthenticator::new(&config()).unwrap().is_enabled());
    }
}

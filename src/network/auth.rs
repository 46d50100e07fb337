//! JWT Authentication
//!
//! Validates the signed socket tokens minted by the backend. The gateway
//! does NOT issue tokens - only validates them, with a key handed in at
//! construction.

use std::collections::HashSet;

use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication configuration.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// Allowed clock skew for expiry (seconds).
    pub leeway: u64,
    /// Whether to skip expiry validation (for testing only).
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Config with the given shared secret.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            secret: Some(secret.into()),
            ..Default::default()
        }
    }

    /// Check if authentication is configured.
    pub fn is_configured(&self) -> bool {
        self.secret.as_deref().is_some_and(|s| !s.is_empty())
    }
}

/// Claims carried by a socket token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Logged-in user (`true`) or anonymous visitor (`false`).
    #[serde(rename = "a")]
    pub authenticated: bool,
    /// Display name.
    #[serde(rename = "unn")]
    pub username: String,
    /// Backend user identifier.
    #[serde(rename = "uid")]
    pub user_id: String,
    /// Expiry timestamp (Unix seconds).
    pub exp: u64,
}

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// No verification key configured on the gateway.
    #[error("authentication not configured")]
    NotConfigured,
    /// Token is not a well-formed JWT.
    #[error("invalid token format")]
    InvalidFormat,
    /// Claims are missing, mistyped, or empty.
    #[error("malformed claims: {0}")]
    MalformedClaims(String),
    /// Token signature verification failed.
    #[error("invalid signature")]
    InvalidSignature,
    /// Token has expired.
    #[error("token expired")]
    Expired,
    /// Any other JWT decoding error.
    #[error("decode error: {0}")]
    Decode(String),
}

/// Verifies socket tokens against a fixed key.
pub struct TokenVerifier {
    key: Option<DecodingKey>,
    validation: Validation,
}

impl TokenVerifier {
    /// Build a verifier from config.
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims = HashSet::from(["exp".to_string()]);
        validation.validate_aud = false;
        validation.leeway = config.leeway;
        if config.skip_expiry {
            validation.validate_exp = false;
        }

        let key = config
            .secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|s| DecodingKey::from_secret(s.as_bytes()));

        Self { key, validation }
    }

    /// Validate a token and extract its claims.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let key = self.key.as_ref().ok_or(AuthError::NotConfigured)?;

        let token_data: TokenData<TokenClaims> =
            decode(token, key, &self.validation).map_err(map_jwt_error)?;
        let claims = token_data.claims;

        if claims.user_id.is_empty() {
            return Err(AuthError::MalformedClaims("uid is empty".into()));
        }

        Ok(claims)
    }
}

/// Validate a JWT token and extract claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    TokenVerifier::new(config).verify(token)
}

/// Map JWT library errors to our error type.
fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature => AuthError::Expired,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::MissingRequiredClaim(claim) => {
            AuthError::MalformedClaims(format!("missing required claim: {}", claim))
        }
        ErrorKind::Json(e) => AuthError::MalformedClaims(e.to_string()),
        ErrorKind::InvalidToken
        | ErrorKind::Base64(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::InvalidAlgorithm => AuthError::InvalidFormat,
        _ => AuthError::Decode(err.to_string()),
    }
}

// =============================================================================
// TESTS
// =============================================================================

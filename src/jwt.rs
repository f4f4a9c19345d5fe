//! JWT token generation and validation.
//!
//! Tokens are HS256-only. The decoder is pinned to that algorithm so a token
//! signed with any other `alg` header is rejected as malformed.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Access token (8 hours) - stateless, never stored
    Access,
    /// Refresh token (7 days) - hash tracked in the database
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// Raw claims as they appear on the wire, for either token type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Email, present on access tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// JWT ID, present on refresh tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    /// Token type
    #[serde(rename = "type")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Validated access token claims.
#[derive(Debug, Clone)]
pub struct AccessClaims {
    pub sub: String,
    pub email: String,
    pub iat: u64,
    pub exp: u64,
}

/// Validated refresh token claims.
#[derive(Debug, Clone)]
pub struct RefreshClaims {
    pub jti: String,
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
}

/// Access token duration: 8 hours
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 8 * 60 * 60;

/// Refresh token duration: 7 days
pub const REFRESH_TOKEN_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

/// Result of generating an access token.
#[derive(Debug, Clone)]
pub struct AccessTokenResult {
    /// The JWT token string
    pub token: String,
    /// Token duration in seconds
    pub duration: u64,
}

/// Result of generating a refresh token.
#[derive(Debug, Clone)]
pub struct RefreshTokenResult {
    /// The JWT token string
    pub token: String,
    /// JWT ID
    pub jti: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
}

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    #[error("failed to encode token: {0}")]
    Encoding(jsonwebtoken::errors::Error),
    #[error("token has expired")]
    Expired,
    #[error("invalid token signature")]
    InvalidSignature,
    #[error("malformed token: {0}")]
    Malformed(String),
    #[error("wrong token type: expected {expected}")]
    WrongTokenType { expected: &'static str },
    #[error("system time error")]
    TimeError,
}

pub(crate) fn now_secs() -> Result<u64, JwtError> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| JwtError::TimeError)?
        .as_secs())
}

impl JwtConfig {
    /// Create a new JWT configuration with the given secret.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Generate an access token for a user.
    pub fn generate_access_token(
        &self,
        user_id: &str,
        email: &str,
    ) -> Result<AccessTokenResult, JwtError> {
        let now = now_secs()?;

        let claims = Claims {
            sub: user_id.to_string(),
            email: Some(email.to_string()),
            jti: None,
            token_type: TokenType::Access,
            iat: now,
            exp: now + ACCESS_TOKEN_DURATION_SECS,
        };

        Ok(AccessTokenResult {
            token: self.encode(&claims)?,
            duration: ACCESS_TOKEN_DURATION_SECS,
        })
    }

    /// Generate a refresh token for a user.
    pub fn generate_refresh_token(&self, user_id: &str) -> Result<RefreshTokenResult, JwtError> {
        let now = now_secs()?;
        let jti = uuid::Uuid::new_v4().to_string();
        let exp = now + REFRESH_TOKEN_DURATION_SECS;

        let claims = Claims {
            sub: user_id.to_string(),
            email: None,
            jti: Some(jti.clone()),
            token_type: TokenType::Refresh,
            iat: now,
            exp,
        };

        Ok(RefreshTokenResult {
            token: self.encode(&claims)?,
            jti,
            issued_at: now,
            expires_at: exp,
        })
    }

    /// Sign claims with the fixed algorithm.
    pub fn encode(&self, claims: &Claims) -> Result<String, JwtError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(JwtError::Encoding)
    }

    /// Verify signature and expiry and return the raw claims.
    pub fn decode(&self, token: &str) -> Result<Claims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                ErrorKind::InvalidSignature => JwtError::InvalidSignature,
                _ => JwtError::Malformed(e.to_string()),
            })
    }

    /// Validate and decode an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let claims = self.decode(token)?;

        if claims.token_type != TokenType::Access {
            return Err(JwtError::WrongTokenType {
                expected: TokenType::Access.as_str(),
            });
        }

        let email = claims
            .email
            .ok_or_else(|| JwtError::Malformed("access token without email".into()))?;

        Ok(AccessClaims {
            sub: claims.sub,
            email,
            iat: claims.iat,
            exp: claims.exp,
        })
    }

    /// Validate and decode a refresh token.
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        let claims = self.decode(token)?;

        if claims.token_type != TokenType::Refresh {
            return Err(JwtError::WrongTokenType {
                expected: TokenType::Refresh.as_str(),
            });
        }

        let jti = claims
            .jti
            .ok_or_else(|| JwtError::Malformed("refresh token without jti".into()))?;

        Ok(RefreshClaims {
            jti,
            sub: claims.sub,
            iat: claims.iat,
            exp: claims.exp,
        })
    }
}

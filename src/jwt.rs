//! JWT token generation and validation.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Token type for distinguishing access vs refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    /// Access token - stateless, no JTI
    Access,
    /// Refresh token - tracked in database with JTI
    Refresh,
}

/// JWT claims for access tokens (stateless, no JTI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (user ID)
    pub sub: String,
    pub email: String,
    /// Role code
    pub role: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// JWT claims for refresh tokens (tracked with JTI).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    /// JWT ID (unique identifier for revocation tracking)
    pub jti: String,
    /// Subject (user ID)
    pub sub: String,
    #[serde(rename = "typ")]
    pub token_type: TokenType,
    pub iat: u64,
    pub exp: u64,
}

/// Default access token lifetime: 24 hours
pub const DEFAULT_ACCESS_TTL_SECS: u64 = 24 * 60 * 60;

/// Default refresh token lifetime: 7 days
pub const DEFAULT_REFRESH_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Random bytes behind each refresh token JTI.
const JTI_BYTES: usize = 32;

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_secs: u64,
    refresh_ttl_secs: u64,
}

/// Result of generating a refresh token (with JTI for tracking).
#[derive(Debug, Clone)]
pub struct RefreshTokenResult {
    pub token: String,
    /// JWT ID (unique identifier for database tracking)
    pub jti: String,
    /// Issued at timestamp (Unix seconds)
    pub issued_at: u64,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
}

impl JwtConfig {
    /// Create a new JWT configuration with the given secret and lifetimes.
    pub fn new(secret: &[u8], access_ttl_secs: u64, refresh_ttl_secs: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            access_ttl_secs,
            refresh_ttl_secs,
        }
    }

    /// Create a configuration with the default 24 hour / 7 day lifetimes.
    pub fn with_defaults(secret: &[u8]) -> Self {
        Self::new(secret, DEFAULT_ACCESS_TTL_SECS, DEFAULT_REFRESH_TTL_SECS)
    }

    pub fn access_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
    }

    pub fn refresh_ttl_secs(&self) -> u64 {
        self.refresh_ttl_secs
    }

    /// Generate a stateless access token.
    pub fn generate_access_token(
        &self,
        user_id: &str,
        email: &str,
        role: &str,
    ) -> Result<String, JwtError> {
        let now = unix_now()?;

        let claims = AccessClaims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role: role.to_string(),
            token_type: TokenType::Access,
            iat: now,
            exp: now + self.access_ttl_secs,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(JwtError::Encoding)
    }

    /// Generate a refresh token with a fresh random JTI.
    pub fn generate_refresh_token(&self, user_id: &str) -> Result<RefreshTokenResult, JwtError> {
        let now = unix_now()?;
        let jti = generate_jti();
        let exp = now + self.refresh_ttl_secs;

        let claims = RefreshClaims {
            jti: jti.clone(),
            sub: user_id.to_string(),
            token_type: TokenType::Refresh,
            iat: now,
            exp,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(JwtError::Encoding)?;

        Ok(RefreshTokenResult {
            token,
            jti,
            issued_at: now,
            expires_at: exp,
        })
    }

    /// Validate and decode an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let claims: AccessClaims = self.decode(token, true)?;
        if claims.token_type != TokenType::Access {
            return Err(JwtError::WrongTokenType);
        }
        Ok(claims)
    }

    /// Validate and decode a refresh token.
    pub fn validate_refresh_token(&self, token: &str) -> Result<RefreshClaims, JwtError> {
        let claims: RefreshClaims = self.decode(token, true)?;
        if claims.token_type != TokenType::Refresh {
            return Err(JwtError::WrongTokenType);
        }
        Ok(claims)
    }

    /// Read the JTI of a refresh token. The signature must verify, but an
    /// expired token is accepted so it can still be revoked on logout.
    pub fn extract_jti(&self, token: &str) -> Result<String, JwtError> {
        let claims: RefreshClaims = self.decode(token, false)?;
        if claims.token_type != TokenType::Refresh {
            return Err(JwtError::WrongTokenType);
        }
        Ok(claims.jti)
    }

    fn decode<T: serde::de::DeserializeOwned>(
        &self,
        token: &str,
        validate_exp: bool,
    ) -> Result<T, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = validate_exp;
        if !validate_exp {
            validation.required_spec_claims.remove("exp");
        }

        jsonwebtoken::decode::<T>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid(e),
            })
    }
}

fn unix_now() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

/// 256 random bits, URL-safe base64 encoded.
fn generate_jti() -> String {
    let mut bytes = [0u8; JTI_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Malformed, forged or otherwise undecodable token
    Invalid(jsonwebtoken::errors::Error),
    /// Signature is valid but `exp` has passed
    Expired,
    /// Wrong token type (e.g., using refresh token as access token)
    WrongTokenType,
    /// System time error
    TimeError,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Invalid(e) => write!(f, "Invalid token: {}", e),
            JwtError::Expired => write!(f, "Token expired"),
            JwtError::WrongTokenType => write!(f, "Wrong token type"),
            JwtError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for JwtError {}

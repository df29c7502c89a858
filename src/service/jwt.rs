//! Token Codec
//!
//! Signs and verifies the HS256 bearer tokens handed to clients. Access and
//! refresh tokens share one claim shape and one signing key; the `type` claim
//! tells them apart and callers check it with [`TokenCodec::expect_type`].

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::models::{Claims, TokenType};

/// Token codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Bad signature, malformed structure, or past `exp`
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token decoded fine but is the wrong kind for this use
    #[error("Wrong token type: expected {expected}, got {actual}")]
    WrongTokenType {
        expected: TokenType,
        actual: TokenType,
    },

    #[error("Token encoding failed: {0}")]
    Encoding(String),
}

/// Result type for token operations
pub type TokenResult<T> = Result<T, TokenError>;

/// Stateless encoder/decoder for signed, expiring bearer tokens
#[derive(Clone)]
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.validate_aud = false;
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Issue a token for `subject` that expires `ttl` from now
    pub fn issue(
        &self,
        subject: &str,
        ttl: Duration,
        token_type: TokenType,
        session_id: Option<i64>,
    ) -> TokenResult<String> {
        self.issue_at(Utc::now(), subject, ttl, token_type, session_id)
    }

    /// Issue a token as if the current time were `issued_at`
    pub fn issue_at(
        &self,
        issued_at: DateTime<Utc>,
        subject: &str,
        ttl: Duration,
        token_type: TokenType,
        session_id: Option<i64>,
    ) -> TokenResult<String> {
        let claims = Claims {
            sub: subject.to_string(),
            token_type,
            iat: issued_at.timestamp(),
            exp: (issued_at + ttl).timestamp(),
            sid: session_id,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    /// Verify signature and expiry and return the claims. The token type is
    /// not checked here.
    pub fn decode(&self, token: &str) -> TokenResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::InvalidToken(e.to_string()))
    }

    /// Decode and require the given token type
    pub fn decode_as(&self, token: &str, expected: TokenType) -> TokenResult<Claims> {
        let claims = self.decode(token)?;
        Self::expect_type(&claims, expected)?;
        Ok(claims)
    }

    pub fn expect_type(claims: &Claims, expected: TokenType) -> TokenResult<()> {
        if claims.token_type != expected {
            return Err(TokenError::WrongTokenType {
                expected,
                actual: claims.token_type,
            });
        }
        Ok(())
    }
}

//! Password hashing and bearer tokens.
//!
//! Passwords are Argon2id PHC strings (unique salt per hash, constant-time
//! verify). Bearer tokens are HS256-signed claims `{user_id, iss, iat, exp}`
//! under a single symmetric key; no rotation.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::config::TOKEN_ISSUER;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("token expired")]
    TokenExpired,
    #[error("invalid token")]
    InvalidToken,
    #[error("invalid credentials")]
    BadCredentials,
    #[error("hashing failed")]
    Hash,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// An issued token plus its expiry, echoed to the client on login.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub user_id: String,
    pub token: String,
    pub expires_at: i64,
}

pub struct Authenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    lifetime_secs: i64,
    /// Verified against when the username is unknown, so login latency does
    /// not reveal whether an account exists.
    dummy_hash: String,
}

impl Authenticator {
    pub fn new(token_key: &[u8], lifetime_secs: i64) -> Self {
        let salt = SaltString::generate(&mut OsRng);
        let dummy_hash = Argon2::default()
            .hash_password(b"timing-pad", &salt)
            .map(|h| h.to_string())
            .unwrap_or_default();
        Authenticator {
            encoding_key: EncodingKey::from_secret(token_key),
            decoding_key: DecodingKey::from_secret(token_key),
            lifetime_secs,
            dummy_hash,
        }
    }

    /// Burn a verification against the dummy hash. Always fails.
    pub fn verify_dummy(&self, password: &str) {
        let _ = self.verify_password(password, &self.dummy_hash);
    }

    pub fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map(|h| h.to_string())
            .map_err(|_| AuthError::Hash)
    }

    pub fn verify_password(&self, password: &str, stored_hash: &str) -> Result<(), AuthError> {
        let parsed = PasswordHash::new(stored_hash).map_err(|_| AuthError::BadCredentials)?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| AuthError::BadCredentials)
    }

    pub fn issue_token(&self, user_id: &str) -> Result<TokenGrant, AuthError> {
        let iat = chrono::Utc::now().timestamp();
        let exp = iat + self.lifetime_secs;
        let claims = Claims {
            user_id: user_id.to_string(),
            iss: TOKEN_ISSUER.to_string(),
            iat,
            exp,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|_| AuthError::Hash)?;
        Ok(TokenGrant {
            user_id: user_id.to_string(),
            token,
            expires_at: exp,
        })
    }

    /// Validate a bearer token and return its claims. Expiry is reported
    /// distinctly from every other failure mode.
    pub fn verify_token(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[TOKEN_ISSUER]);
        validation.leeway = 0;
        match decode::<Claims>(token, &self.decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(AuthError::TokenExpired),
                _ => Err(AuthError::InvalidToken),
            },
        }
    }
}

/// Split a `basic` login secret: `base64("uname:password")`.
pub fn decode_basic_secret(secret: &str) -> Result<(String, String), AuthError> {
    use base64::Engine;
    let raw = base64::engine::general_purpose::STANDARD
        .decode(secret)
        .map_err(|_| AuthError::BadCredentials)?;
    let text = String::from_utf8(raw).map_err(|_| AuthError::BadCredentials)?;
    let (uname, password) = text.split_once(':').ok_or(AuthError::BadCredentials)?;
    if uname.is_empty() {
        return Err(AuthError::BadCredentials);
    }
    Ok((uname.to_string(), password.to_string()))
}

use anyhow::Result;
use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

/// Claims carried by tokens issued to quiz users.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub struct Claims {
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    pub exp: usize,
}

/// Sign a token for `user_id` that expires `valid_for` from now.
pub fn issue_jwt(secret: &[u8], user_id: &str, email: &str, valid_for: Duration) -> Result<String> {
    let claims = Claims {
        user_id: user_id.into(),
        email: email.into(),
        exp: (OffsetDateTime::now_utc() + valid_for).unix_timestamp().max(0) as usize,
    };
    Ok(encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret))?)
}

/// One-off check of `token` against `secret`.
pub fn verify_jwt(secret: &[u8], token: &str) -> Result<Claims> {
    TokenVerifier::new(secret).verify(token)
}

/// HS256 check bound to one signing key, fixed at construction.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret.as_ref()),
            validation,
        }
    }

    /// Signature and expiry are both enforced by the decoder.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        Ok(decode::<Claims>(token, &self.key, &self.validation)?.claims)
    }
}

/// Extract the token from an `Authorization: Bearer` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

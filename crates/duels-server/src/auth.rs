use crate::error::AuthError;
use duels_protocol::model::UserId;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Maps a bearer credential to a stable user id.
pub trait AuthVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<UserId, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub uid: UserId,
    pub exp: usize,
}

/// HS256 tokens issued by the account service.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: DecodingKey::from_secret(secret),
            validation: Validation::default(),
        }
    }
}

impl AuthVerifier for JwtVerifier {
    fn verify(&self, token: &str) -> Result<UserId, AuthError> {
        decode::<Claims>(token, &self.key, &self.validation)
            .map(|data| data.claims.uid)
            .map_err(|_| AuthError::InvalidCredential)
    }
}

pub fn bearer_token(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.ok_or(AuthError::MissingCredential)?;
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::InvalidCredential)
}

#[cfg(test)]
pub(crate) fn sign_for_tests(secret: &[u8], user_id: UserId) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let exp = chrono::Utc::now() + chrono::Duration::hours(1);
    let claims = Claims {
        sub: format!("player-{user_id}"),
        uid: user_id,
        exp: exp.timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        .expect("signing test token should not fail")
}

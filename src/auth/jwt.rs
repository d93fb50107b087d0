use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::auth::{AuthenticationFailure, AuthenticationResult, Authenticator};
use crate::endpoint::EndpointRequest;
use crate::types::{Consumer, ConsumerType};

pub const BEARER_CHALLENGE: &str = "Bearer realm=\"api\"";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub key: String,
    pub name: String,
    pub consumer_type: ConsumerType,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn for_consumer(consumer: &Consumer, expiry_hours: u64) -> Self {
        let now = Utc::now();
        Self {
            sub: consumer.id,
            key: consumer.key.clone(),
            name: consumer.name.clone(),
            consumer_type: consumer.consumer_type,
            exp: (now + Duration::hours(expiry_hours as i64)).timestamp(),
            iat: now.timestamp(),
        }
    }
}

impl From<Claims> for Consumer {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            key: claims.key,
            name: claims.name,
            consumer_type: claims.consumer_type,
        }
    }
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("Invalid JWT secret")]
    InvalidSecret,
}

pub fn generate_jwt(claims: &Claims, secret: &str) -> Result<String, JwtError> {
    if secret.is_empty() {
        return Err(JwtError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key).map_err(|e| JwtError::TokenGeneration(e.to_string()))
}

/// Authenticates `Authorization: Bearer <jwt>` requests.
pub struct JwtAuthenticator {
    secret: String,
}

impl JwtAuthenticator {
    pub fn new(secret: impl Into<String>) -> Self {
        Self { secret: secret.into() }
    }

    fn extract_token(request: &EndpointRequest) -> Result<&str, String> {
        let header = request
            .authorization()
            .ok_or_else(|| "Missing Authorization header".to_string())?;

        let token = header
            .get(..7)
            .filter(|prefix| prefix.eq_ignore_ascii_case("bearer "))
            .map(|_| header[7..].trim())
            .ok_or_else(|| "Authorization header must use Bearer token format".to_string())?;

        if token.is_empty() {
            return Err("Empty JWT token".to_string());
        }
        Ok(token)
    }

    fn validate(&self, token: &str) -> Result<Claims, String> {
        let decoding_key = DecodingKey::from_secret(self.secret.as_bytes());
        decode::<Claims>(token, &decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| format!("Invalid JWT token: {}", e))
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    fn name(&self) -> &'static str {
        "jwt"
    }

    async fn authenticate(&self, request: &EndpointRequest) -> AuthenticationResult {
        match Self::extract_token(request).and_then(|token| self.validate(token)) {
            Ok(claims) => AuthenticationResult::Success(Some(claims.into())),
            Err(detail) => AuthenticationResult::Failure(AuthenticationFailure {
                detail: Some(detail),
                challenge: self.challenge(),
            }),
        }
    }

    fn challenge(&self) -> Option<String> {
        Some(BEARER_CHALLENGE.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    #[tokio::test]
    async fn round_trips_a_consumer_through_a_token() {
        let consumer = Consumer::new("k1", "alice", ConsumerType::ReadOnly);
        let token = generate_jwt(&Claims::for_consumer(&consumer, 1), "secret").unwrap();

        let request = EndpointRequest::new(Method::GET, "/").with_header("authorization", &format!("Bearer {}", token));
        let result = JwtAuthenticator::new("secret").authenticate(&request).await;
        assert_eq!(result, AuthenticationResult::Success(Some(consumer)));
    }

    #[tokio::test]
    async fn wrong_secret_fails_with_challenge() {
        let consumer = Consumer::new("k1", "alice", ConsumerType::ReadWrite);
        let token = generate_jwt(&Claims::for_consumer(&consumer, 1), "secret").unwrap();

        let request = EndpointRequest::new(Method::GET, "/").with_header("authorization", &format!("Bearer {}", token));
        match JwtAuthenticator::new("other").authenticate(&request).await {
            AuthenticationResult::Failure(failure) => {
                assert_eq!(failure.challenge.as_deref(), Some(BEARER_CHALLENGE));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_secret_is_rejected() {
        let consumer = Consumer::new("k1", "alice", ConsumerType::ReadWrite);
        assert!(matches!(
            generate_jwt(&Claims::for_consumer(&consumer, 1), ""),
            Err(JwtError::InvalidSecret)
        ));
    }
}

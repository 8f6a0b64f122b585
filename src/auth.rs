//! Authentication boundary.
//!
//! Identity issuance lives outside this service; we only verify HS256 bearer
//! tokens and turn their claims into an [`Identity`]. `issue` exists for
//! development tooling and tests.

use crate::{
    error::{MatchError, Result},
    UserId,
};
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub is_admin: bool,
}

impl Identity {
    /// Admins pass every ownership check.
    pub fn owns(&self, owner_id: UserId) -> bool {
        self.is_admin || self.user_id == owner_id
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub admin: bool,
    pub exp: usize,
    pub iat: usize,
}

#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl: Duration,
}

impl TokenIssuer {
    pub fn new(secret: &str, ttl_hours: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            ttl: Duration::hours(ttl_hours),
        }
    }

    pub fn issue(&self, identity: &Identity) -> Result<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: identity.user_id.to_string(),
            name: identity.display_name.clone(),
            admin: identity.is_admin,
            exp: (now + self.ttl).timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|e| MatchError::Unauthorized(format!("Failed to issue token: {}", e)))
    }

    pub fn verify(&self, token: &str) -> Result<Identity> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let claims = decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| MatchError::Unauthorized(format!("Invalid token: {}", e)))?;

        let user_id = UserId::parse_str(&claims.sub)
            .map_err(|_| MatchError::Unauthorized("Token subject is not a user id".to_string()))?;

        Ok(Identity {
            user_id,
            display_name: claims.name.filter(|n| !n.trim().is_empty()),
            is_admin: claims.admin,
        })
    }

    fn identity_from_parts(&self, parts: &Parts) -> Result<Option<Identity>> {
        let Some(header) = parts.headers.get(AUTHORIZATION) else {
            return Ok(None);
        };
        let value = header
            .to_str()
            .map_err(|_| MatchError::Unauthorized("Malformed authorization header".to_string()))?;
        let token = value
            .strip_prefix("Bearer ")
            .ok_or_else(|| MatchError::Unauthorized("Expected a bearer token".to_string()))?;
        self.verify(token.trim()).map(Some)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
    TokenIssuer: FromRef<S>,
{
    type Rejection = MatchError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        TokenIssuer::from_ref(state)
            .identity_from_parts(parts)?
            .ok_or_else(|| MatchError::Unauthorized("Sign in required".to_string()))
    }
}

/// Optional caller identity for personalized reads.
#[derive(Debug, Clone)]
pub struct MaybeIdentity(pub Option<Identity>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeIdentity
where
    S: Send + Sync,
    TokenIssuer: FromRef<S>,
{
    type Rejection = MatchError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self> {
        TokenIssuer::from_ref(state)
            .identity_from_parts(parts)
            .map(MaybeIdentity)
    }
}

use axum::{async_trait, extract::FromRequestParts, http::header, http::request::Parts};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use shared::Role;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::api::{ApiError, AppState};

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("invalid token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),
    #[error("subject is not a user id: {0}")]
    BadSubject(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
}

/// Verifies HS256 access tokens issued by the identity provider.
#[derive(Clone)]
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(secret: &str, audience: &str) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let data = decode::<Claims>(token, &self.key, &self.validation)?;
        let user_id = Uuid::parse_str(&data.claims.sub)
            .map_err(|_| AuthError::BadSubject(data.claims.sub.clone()))?;
        Ok(AuthUser {
            user_id,
            email: data.claims.email,
        })
    }

    pub fn verify_header(&self, value: Option<&str>) -> Result<AuthUser, AuthError> {
        let token = value
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::Missing)?;
        self.verify(token)
    }
}

/// The signed-in user of the current request.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: Option<String>,
}

/// A signed-in user holding the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        match state.auth.verify_header(header) {
            Ok(user) => {
                parts.extensions.insert(user.clone());
                Ok(user)
            }
            Err(e) => {
                warn!("Rejected request to {}: {}", parts.uri, e);
                Err(ApiError::Unauthorized)
            }
        }
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !state.store.has_role(user.user_id, Role::Admin).await? {
            warn!("User {} denied admin access to {}", user.user_id, parts.uri);
            return Err(ApiError::Forbidden);
        }
        Ok(AdminUser(user))
    }
}

//! Customer identity verification.
//!
//! Tokens are minted by the hosted auth platform; this service only
//! verifies them. The authenticated email is the ownership key for
//! download redemption.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::{errors::ServiceError, AppState};

/// Claims carried by a customer token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Customer identifier
    pub sub: String,
    pub email: String,
    pub exp: usize,
    pub iat: usize,
}

/// The verified identity behind a request.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub customer_id: Option<Uuid>,
    pub email: String,
}

/// Verify an HS256 customer token against the shared secret.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, ServiceError> {
    let validation = Validation::new(Algorithm::HS256);
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map(|data| data.claims)
    .map_err(|e| ServiceError::Unauthorized(format!("invalid token: {}", e)))
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for AuthenticatedUser {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;
        let token = header_value
            .strip_prefix("Bearer ")
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?
            .trim();

        let claims = verify_token(token, &state.config.jwt_secret)?;
        Ok(AuthenticatedUser {
            customer_id: Uuid::parse_str(&claims.sub).ok(),
            email: claims.email,
        })
    }
}

use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    handlers::common::{success_response, validate_input},
    AppState,
};

pub fn download_routes() -> Router<Arc<AppState>> {
    Router::new().route("/", post(generate_download))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateDownloadRequest {
    #[validate(length(min = 1))]
    pub token: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GenerateDownloadResponse {
    pub download_url: String,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size: Option<i64>,
    pub remaining_downloads: i32,
    pub expires_at: DateTime<Utc>,
}

/// Redeem a download token for a short-lived signed file URL. The caller
/// must own the order the token belongs to.
#[utoipa::path(
    post,
    path = "/api/v1/downloads",
    request_body = GenerateDownloadRequest,
    responses(
        (status = 200, description = "Signed file URL", body = GenerateDownloadResponse),
        (status = 400, description = "Invalid, expired, or exhausted token", body = crate::errors::ErrorResponse),
        (status = 401, description = "Missing or invalid bearer token", body = crate::errors::ErrorResponse),
        (status = 403, description = "Token owned by another customer", body = crate::errors::ErrorResponse)
    ),
    security(("bearer_auth" = [])),
    tag = "Downloads"
)]
pub async fn generate_download(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(payload): Json<GenerateDownloadRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let grant = state
        .services
        .downloads
        .redeem(&payload.token, &user.email)
        .await?;

    Ok(success_response(GenerateDownloadResponse {
        download_url: grant.download_url,
        file_name: grant.file_name,
        file_size: grant.file_size_bytes,
        remaining_downloads: grant.remaining_downloads,
        expires_at: grant.expires_at,
    }))
}

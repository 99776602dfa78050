//! Authenticated profile endpoint.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use sqlx::PgPool;
use utoipa::ToSchema;

use super::auth::principal::require_auth;
use super::auth::session::unauthorized_response;
use super::auth::types::ErrorResponse;

#[derive(Debug, Serialize, ToSchema)]
pub struct Profile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileResponse {
    pub profile: Profile,
}

/// Reshape the authenticated principal; no extra database round trip.
#[utoipa::path(
    get,
    path = "/api/profile",
    responses(
        (status = 200, description = "Profile of the authenticated user", body = ProfileResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse)
    ),
    tag = "me"
)]
pub async fn profile(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool).await {
        Ok(principal) => principal,
        Err(StatusCode::UNAUTHORIZED) => return unauthorized_response(),
        Err(status) => return status.into_response(),
    };

    let response = ProfileResponse {
        profile: Profile {
            id: principal.user_id.to_string(),
            email: principal.email,
            name: principal.name,
            created_at: principal.created_at,
        },
    };
    (StatusCode::OK, Json(response)).into_response()
}

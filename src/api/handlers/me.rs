//! Authenticated current-user endpoint.
//!
//! Unlike `/api/profile`, this refetches the full user row so the response
//! always reflects the database, not just the session join.

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use sqlx::{PgPool, Row};
use tracing::{error, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use super::auth::principal::require_auth;
use super::auth::session::unauthorized_response;
use super::auth::types::ErrorResponse;

#[derive(Debug, Serialize, ToSchema)]
pub struct MeUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub user: MeUser,
}

#[utoipa::path(
    get,
    path = "/api/users/me",
    responses(
        (status = 200, description = "Current user", body = MeResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse),
        (status = 404, description = "User row no longer exists", body = ErrorResponse)
    ),
    tag = "me"
)]
pub async fn me(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    let principal = match require_auth(&headers, &pool).await {
        Ok(principal) => principal,
        Err(StatusCode::UNAUTHORIZED) => return unauthorized_response(),
        Err(status) => return status.into_response(),
    };

    match fetch_me(&pool, principal.user_id).await {
        Ok(Some(user)) => (StatusCode::OK, Json(MeResponse { user })).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: "User data not found".to_string(),
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to fetch current user: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to retrieve user data".to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn fetch_me(pool: &PgPool, user_id: Uuid) -> Result<Option<MeUser>> {
    let query = r"
        SELECT id, email, name, created_at::text AS created_at, updated_at::text AS updated_at
        FROM users
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch current user")?;

    Ok(row.map(|row| MeUser {
        id: row.get::<Uuid, _>("id").to_string(),
        email: row.get("email"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }))
}

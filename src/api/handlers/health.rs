//! Liveness and database probes.

use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool, Row};
use tracing::{debug, error, info, info_span, Instrument};
use utoipa::ToSchema;

use super::auth::types::ErrorResponse;
use crate::GIT_COMMIT_HASH;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    database: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database is reachable", body = Health),
        (status = 503, description = "Database is unreachable", body = Health)
    ),
    tag = "health"
)]
pub async fn health(method: Method, pool: Extension<PgPool>) -> impl IntoResponse {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let result = match pool.0.acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            match conn.ping().instrument(ping_span).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    error!("Failed to ping database: {}", error);
                    Err(StatusCode::SERVICE_UNAVAILABLE)
                }
            }
        }
        Err(error) => {
            error!("Failed to acquire database connection: {}", error);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    };

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if result.is_ok() {
            "ok".to_string()
        } else {
            "error".to_string()
        },
    };

    // HEAD/OPTIONS probes get the status without a body.
    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let headers = format!("{}:{}:{}", health.name, health.version, short_hash)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .map_err(|err| {
            error!("Failed to parse X-App header: {}", err);
        });

    let headers = headers.unwrap_or_else(|()| HeaderMap::new());

    match result {
        Ok(()) => (StatusCode::OK, headers, body).into_response(),
        Err(status) => (status, headers, body).into_response(),
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct DbCheckResponse {
    pub message: String,
    pub count: i64,
}

/// Database connectivity probe: counts users to confirm both the pool and
/// the schema are usable.
#[utoipa::path(
    get,
    path = "/test-db-connection",
    responses(
        (status = 200, description = "Database reachable", body = DbCheckResponse),
        (status = 500, description = "Database unreachable", body = ErrorResponse)
    ),
    tag = "health"
)]
pub async fn db_check(pool: Extension<PgPool>) -> impl IntoResponse {
    let query = "SELECT COUNT(*) AS count FROM users";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    match sqlx::query(query).fetch_one(&pool.0).instrument(span).await {
        Ok(row) => {
            let count: i64 = row.get("count");
            info!("Database check successful. User count: {count}");
            (
                StatusCode::OK,
                Json(DbCheckResponse {
                    message: format!("Database connection successful. User count: {count}"),
                    count,
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!("Database check failed: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Database connection failed. Please check backend logs for details."
                        .to_string(),
                }),
            )
                .into_response()
        }
    }
}

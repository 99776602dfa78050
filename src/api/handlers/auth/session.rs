//! Session endpoints for cookie and bearer auth.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::{
    state::{AuthConfig, AuthState},
    storage::{delete_session, lookup_session, SessionRecord},
    types::{ErrorResponse, MessageResponse, SessionInfo, SessionResponse, UserBody},
    utils::hash_session_token,
};

const SESSION_COOKIE_NAME: &str = "janua_session";

#[utoipa::path(
    get,
    path = "/api/auth/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 401, description = "Missing or invalid session", body = ErrorResponse)
    ),
    tag = "session"
)]
pub async fn session(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    match authenticate_session(&headers, &pool).await {
        Ok(Some(record)) => {
            let response = SessionResponse {
                user: UserBody {
                    id: record.user_id.to_string(),
                    email: record.email,
                    name: record.name,
                },
                session: SessionInfo {
                    id: record.session_id.to_string(),
                    expires_at: record.expires_at,
                },
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(None) => unauthorized_response(),
        Err(status) => status.into_response(),
    }
}

/// Resolve a session cookie or bearer token into a session record.
///
/// Returns `Ok(None)` when the token is missing or unknown.
pub(crate) async fn authenticate_session(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<Option<SessionRecord>, StatusCode> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    // Only the hash is stored; never compare raw tokens against the database.
    let token_hash = hash_session_token(&token);
    match lookup_session(pool, &token_hash).await {
        Ok(record) => Ok(record),
        Err(err) => {
            error!("Failed to lookup session: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// 401 body shared by every endpoint behind session auth.
pub(crate) fn unauthorized_response() -> axum::response::Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse {
            error: "Valid authentication required".to_string(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Session cleared", body = MessageResponse),
        (status = 500, description = "Session deletion failed", body = ErrorResponse)
    ),
    tag = "session"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    if let Some(token) = extract_session_token(&headers) {
        let token_hash = hash_session_token(&token);
        if let Err(err) = delete_session(&pool, &token_hash).await {
            error!("Failed to delete session: {err}");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Logout process failed".to_string(),
                }),
            )
                .into_response();
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::OK,
        response_headers,
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    )
        .into_response()
}

/// Build a secure `HttpOnly` cookie for the session token.
pub(super) fn session_cookie(
    auth_state: &AuthState,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = auth_state.config().session_ttl_seconds();
    let secure = auth_state.config().session_cookie_secure();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn clear_session_cookie(auth_config: &AuthConfig) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = auth_config.session_cookie_secure();
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == SESSION_COOKIE_NAME {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::super::state::{AuthConfig, AuthState};
    use super::*;
    use std::sync::Arc;

    fn auth_state(frontend: &str) -> AuthState {
        let limiter: Arc<dyn RateLimiter> = Arc::new(NoopRateLimiter);
        AuthState::new(AuthConfig::new(frontend.to_string()), limiter)
    }

    #[test]
    fn extract_session_token_from_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("other=1; janua_session=raw-token; theme=dark"),
        );
        assert_eq!(
            extract_session_token(&headers),
            Some("raw-token".to_string())
        );
    }

    #[test]
    fn extract_session_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("janua_session=from-cookie"),
        );
        assert_eq!(extract_session_token(&headers), Some("abc".to_string()));
    }

    #[test]
    fn extract_bearer_token_rejects_empty() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        assert_eq!(extract_bearer_token(&headers), None);
    }

    #[test]
    fn extract_session_token_none_without_headers() {
        assert_eq!(extract_session_token(&HeaderMap::new()), None);
    }

    #[test]
    fn session_cookie_secure_only_for_https_frontend() {
        let state = auth_state("https://app.janua.dev");
        let cookie = session_cookie(&state, "tok").expect("cookie");
        let cookie = cookie.to_str().expect("ascii");
        assert!(cookie.starts_with("janua_session=tok;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.ends_with("; Secure"));

        let state = auth_state("http://localhost:3000");
        let cookie = session_cookie(&state, "tok").expect("cookie");
        assert!(!cookie.to_str().expect("ascii").contains("Secure"));
    }

    #[test]
    fn clear_session_cookie_zeroes_max_age() {
        let config = AuthConfig::new("http://localhost:3000".to_string());
        let cookie = clear_session_cookie(&config).expect("cookie");
        assert!(cookie.to_str().expect("ascii").contains("Max-Age=0"));
    }
}

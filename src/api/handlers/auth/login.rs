//! Login endpoint.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};

use super::{
    password::verify_password,
    rate_limit::{RateLimitAction, RateLimitDecision},
    session::session_cookie,
    state::AuthState,
    storage::{insert_session, lookup_login_record},
    types::{AuthResponse, ErrorResponse, LoginRequest, SessionBody, UserBody},
    utils::{extract_client_ip, normalize_email},
};

#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Signed in", body = AuthResponse),
        (status = 400, description = "Missing credentials", body = ErrorResponse),
        (status = 401, description = "Invalid email or password", body = ErrorResponse),
        (status = 403, description = "Email not verified", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> impl IntoResponse {
    let request: LoginRequest = match payload {
        Some(Json(payload)) => payload,
        None => {
            return error_response(
                StatusCode::BAD_REQUEST,
                "Please provide both email and password.",
            )
        }
    };

    let email = normalize_email(&request.email);
    if email.is_empty() || request.password.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Please provide both email and password.",
        );
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::Login)
            == RateLimitDecision::Limited
    {
        return error_response(StatusCode::TOO_MANY_REQUESTS, "Rate limited");
    }

    let record = match lookup_login_record(&pool, &email).await {
        Ok(record) => record,
        Err(err) => {
            error!("Login failed: {err}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Login failed due to a server error.",
            );
        }
    };

    // Unknown email and wrong password share one message so callers cannot
    // probe which accounts exist.
    let Some(record) = record else {
        return error_response(StatusCode::UNAUTHORIZED, "Invalid email or password.");
    };

    match verify_password(&request.password, &record.password_hash) {
        Ok(true) => {}
        Ok(false) => {
            return error_response(StatusCode::UNAUTHORIZED, "Invalid email or password.");
        }
        Err(err) => {
            error!("Login failed: {err}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Login failed due to a server error.",
            );
        }
    }

    // The password checked out, so revealing the verification state is safe.
    if record.status != "active" {
        return error_response(
            StatusCode::FORBIDDEN,
            "Account requires email verification before login.",
        );
    }

    let session = match insert_session(
        &pool,
        record.user_id,
        auth_state.config().session_ttl_seconds(),
    )
    .await
    {
        Ok(session) => session,
        Err(err) => {
            error!("Failed to create session: {err}");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Login failed due to a server error.",
            );
        }
    };

    info!("User signed in: {email}");

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = session_cookie(&auth_state, &session.token) {
        response_headers.insert(SET_COOKIE, cookie);
    }

    let response = AuthResponse {
        message: "Login successful.".to_string(),
        user: UserBody {
            id: record.user_id.to_string(),
            email,
            name: record.name,
        },
        session: SessionBody {
            token: session.token,
            expires_at: session.expires_at,
        },
    };
    (StatusCode::OK, response_headers, Json(response)).into_response()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

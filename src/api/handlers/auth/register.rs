//! Registration endpoint.

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
    password::{acceptable_password, hash_password, MIN_PASSWORD_LENGTH},
    rate_limit::{RateLimitAction, RateLimitDecision},
    session::session_cookie,
    state::AuthState,
    storage::{insert_session, insert_user_and_verification, SignupOutcome},
    types::{AuthResponse, ErrorResponse, RegisterRequest, SessionBody, UserBody},
    utils::{extract_client_ip, normalize_email, valid_email},
};

#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "User created and signed in", body = AuthResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 409, description = "Email already registered", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> impl IntoResponse {
    let request: RegisterRequest = match payload {
        Some(Json(payload)) => payload,
        None => return bad_request("Please provide name, email, and password."),
    };

    let name = request.name.trim().to_string();
    let email = normalize_email(&request.email);
    if name.is_empty() || email.is_empty() || request.password.is_empty() {
        return bad_request("Please provide name, email, and password.");
    }
    if !valid_email(&email) {
        return bad_request("Invalid email address.");
    }
    if !acceptable_password(&request.password) {
        return bad_request(&format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters."
        ));
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Register)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::Register)
            == RateLimitDecision::Limited
    {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ErrorResponse {
                error: "Rate limited".to_string(),
            }),
        )
            .into_response();
    }

    let password_hash = match hash_password(&request.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Registration failed: {err}");
            return server_error("Registration failed due to a server error.");
        }
    };

    // Creates the user, queues the verification token, and enqueues the
    // verification email in one transaction.
    let user_id = match insert_user_and_verification(
        &pool,
        &name,
        &email,
        &password_hash,
        auth_state.config(),
    )
    .await
    {
        Ok(SignupOutcome::Created(user_id)) => user_id,
        Ok(SignupOutcome::Conflict) => {
            return (
                StatusCode::CONFLICT,
                Json(ErrorResponse {
                    error: "The provided email is already registered.".to_string(),
                }),
            )
                .into_response();
        }
        Err(err) => {
            error!("Registration failed: {err}");
            return server_error("Registration failed due to a server error.");
        }
    };

    // Auto sign-in: a fresh account gets a session immediately; email
    // verification only gates future logins.
    let session = match insert_session(
        &pool,
        user_id,
        auth_state.config().session_ttl_seconds(),
    )
    .await
    {
        Ok(session) => session,
        Err(err) => {
            error!("Failed to create session after registration: {err}");
            return server_error("Registration failed due to a server error.");
        }
    };

    info!("New user registered: {email}");

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = session_cookie(&auth_state, &session.token) {
        response_headers.insert(SET_COOKIE, cookie);
    }

    let response = AuthResponse {
        message: "Registration successful. User created and signed in.".to_string(),
        user: UserBody {
            id: user_id.to_string(),
            email,
            name,
        },
        session: SessionBody {
            token: session.token,
            expires_at: session.expires_at,
        },
    };
    (StatusCode::CREATED, response_headers, Json(response)).into_response()
}

fn bad_request(message: &str) -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn server_error(message: &str) -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{auth_state, lazy_pool};
    use super::register;
    use anyhow::Result;
    use axum::{
        extract::Extension,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        Json,
    };

    use super::RegisterRequest;

    #[tokio::test]
    async fn register_missing_payload() -> Result<()> {
        let response = register(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            None,
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn register_missing_fields() -> Result<()> {
        let response = register(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(RegisterRequest {
                name: " ".to_string(),
                email: "alice@example.com".to_string(),
                password: "long-enough".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn register_invalid_email() -> Result<()> {
        let response = register(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(RegisterRequest {
                name: "Alice".to_string(),
                email: "not-an-email".to_string(),
                password: "long-enough".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn register_short_password() -> Result<()> {
        let response = register(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(RegisterRequest {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                password: "short".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }
}

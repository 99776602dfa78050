//! Password reset endpoints.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::{
    password::{acceptable_password, hash_password, MIN_PASSWORD_LENGTH},
    rate_limit::{RateLimitAction, RateLimitDecision},
    state::AuthState,
    storage::{consume_password_reset, enqueue_password_reset, ResetOutcome, ResetRequestOutcome},
    types::{ErrorResponse, ForgotPasswordRequest, MessageResponse, ResetPasswordRequest},
    utils::{extract_client_ip, hash_verification_token, normalize_email, valid_email},
};

const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account exists, a password reset link has been sent to the email address.";

/// Queue a password-reset email (always answers 200 to avoid account probing).
#[utoipa::path(
    post,
    path = "/auth/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset accepted", body = MessageResponse),
        (status = 400, description = "Missing email", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> impl IntoResponse {
    let request: ForgotPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Please provide the email address associated with the account."
                        .to_string(),
                }),
            )
                .into_response();
        }
    };

    let email = normalize_email(&request.email);
    if email.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Please provide the email address associated with the account.".to_string(),
            }),
        )
            .into_response();
    }

    // Invalid addresses and rate-limited callers get the same generic answer.
    if !valid_email(&email) {
        return accepted_response();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ForgotPassword)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::ForgotPassword)
            == RateLimitDecision::Limited
    {
        return accepted_response();
    }

    match enqueue_password_reset(&pool, &email, auth_state.config()).await {
        Ok(ResetRequestOutcome::Queued | ResetRequestOutcome::Noop) => accepted_response(),
        Err(err) => {
            error!("Failed to enqueue password reset: {err}");
            // Failures stay invisible to the caller.
            accepted_response()
        }
    }
}

fn accepted_response() -> axum::response::Response {
    (
        StatusCode::OK,
        Json(MessageResponse {
            message: FORGOT_PASSWORD_MESSAGE.to_string(),
        }),
    )
        .into_response()
}

/// Consume the reset token and set the new password.
#[utoipa::path(
    post,
    path = "/auth/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 400, description = "Invalid or expired token", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    pool: Extension<PgPool>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> impl IntoResponse {
    let request: ResetPasswordRequest = match payload {
        Some(Json(payload)) => payload,
        None => {
            return bad_request("Missing required fields: token, email, or new password.");
        }
    };

    let token = request.token.trim();
    let email = normalize_email(&request.email);
    if token.is_empty() || email.is_empty() || request.new_password.is_empty() {
        return bad_request("Missing required fields: token, email, or new password.");
    }
    if !acceptable_password(&request.new_password) {
        return bad_request(&format!(
            "Password must be at least {MIN_PASSWORD_LENGTH} characters."
        ));
    }

    let new_password_hash = match hash_password(&request.new_password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Password reset failed: {err}");
            return server_error();
        }
    };

    // Hash the token before lookup; raw tokens are never stored server-side.
    let token_hash = hash_verification_token(token);
    match consume_password_reset(&pool, &email, &token_hash, &new_password_hash).await {
        Ok(ResetOutcome::Done) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "Password reset successful. You can now log in with your new password."
                    .to_string(),
            }),
        )
            .into_response(),
        Ok(ResetOutcome::Expired) => {
            bad_request("The reset link has expired. Please request a new one.")
        }
        Ok(ResetOutcome::Invalid) => bad_request("The reset token is invalid."),
        Err(err) => {
            error!("Password reset failed: {err}");
            server_error()
        }
    }
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

fn server_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Password reset failed. Please try again later.".to_string(),
        }),
    )
        .into_response()
}

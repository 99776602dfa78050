//! Email verification endpoints.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use utoipa::ToSchema;

use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::storage::{
    consume_verification_token, enqueue_resend_verification, lookup_email_by_token_hash,
    ResendOutcome, VerifyOutcome,
};
use super::types::{ErrorResponse, MessageResponse, ResendVerificationRequest, VerifyEmailRequest};
use super::utils::{extract_client_ip, hash_verification_token, normalize_email, valid_email};

const RESEND_MESSAGE: &str = "If an unverified account exists, a verification email has been sent.";

#[derive(Debug, Serialize, ToSchema)]
pub struct VerifyEmailResponse {
    pub message: String,
    pub success: bool,
}

/// Verify the email link by consuming the hashed token and activating the user.
#[utoipa::path(
    post,
    path = "/auth/verify-email-post",
    request_body = VerifyEmailRequest,
    responses(
        (status = 200, description = "Email verified (or already verified)", body = VerifyEmailResponse),
        (status = 400, description = "Invalid/expired token", body = ErrorResponse),
        (status = 429, description = "Rate limited", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<VerifyEmailRequest>>,
) -> impl IntoResponse {
    let request: VerifyEmailRequest = match payload {
        Some(Json(payload)) => payload,
        None => return bad_request("Verification token is required."),
    };

    let token = request.token.trim();
    if token.is_empty() {
        return bad_request("Verification token is required.");
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyEmail)
        == RateLimitDecision::Limited
    {
        // Rate limits are enforced before any token work to avoid amplification.
        return rate_limited();
    }

    // Hash the token before lookup; raw tokens are never stored server-side.
    let token_hash = hash_verification_token(token);
    let mut tx = match pool.begin().await {
        Ok(tx) => tx,
        Err(err) => {
            error!("Failed to start verify-email transaction: {err}");
            return server_error();
        }
    };

    if let Ok(Some(email)) = lookup_email_by_token_hash(&mut tx, &token_hash).await {
        // Email-based limits reduce repeated verification attempts for the
        // same address.
        if auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::VerifyEmail)
            == RateLimitDecision::Limited
        {
            let _ = tx.rollback().await;
            return rate_limited();
        }
    }

    match consume_verification_token(&mut tx, &token_hash).await {
        Ok(VerifyOutcome::Verified) => {
            if let Err(err) = tx.commit().await {
                error!("Failed to commit verify-email transaction: {err}");
                return server_error();
            }
            success_response("Email verified successfully! You can now sign in.")
        }
        Ok(VerifyOutcome::AlreadyVerified) => {
            let _ = tx.rollback().await;
            // A repeat click is not an error for the user.
            success_response("This email address has already been verified.")
        }
        Ok(VerifyOutcome::Expired) => {
            let _ = tx.rollback().await;
            bad_request("The verification link has expired. Please request a new one.")
        }
        Ok(VerifyOutcome::Invalid) => {
            let _ = tx.rollback().await;
            bad_request("The verification token is invalid.")
        }
        Err(err) => {
            error!("Failed to verify email: {err}");
            let _ = tx.rollback().await;
            server_error()
        }
    }
}

/// Resend a verification email (always answers 200 to avoid user enumeration).
#[utoipa::path(
    post,
    path = "/auth/resend-verification",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "Resend accepted", body = MessageResponse),
        (status = 400, description = "Missing email", body = ErrorResponse)
    ),
    tag = "auth"
)]
pub async fn resend_verification(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> impl IntoResponse {
    let request: ResendVerificationRequest = match payload {
        Some(Json(payload)) => payload,
        None => return bad_request("Email address is required."),
    };

    let email = normalize_email(&request.email);
    if email.is_empty() {
        return bad_request("Email address is required.");
    }
    if !valid_email(&email) {
        // Malformed addresses get the generic answer to avoid account probing.
        return resend_accepted();
    }

    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ResendVerification)
        == RateLimitDecision::Limited
        || auth_state
            .rate_limiter()
            .check_email(&email, RateLimitAction::ResendVerification)
            == RateLimitDecision::Limited
    {
        // Resend is intentionally opaque; rate limits still answer 200.
        return resend_accepted();
    }

    match enqueue_resend_verification(&pool, &email, auth_state.config()).await {
        Ok(ResendOutcome::Queued | ResendOutcome::Cooldown | ResendOutcome::Noop) => {
            resend_accepted()
        }
        Err(err) => {
            error!("Failed to enqueue resend verification: {err}");
            // Avoid leaking failures; callers always get the generic answer.
            resend_accepted()
        }
    }
}

fn success_response(message: &str) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(VerifyEmailResponse {
            message: message.to_string(),
            success: true,
        }),
    )
        .into_response()
}

fn resend_accepted() -> axum::response::Response {
    (
        StatusCode::OK,
        Json(MessageResponse {
            message: RESEND_MESSAGE.to_string(),
        }),
    )
        .into_response()
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

fn rate_limited() -> axum::response::Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        Json(ErrorResponse {
            error: "Rate limited".to_string(),
        }),
    )
        .into_response()
}

fn server_error() -> axum::response::Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Verification failed".to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{auth_state, lazy_pool};
    use super::{resend_verification, verify_email, ResendVerificationRequest, VerifyEmailRequest};
    use anyhow::Result;
    use axum::{
        extract::Extension,
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        Json,
    };

    #[tokio::test]
    async fn verify_email_missing_payload() -> Result<()> {
        let response = verify_email(
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
    async fn verify_email_empty_token() -> Result<()> {
        let response = verify_email(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(VerifyEmailRequest {
                token: " ".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        Ok(())
    }

    #[tokio::test]
    async fn resend_verification_missing_payload() -> Result<()> {
        let response = resend_verification(
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
    async fn resend_verification_invalid_email_still_accepted() -> Result<()> {
        let response = resend_verification(
            HeaderMap::new(),
            Extension(lazy_pool()?),
            Extension(auth_state()),
            Some(Json(ResendVerificationRequest {
                email: "not-an-email".to_string(),
            })),
        )
        .await
        .into_response();
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }
}

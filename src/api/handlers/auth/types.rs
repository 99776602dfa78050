//! Request/response types for auth endpoints.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Safe subset of a user row returned by register/login/session.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct UserBody {
    pub id: String,
    pub email: String,
    pub name: String,
}

/// Session material handed to the client on register/login.
///
/// The raw token also travels in the `janua_session` cookie; it appears in
/// the body so non-browser clients can use bearer auth.
#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionBody {
    pub token: String,
    pub expires_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct AuthResponse {
    pub message: String,
    pub user: UserBody,
    pub session: SessionBody,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionInfo {
    pub id: String,
    pub expires_at: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct SessionResponse {
    pub user: UserBody,
    pub session: SessionInfo,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub email: String,
    #[serde(rename = "newPassword")]
    pub new_password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct VerifyEmailRequest {
    pub token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorResponse {
    pub error: String,
}

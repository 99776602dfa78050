//! Auth handlers and supporting modules.
//!
//! This module coordinates email/password credentials, session management,
//! password reset, and email verification.
//!
//! ## Token storage
//!
//! Session, verification, and reset tokens are random 32-byte values; the
//! database stores only SHA-256 hashes. Signup and reset flows write the
//! token, the user mutation, and the outgoing email (as an `email_outbox`
//! row) in a single transaction.
//!
//! ## Enumeration safety
//!
//! `forgot-password` and `resend-verification` return the same body for
//! known and unknown accounts, and login failures never say which part of
//! the credentials was wrong.
//!
//! ## Rate limiting
//!
//! Every credential and token endpoint checks a sliding-window limiter per
//! client IP and per email address before touching the database. Register,
//! login, and verification answer 429 when limited; the enumeration-safe
//! endpoints keep their generic 200 instead.

pub(crate) mod login;
mod password;
pub(crate) mod principal;
mod rate_limit;
pub(crate) mod register;
pub(crate) mod reset;
pub(crate) mod session;
mod state;
mod storage;
pub(crate) mod types;
mod utils;
pub(crate) mod verification;

pub use rate_limit::{NoopRateLimiter, SlidingWindowRateLimiter};
pub use state::{AuthConfig, AuthState};

#[cfg(test)]
mod test_support;

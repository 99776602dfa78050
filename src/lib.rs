//! # Janua (Email & Password Authentication Service)
//!
//! `janua` is a standalone authentication service. It handles email/password
//! registration and login, opaque-token session management, password reset,
//! and email verification for a single user store in PostgreSQL.
//!
//! ## Sessions
//!
//! Sessions are random 32-byte tokens delivered as an `HttpOnly` cookie (and
//! accepted as a bearer token). The database only ever stores a SHA-256 hash
//! of the token; presenting the raw value is the only way to resolve a
//! session.
//!
//! ## Email delivery
//!
//! Verification and password-reset emails are enqueued in the `email_outbox`
//! table inside the same transaction that creates the underlying token. A
//! background worker drains the outbox over SMTP (or logs the payload when no
//! SMTP host is configured), retrying failures with bounded exponential
//! backoff. API latency is never coupled to the mail server.
//!
//! ## Enumeration safety
//!
//! `forgot-password` and `resend-verification` always answer with the same
//! generic message whether or not the account exists, and login failures do
//! not distinguish unknown emails from wrong passwords.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(
            GIT_COMMIT_HASH.len() >= 7,
            "GIT_COMMIT_HASH should be at least 7 characters long, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}

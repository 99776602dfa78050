//! Auth state and configuration shared across handlers.

use std::sync::Arc;

use super::rate_limit::RateLimiter;

const DEFAULT_VERIFY_TOKEN_TTL_SECONDS: i64 = 30 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECONDS: i64 = 60 * 60;
const DEFAULT_RESEND_COOLDOWN_SECONDS: i64 = 60;
const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    frontend_base_url: String,
    verify_token_ttl_seconds: i64,
    reset_token_ttl_seconds: i64,
    resend_cooldown_seconds: i64,
    session_ttl_seconds: i64,
}

impl AuthConfig {
    #[must_use]
    pub fn new(frontend_base_url: String) -> Self {
        Self {
            frontend_base_url,
            verify_token_ttl_seconds: DEFAULT_VERIFY_TOKEN_TTL_SECONDS,
            reset_token_ttl_seconds: DEFAULT_RESET_TOKEN_TTL_SECONDS,
            resend_cooldown_seconds: DEFAULT_RESEND_COOLDOWN_SECONDS,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
        }
    }

    #[must_use]
    pub fn with_verify_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.verify_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_reset_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.reset_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_resend_cooldown_seconds(mut self, seconds: i64) -> Self {
        self.resend_cooldown_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(super) fn verify_token_ttl_seconds(&self) -> i64 {
        self.verify_token_ttl_seconds
    }

    pub(super) fn reset_token_ttl_seconds(&self) -> i64 {
        self.reset_token_ttl_seconds
    }

    pub(super) fn resend_cooldown_seconds(&self) -> i64 {
        self.resend_cooldown_seconds
    }

    pub(super) fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    /// Cookies are only marked `Secure` when the frontend is served over HTTPS.
    pub(super) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

pub struct AuthState {
    config: AuthConfig,
    rate_limiter: Arc<dyn RateLimiter>,
}

impl AuthState {
    pub fn new(config: AuthConfig, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        Self {
            config,
            rate_limiter,
        }
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::{AuthConfig, AuthState};
    use std::sync::Arc;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new("https://app.janua.dev".to_string());

        assert_eq!(config.frontend_base_url(), "https://app.janua.dev");
        assert_eq!(
            config.verify_token_ttl_seconds(),
            super::DEFAULT_VERIFY_TOKEN_TTL_SECONDS
        );
        assert_eq!(
            config.reset_token_ttl_seconds(),
            super::DEFAULT_RESET_TOKEN_TTL_SECONDS
        );
        assert_eq!(
            config.resend_cooldown_seconds(),
            super::DEFAULT_RESEND_COOLDOWN_SECONDS
        );
        assert_eq!(
            config.session_ttl_seconds(),
            super::DEFAULT_SESSION_TTL_SECONDS
        );

        let config = config
            .with_verify_token_ttl_seconds(120)
            .with_reset_token_ttl_seconds(300)
            .with_resend_cooldown_seconds(30)
            .with_session_ttl_seconds(3600);

        assert_eq!(config.verify_token_ttl_seconds(), 120);
        assert_eq!(config.reset_token_ttl_seconds(), 300);
        assert_eq!(config.resend_cooldown_seconds(), 30);
        assert_eq!(config.session_ttl_seconds(), 3600);
    }

    #[test]
    fn cookie_secure_follows_frontend_scheme() {
        assert!(AuthConfig::new("https://app.janua.dev".to_string()).session_cookie_secure());
        assert!(!AuthConfig::new("http://localhost:3000".to_string()).session_cookie_secure());
    }

    #[test]
    fn auth_state_constructs_with_noop_rate_limiter() {
        let config = AuthConfig::new("http://localhost:3000".to_string());
        let limiter: Arc<dyn RateLimiter> = Arc::new(NoopRateLimiter);
        let state = AuthState::new(config, limiter);
        assert_eq!(state.config().frontend_base_url(), "http://localhost:3000");
    }
}

//! Rate limiting for auth flows.
//!
//! Flow Overview:
//! 1) Track per-email and per-IP attempts in an in-memory sliding window.
//! 2) Enforce rolling window limits per action (register, login, reset, ...).
//! 3) Expired entries are pruned on access; the whole map is swept once per
//!    window so idle keys do not accumulate.
//!
//! Scaling: limits are per process. Instances behind a load balancer each
//! enforce their own window; the resend cooldown in storage stays the
//! database-backed cross-instance guard.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

const DEFAULT_WINDOW: Duration = Duration::from_secs(10 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Register,
    Login,
    ForgotPassword,
    VerifyEmail,
    ResendVerification,
}

impl RateLimitAction {
    /// Attempts allowed per IP within one window.
    const fn ip_limit(self) -> usize {
        match self {
            Self::Register | Self::Login | Self::VerifyEmail => 10,
            Self::ForgotPassword | Self::ResendVerification => 5,
        }
    }

    /// Attempts allowed per email address within one window.
    const fn email_limit(self) -> usize {
        match self {
            Self::Register | Self::Login | Self::VerifyEmail => 5,
            Self::ForgotPassword | Self::ResendVerification => 3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
enum Scope {
    Ip,
    Email,
}

type BucketKey = (RateLimitAction, Scope, String);

/// In-memory sliding-window limiter used by the server.
///
/// Every allowed attempt is recorded; a key is limited once it has reached
/// the action's limit within the window. Requests without a client IP skip
/// the IP check (the email check still applies).
#[derive(Debug)]
pub struct SlidingWindowRateLimiter {
    window: Duration,
    state: Mutex<WindowState>,
}

#[derive(Debug)]
struct WindowState {
    buckets: HashMap<BucketKey, VecDeque<Instant>>,
    last_sweep: Instant,
}

impl SlidingWindowRateLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self::with_window(DEFAULT_WINDOW)
    }

    #[must_use]
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(WindowState {
                buckets: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    fn check(&self, key: BucketKey, limit: usize) -> RateLimitDecision {
        let now = Instant::now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if now.duration_since(state.last_sweep) >= self.window {
            let window = self.window;
            state
                .buckets
                .retain(|_, attempts| attempts.back().is_some_and(|at| now - *at < window));
            state.last_sweep = now;
        }

        let attempts = state.buckets.entry(key).or_default();
        while attempts
            .front()
            .is_some_and(|at| now.duration_since(*at) >= self.window)
        {
            attempts.pop_front();
        }

        if attempts.len() >= limit {
            return RateLimitDecision::Limited;
        }
        attempts.push_back(now);
        RateLimitDecision::Allowed
    }
}

impl Default for SlidingWindowRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter for SlidingWindowRateLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        // Proxies that strip the client IP leave only the per-email limit.
        let Some(ip) = ip else {
            return RateLimitDecision::Allowed;
        };
        self.check((action, Scope::Ip, ip.to_string()), action.ip_limit())
    }

    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision {
        self.check(
            (action, Scope::Email, email.to_string()),
            action.email_limit(),
        )
    }
}

/// Test double that never limits.
#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn check_email(&self, _email: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::Register),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_email("user@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn sliding_window_limits_email_at_threshold() {
        let limiter = SlidingWindowRateLimiter::new();
        let limit = RateLimitAction::Login.email_limit();

        for _ in 0..limit {
            assert_eq!(
                limiter.check_email("alice@example.com", RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check_email("alice@example.com", RateLimitAction::Login),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn sliding_window_limits_ip_at_threshold() {
        let limiter = SlidingWindowRateLimiter::new();
        let limit = RateLimitAction::ForgotPassword.ip_limit();

        for _ in 0..limit {
            assert_eq!(
                limiter.check_ip(Some("1.2.3.4"), RateLimitAction::ForgotPassword),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check_ip(Some("1.2.3.4"), RateLimitAction::ForgotPassword),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn missing_ip_skips_the_ip_check() {
        let limiter = SlidingWindowRateLimiter::new();
        for _ in 0..100 {
            assert_eq!(
                limiter.check_ip(None, RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
    }

    #[test]
    fn buckets_are_scoped_per_action_and_key() {
        let limiter = SlidingWindowRateLimiter::new();
        let limit = RateLimitAction::ResendVerification.email_limit();

        for _ in 0..limit {
            limiter.check_email("alice@example.com", RateLimitAction::ResendVerification);
        }
        assert_eq!(
            limiter.check_email("alice@example.com", RateLimitAction::ResendVerification),
            RateLimitDecision::Limited
        );

        // A different address and a different action still have headroom.
        assert_eq!(
            limiter.check_email("bob@example.com", RateLimitAction::ResendVerification),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_email("alice@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn attempts_expire_with_the_window() {
        let limiter = SlidingWindowRateLimiter::with_window(Duration::from_millis(10));
        let limit = RateLimitAction::Login.email_limit();

        for _ in 0..limit {
            limiter.check_email("alice@example.com", RateLimitAction::Login);
        }
        assert_eq!(
            limiter.check_email("alice@example.com", RateLimitAction::Login),
            RateLimitDecision::Limited
        );

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(
            limiter.check_email("alice@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn sweep_drops_idle_keys() {
        let limiter = SlidingWindowRateLimiter::with_window(Duration::from_millis(10));
        limiter.check_email("alice@example.com", RateLimitAction::Login);
        limiter.check_ip(Some("1.2.3.4"), RateLimitAction::Login);

        std::thread::sleep(Duration::from_millis(20));
        // Any access past the window triggers the sweep.
        limiter.check_email("carol@example.com", RateLimitAction::Login);

        let state = limiter
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        assert!(!state
            .buckets
            .keys()
            .any(|(_, _, key)| key == "alice@example.com" || key == "1.2.3.4"));
    }
}

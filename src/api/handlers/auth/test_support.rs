//! Shared fixtures for handler unit tests.
//!
//! The lazy pool never opens a connection, so tests exercising validation
//! paths run without a database; any handler path that actually queries will
//! fail loudly instead of hanging.

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

use super::rate_limit::{NoopRateLimiter, RateLimiter};
use super::state::{AuthConfig, AuthState};

pub(crate) fn lazy_pool() -> Result<PgPool> {
    Ok(PgPoolOptions::new().connect_lazy("postgres://postgres@localhost/postgres")?)
}

pub(crate) fn auth_state() -> Arc<AuthState> {
    let config = AuthConfig::new("http://localhost:3000".to_string());
    let limiter: Arc<dyn RateLimiter> = Arc::new(NoopRateLimiter);
    Arc::new(AuthState::new(config, limiter))
}

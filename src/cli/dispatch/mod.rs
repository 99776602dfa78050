//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the appropriate
//! action, such as starting the API server with its full configuration state.

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::{auth, smtp};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let smtp_opts = smtp::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        frontend_base_url: auth_opts.frontend_base_url,
        email_token_ttl_seconds: auth_opts.email_token_ttl_seconds,
        reset_token_ttl_seconds: auth_opts.reset_token_ttl_seconds,
        email_resend_cooldown_seconds: auth_opts.email_resend_cooldown_seconds,
        session_ttl_seconds: auth_opts.session_ttl_seconds,
        email_outbox_poll_seconds: auth_opts.email_outbox.poll_seconds,
        email_outbox_batch_size: auth_opts.email_outbox.batch_size,
        email_outbox_max_attempts: auth_opts.email_outbox.max_attempts,
        email_outbox_backoff_base_seconds: auth_opts.email_outbox.backoff_base_seconds,
        email_outbox_backoff_max_seconds: auth_opts.email_outbox.backoff_max_seconds,
        smtp_host: smtp_opts.host,
        smtp_port: smtp_opts.port,
        smtp_username: smtp_opts.username,
        smtp_password: smtp_opts.password,
        smtp_from: smtp_opts.from,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_builds_server_action_with_defaults() {
        temp_env::with_vars(
            [
                ("JANUA_PORT", None::<&str>),
                ("JANUA_FRONTEND_BASE_URL", None),
                ("JANUA_SMTP_HOST", None),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec![
                    "janua",
                    "--dsn",
                    "postgres://user@localhost:5432/janua",
                ]);
                let action = handler(&matches).expect("action");
                let Action::Server(args) = action;
                assert_eq!(args.port, 8080);
                assert_eq!(args.dsn, "postgres://user@localhost:5432/janua");
                assert_eq!(args.frontend_base_url, "http://localhost:3000");
                assert_eq!(args.session_ttl_seconds, 604_800);
                assert_eq!(args.email_outbox_max_attempts, 5);
                assert!(args.smtp_host.is_empty());
                assert_eq!(args.smtp_from, "no-reply@janua.dev");
            },
        );
    }

    #[test]
    fn handler_carries_smtp_overrides() {
        temp_env::with_vars(
            [
                ("JANUA_SMTP_HOST", Some("smtp.janua.dev")),
                ("JANUA_SMTP_PORT", Some("465")),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec![
                    "janua",
                    "--dsn",
                    "postgres://user@localhost:5432/janua",
                    "--port",
                    "9090",
                ]);
                let action = handler(&matches).expect("action");
                let Action::Server(args) = action;
                assert_eq!(args.port, 9090);
                assert_eq!(args.smtp_host, "smtp.janua.dev");
                assert_eq!(args.smtp_port, 465);
            },
        );
    }
}

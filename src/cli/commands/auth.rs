use anyhow::{Context, Result};
use clap::{Arg, Command};

/// Token, session, and outbox settings parsed from the auth argument group.
#[derive(Debug)]
pub struct Options {
    pub frontend_base_url: String,
    pub email_token_ttl_seconds: i64,
    pub reset_token_ttl_seconds: i64,
    pub email_resend_cooldown_seconds: i64,
    pub session_ttl_seconds: i64,
    pub email_outbox: OutboxOptions,
}

#[derive(Debug)]
pub struct OutboxOptions {
    pub poll_seconds: u64,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub backoff_base_seconds: u64,
    pub backoff_max_seconds: u64,
}

impl Options {
    /// Read the auth argument group back out of parsed matches.
    ///
    /// # Errors
    /// Returns an error if an argument with a default is somehow absent.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            frontend_base_url: matches
                .get_one::<String>("frontend-base-url")
                .cloned()
                .context("missing required argument: --frontend-base-url")?,
            email_token_ttl_seconds: matches
                .get_one::<i64>("email-token-ttl-seconds")
                .copied()
                .context("missing required argument: --email-token-ttl-seconds")?,
            reset_token_ttl_seconds: matches
                .get_one::<i64>("reset-token-ttl-seconds")
                .copied()
                .context("missing required argument: --reset-token-ttl-seconds")?,
            email_resend_cooldown_seconds: matches
                .get_one::<i64>("email-resend-cooldown-seconds")
                .copied()
                .context("missing required argument: --email-resend-cooldown-seconds")?,
            session_ttl_seconds: matches
                .get_one::<i64>("session-ttl-seconds")
                .copied()
                .context("missing required argument: --session-ttl-seconds")?,
            email_outbox: OutboxOptions::parse(matches)?,
        })
    }
}

impl OutboxOptions {
    fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            poll_seconds: matches
                .get_one::<u64>("email-outbox-poll-seconds")
                .copied()
                .context("missing required argument: --email-outbox-poll-seconds")?,
            batch_size: matches
                .get_one::<usize>("email-outbox-batch-size")
                .copied()
                .context("missing required argument: --email-outbox-batch-size")?,
            max_attempts: matches
                .get_one::<u32>("email-outbox-max-attempts")
                .copied()
                .context("missing required argument: --email-outbox-max-attempts")?,
            backoff_base_seconds: matches
                .get_one::<u64>("email-outbox-backoff-base-seconds")
                .copied()
                .context("missing required argument: --email-outbox-backoff-base-seconds")?,
            backoff_max_seconds: matches
                .get_one::<u64>("email-outbox-backoff-max-seconds")
                .copied()
                .context("missing required argument: --email-outbox-backoff-max-seconds")?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    let command = with_auth_email_args(command);
    with_auth_outbox_args(command)
}

fn with_auth_email_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("frontend-base-url")
                .long("frontend-base-url")
                .help("Frontend base URL used for verification and reset links")
                .env("JANUA_FRONTEND_BASE_URL")
                .default_value("http://localhost:3000"),
        )
        .arg(
            Arg::new("email-token-ttl-seconds")
                .long("email-token-ttl-seconds")
                .help("Email verification token TTL in seconds")
                .env("JANUA_EMAIL_TOKEN_TTL_SECONDS")
                .default_value("1800")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("reset-token-ttl-seconds")
                .long("reset-token-ttl-seconds")
                .help("Password reset token TTL in seconds")
                .env("JANUA_RESET_TOKEN_TTL_SECONDS")
                .default_value("3600")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("email-resend-cooldown-seconds")
                .long("email-resend-cooldown-seconds")
                .help("Cooldown before resending verification emails")
                .env("JANUA_EMAIL_RESEND_COOLDOWN_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("session-ttl-seconds")
                .long("session-ttl-seconds")
                .help("Session cookie TTL in seconds")
                .env("JANUA_SESSION_TTL_SECONDS")
                .default_value("604800")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_auth_outbox_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("email-outbox-poll-seconds")
                .long("email-outbox-poll-seconds")
                .help("Email outbox poll interval in seconds")
                .env("JANUA_EMAIL_OUTBOX_POLL_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-outbox-batch-size")
                .long("email-outbox-batch-size")
                .help("Email outbox batch size per poll")
                .env("JANUA_EMAIL_OUTBOX_BATCH_SIZE")
                .default_value("10")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("email-outbox-max-attempts")
                .long("email-outbox-max-attempts")
                .help("Max attempts before marking an email as failed")
                .env("JANUA_EMAIL_OUTBOX_MAX_ATTEMPTS")
                .default_value("5")
                .value_parser(clap::value_parser!(u32)),
        )
        .arg(
            Arg::new("email-outbox-backoff-base-seconds")
                .long("email-outbox-backoff-base-seconds")
                .help("Base delay for email outbox retry backoff")
                .env("JANUA_EMAIL_OUTBOX_BACKOFF_BASE_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("email-outbox-backoff-max-seconds")
                .long("email-outbox-backoff-max-seconds")
                .help("Max delay for email outbox retry backoff")
                .env("JANUA_EMAIL_OUTBOX_BACKOFF_MAX_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

use anyhow::{Context, Result};
use clap::{Arg, Command};
use secrecy::SecretString;

/// SMTP settings parsed from the smtp argument group.
///
/// An empty host leaves delivery in log-only mode for local development.
#[derive(Debug)]
pub struct Options {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from: String,
}

impl Options {
    /// Read the smtp argument group back out of parsed matches.
    ///
    /// # Errors
    /// Returns an error if an argument with a default is somehow absent.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        Ok(Self {
            host: matches
                .get_one::<String>("smtp-host")
                .cloned()
                .context("missing required argument: --smtp-host")?,
            port: matches
                .get_one::<u16>("smtp-port")
                .copied()
                .context("missing required argument: --smtp-port")?,
            username: matches.get_one::<String>("smtp-username").cloned(),
            password: matches
                .get_one::<String>("smtp-password")
                .cloned()
                .map(SecretString::from),
            from: matches
                .get_one::<String>("smtp-from")
                .cloned()
                .context("missing required argument: --smtp-from")?,
        })
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("smtp-host")
                .long("smtp-host")
                .help("SMTP relay host; leave empty to log emails instead of sending")
                .env("JANUA_SMTP_HOST")
                .default_value(""),
        )
        .arg(
            Arg::new("smtp-port")
                .long("smtp-port")
                .help("SMTP relay port")
                .env("JANUA_SMTP_PORT")
                .default_value("587")
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("smtp-username")
                .long("smtp-username")
                .help("SMTP username")
                .env("JANUA_SMTP_USERNAME"),
        )
        .arg(
            Arg::new("smtp-password")
                .long("smtp-password")
                .help("SMTP password")
                .env("JANUA_SMTP_PASSWORD"),
        )
        .arg(
            Arg::new("smtp-from")
                .long("smtp-from")
                .help("From address for outbound email")
                .env("JANUA_SMTP_FROM")
                .default_value("no-reply@janua.dev"),
        )
}

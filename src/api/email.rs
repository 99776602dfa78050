//! Email outbox worker and delivery abstractions.
//!
//! Signup, resend, and forgot-password flows enqueue rows in `email_outbox`
//! with status `pending`, inside the same transaction that creates the
//! underlying token. A background task periodically polls that table, locks a
//! batch via `FOR UPDATE SKIP LOCKED`, renders the row's template, and hands
//! the result to an [`EmailSender`]. The worker then updates the row to
//! `sent` or `failed`.
//!
//! Failed rows are retried with exponential backoff and jitter until a max
//! attempt threshold is reached. Because delivery is decoupled from the HTTP
//! request, a slow or broken SMTP server can never fail or stall an API
//! response.
//!
//! The default sender when no SMTP host is configured is [`LogEmailSender`],
//! which logs and returns `Ok(())`. With a host configured, [`SmtpEmailSender`]
//! delivers over STARTTLS with optional credentials.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct EmailMessage {
    pub to_email: String,
    pub template: String,
    pub payload_json: String,
}

/// Subject and bodies rendered from an outbox row.
#[derive(Clone, Debug)]
pub struct RenderedEmail {
    pub subject: String,
    pub text: String,
    pub html: String,
}

/// Email delivery abstraction used by the outbox worker.
#[async_trait]
pub trait EmailSender: Send + Sync {
    /// Deliver a message or return an error to schedule a retry.
    async fn send(&self, message: &EmailMessage) -> Result<()>;
}

/// Local dev sender that logs the payload instead of sending real email.
#[derive(Clone, Debug)]
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        // Render anyway so a broken payload surfaces in dev, not in prod.
        let rendered = render_message(message)?;
        info!(
            to_email = %message.to_email,
            template = %message.template,
            subject = %rendered.subject,
            payload = %message.payload_json,
            "email outbox send stub"
        );
        Ok(())
    }
}

/// SMTP connection settings, typically populated from `JANUA_SMTP_*`.
#[derive(Clone, Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub from: String,
}

impl SmtpConfig {
    /// An empty host means "log instead of send" (local development).
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.host.trim().is_empty()
    }
}

/// Real SMTP delivery over STARTTLS.
pub struct SmtpEmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpEmailSender {
    /// Build the transport from config.
    /// # Errors
    /// Returns an error if the from-address or host are unusable.
    pub fn new(config: &SmtpConfig) -> Result<Self> {
        let from = config
            .from
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid SMTP from address: {}", config.from))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .context("Failed to configure SMTP transport")?
            .port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(
                username.clone(),
                password.expose_secret().to_string(),
            ));
        }

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl EmailSender for SmtpEmailSender {
    async fn send(&self, message: &EmailMessage) -> Result<()> {
        let rendered = render_message(message)?;
        let to = message
            .to_email
            .parse::<Mailbox>()
            .with_context(|| format!("Invalid recipient address: {}", message.to_email))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&rendered.subject)
            .multipart(MultiPart::alternative_plain_html(
                rendered.text,
                rendered.html,
            ))
            .context("failed to build email message")?;

        self.transport
            .send(email)
            .await
            .context("failed to send email over SMTP")?;
        Ok(())
    }
}

/// Pick the sender for the configured environment.
/// # Errors
/// Returns an error if SMTP is enabled but misconfigured.
pub fn build_sender(config: &SmtpConfig) -> Result<Arc<dyn EmailSender>> {
    if config.is_enabled() {
        Ok(Arc::new(SmtpEmailSender::new(config)?))
    } else {
        warn!("SMTP host not configured; outbound emails will only be logged");
        Ok(Arc::new(LogEmailSender))
    }
}

/// Render the outbox row's template into subject/text/html.
///
/// Unknown templates and missing payload fields are errors so the row ends up
/// `failed` with a diagnostic instead of sending a half-empty email.
pub fn render_message(message: &EmailMessage) -> Result<RenderedEmail> {
    let payload: serde_json::Value = serde_json::from_str(&message.payload_json)
        .context("failed to parse email payload JSON")?;

    match message.template.as_str() {
        "verify_email" => {
            let url = payload_url(&payload, "verify_url")?;
            Ok(RenderedEmail {
                subject: "Verify your email address".to_string(),
                text: format!(
                    "Welcome! Please confirm your email address by opening the link below:\n{url}\n\nIf you did not create an account, please ignore this email."
                ),
                html: format!(
                    r#"<p>Welcome! Please confirm your email address by clicking the button below:</p>
<a href="{url}" style="display: inline-block; padding: 10px 20px; background-color: #007bff; color: white; text-decoration: none; border-radius: 5px;">Verify Email</a>
<p>If the button doesn't work, you can also copy and paste this link into your browser: <br/> {url}</p>
<p>If you did not create an account, please ignore this email.</p>"#
                ),
            })
        }
        "password_reset" => {
            let url = payload_url(&payload, "reset_url")?;
            Ok(RenderedEmail {
                subject: "Reset Your Password".to_string(),
                text: format!(
                    "You are receiving this email because a password reset was requested for your account. Please click on the link below to reset your password: {url}\n\nIf you did not request a password reset, please ignore this email."
                ),
                html: format!(
                    r#"<p>You are receiving this email because a password reset was requested for your account.</p>
<p>Please click the button below to reset your password:</p>
<a href="{url}" style="display: inline-block; padding: 10px 20px; background-color: #007bff; color: white; text-decoration: none; border-radius: 5px;">Reset Password</a>
<p>If the button doesn't work, you can also copy and paste this link into your browser: <br/> {url}</p>
<p>If you did not request a password reset, please ignore this email.</p>"#
                ),
            })
        }
        other => Err(anyhow!("unknown email template: {other}")),
    }
}

fn payload_url(payload: &serde_json::Value, key: &str) -> Result<String> {
    payload
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("email payload missing field: {key}"))
}

#[derive(Clone, Copy, Debug)]
pub struct EmailWorkerConfig {
    poll_interval: Duration,
    batch_size: usize,
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl EmailWorkerConfig {
    /// Default worker config: 5s poll interval, 10 messages per batch,
    /// 5 max attempts, and 5s->5m exponential backoff with jitter.
    #[must_use]
    pub fn new() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 10,
            max_attempts: 5,
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
        }
    }

    #[must_use]
    pub fn with_poll_interval_seconds(mut self, seconds: u64) -> Self {
        self.poll_interval = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_backoff_base_seconds(mut self, seconds: u64) -> Self {
        self.backoff_base = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn with_backoff_max_seconds(mut self, seconds: u64) -> Self {
        self.backoff_max = Duration::from_secs(seconds);
        self
    }

    #[must_use]
    pub fn normalize(self) -> Self {
        let poll_interval = if self.poll_interval.is_zero() {
            Duration::from_secs(1)
        } else {
            self.poll_interval
        };
        let batch_size = if self.batch_size == 0 {
            1
        } else {
            self.batch_size
        };
        let max_attempts = self.max_attempts.max(1);
        let backoff_base = if self.backoff_base.is_zero() {
            Duration::from_secs(1)
        } else {
            self.backoff_base
        };
        let backoff_max = if self.backoff_max < backoff_base {
            backoff_base
        } else {
            self.backoff_max
        };
        Self {
            poll_interval,
            batch_size,
            max_attempts,
            backoff_base,
            backoff_max,
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    #[must_use]
    pub fn backoff_max(&self) -> Duration {
        self.backoff_max
    }
}

impl Default for EmailWorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawn a background task that polls and processes the email outbox.
pub fn spawn_outbox_worker(
    pool: PgPool,
    sender: Arc<dyn EmailSender>,
    config: EmailWorkerConfig,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let config = config.normalize();
        let poll_interval = config.poll_interval();

        loop {
            // Poll the outbox table on a fixed cadence; sender handles delivery or logging.
            let batch_result = process_outbox_batch(&pool, sender.as_ref(), &config).await;
            if let Err(err) = batch_result {
                error!("email outbox batch failed: {err}");
            }

            sleep(poll_interval).await;
        }
    })
}

async fn process_outbox_batch(
    pool: &PgPool,
    sender: &dyn EmailSender,
    config: &EmailWorkerConfig,
) -> Result<usize> {
    let mut tx = pool
        .begin()
        .await
        .context("failed to start email outbox transaction")?;

    // Grab a locked batch so multiple workers can run without double-sending.
    let query = r"
        SELECT id, to_email, template, payload_json::text AS payload_json, attempts
        FROM email_outbox
        WHERE status = 'pending'
          AND next_attempt_at <= NOW()
        ORDER BY next_attempt_at ASC, created_at ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
    ";
    let span = info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(i64::try_from(config.batch_size()).unwrap_or(0))
        .fetch_all(&mut *tx)
        .instrument(span)
        .await
        .context("failed to load email outbox batch")?;

    if rows.is_empty() {
        // Commit even on empty to release locks and keep poll loop consistent.
        tx.commit()
            .await
            .context("failed to commit empty outbox batch")?;
        return Ok(0);
    }

    let row_count = rows.len();
    for row in rows {
        let id: Uuid = row.get("id");
        let attempts: i32 = row.get("attempts");
        let attempts = u32::try_from(attempts).unwrap_or(0);
        let message = EmailMessage {
            to_email: row.get("to_email"),
            template: row.get("template"),
            payload_json: row.get("payload_json"),
        };

        let send_result = sender.send(&message).await;
        update_outbox_status(&mut tx, id, attempts, send_result, config).await?;
    }

    tx.commit()
        .await
        .context("failed to commit email outbox batch")?;

    Ok(row_count)
}

async fn update_outbox_status(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    id: Uuid,
    attempts: u32,
    send_result: Result<()>,
    config: &EmailWorkerConfig,
) -> Result<()> {
    // Retry failures with exponential backoff and jitter until max_attempts.
    let next_attempt = attempts.saturating_add(1);
    let next_attempts_i32 = i32::try_from(next_attempt).unwrap_or(i32::MAX);
    match send_result {
        Ok(()) => {
            let query = r"
                UPDATE email_outbox
                SET status = 'sent',
                    attempts = $2,
                    last_error = NULL,
                    sent_at = NOW(),
                    next_attempt_at = NOW()
                WHERE id = $1
            ";
            let span = info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(id)
                .bind(next_attempts_i32)
                .execute(&mut **tx)
                .instrument(span)
                .await
                .context("failed to update outbox status to sent")?;
        }
        Err(err) => {
            let max_attempts = config.max_attempts();
            if next_attempt >= max_attempts {
                let query = r"
                    UPDATE email_outbox
                    SET status = 'failed',
                        attempts = $2,
                        last_error = $3,
                        next_attempt_at = NOW()
                    WHERE id = $1
                ";
                let span = info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "UPDATE",
                    db.statement = query
                );
                sqlx::query(query)
                    .bind(id)
                    .bind(next_attempts_i32)
                    .bind(err.to_string())
                    .execute(&mut **tx)
                    .instrument(span)
                    .await
                    .context("failed to update outbox status to failed")?;
            } else {
                let delay =
                    backoff_delay(next_attempt, config.backoff_base(), config.backoff_max());
                let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                let query = r"
                    UPDATE email_outbox
                    SET status = 'pending',
                        attempts = $2,
                        last_error = $3,
                        next_attempt_at = NOW() + ($4 * INTERVAL '1 millisecond')
                    WHERE id = $1
                ";
                let span = info_span!(
                    "db.query",
                    db.system = "postgresql",
                    db.operation = "UPDATE",
                    db.statement = query
                );
                sqlx::query(query)
                    .bind(id)
                    .bind(next_attempts_i32)
                    .bind(err.to_string())
                    .bind(delay_ms)
                    .execute(&mut **tx)
                    .instrument(span)
                    .await
                    .context("failed to update outbox retry schedule")?;
            }
        }
    }

    Ok(())
}

fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.saturating_sub(1).min(31);
    let factor = 1u32 << shift;
    let delay = base.checked_mul(factor).unwrap_or(max);
    let capped = if delay > max { max } else { delay };
    jitter_delay(capped)
}

fn jitter_delay(delay: Duration) -> Duration {
    let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    if delay_ms < 2 {
        return delay;
    }
    let half = delay_ms / 2;
    let jitter = rand::thread_rng().gen_range(0..=half);
    Duration::from_millis(half + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(template: &str, payload: &str) -> EmailMessage {
        EmailMessage {
            to_email: "alice@example.com".to_string(),
            template: template.to_string(),
            payload_json: payload.to_string(),
        }
    }

    #[test]
    fn render_verify_email_template() {
        let rendered = render_message(&message(
            "verify_email",
            r#"{"email":"alice@example.com","verify_url":"https://app/verify?token=t"}"#,
        ))
        .expect("render");
        assert_eq!(rendered.subject, "Verify your email address");
        assert!(rendered.text.contains("https://app/verify?token=t"));
        assert!(rendered.html.contains("https://app/verify?token=t"));
    }

    #[test]
    fn render_password_reset_template() {
        let rendered = render_message(&message(
            "password_reset",
            r#"{"email":"alice@example.com","reset_url":"https://app/reset?token=t"}"#,
        ))
        .expect("render");
        assert_eq!(rendered.subject, "Reset Your Password");
        assert!(rendered.text.contains("https://app/reset?token=t"));
        assert!(rendered.html.contains("Reset Password"));
    }

    #[test]
    fn render_rejects_unknown_template() {
        assert!(render_message(&message("newsletter", "{}")).is_err());
    }

    #[test]
    fn render_rejects_missing_url_field() {
        assert!(render_message(&message("verify_email", r#"{"email":"a@b.co"}"#)).is_err());
    }

    #[test]
    fn render_rejects_invalid_payload_json() {
        assert!(render_message(&message("verify_email", "not-json")).is_err());
    }

    #[tokio::test]
    async fn log_sender_accepts_valid_message() {
        let sender = LogEmailSender;
        let result = sender
            .send(&message(
                "verify_email",
                r#"{"email":"a@b.co","verify_url":"https://app/v?token=t"}"#,
            ))
            .await;
        assert!(result.is_ok());
    }

    #[test]
    fn smtp_config_enabled_only_with_host() {
        let config = SmtpConfig {
            host: String::new(),
            port: 587,
            username: None,
            password: None,
            from: "no-reply@localhost".to_string(),
        };
        assert!(!config.is_enabled());

        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            ..config
        };
        assert!(config.is_enabled());
    }

    #[test]
    fn smtp_sender_rejects_bad_from_address() {
        let config = SmtpConfig {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: None,
            password: None,
            from: "not an address".to_string(),
        };
        assert!(SmtpEmailSender::new(&config).is_err());
    }

    #[test]
    fn worker_config_normalize_fixes_zeroes() {
        let config = EmailWorkerConfig::new()
            .with_poll_interval_seconds(0)
            .with_batch_size(0)
            .with_max_attempts(0)
            .with_backoff_base_seconds(0)
            .with_backoff_max_seconds(0)
            .normalize();
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.batch_size(), 1);
        assert_eq!(config.max_attempts(), 1);
        assert_eq!(config.backoff_base(), Duration::from_secs(1));
        assert!(config.backoff_max() >= config.backoff_base());
    }

    #[test]
    fn backoff_delay_grows_and_caps() {
        let base = Duration::from_secs(5);
        let max = Duration::from_secs(300);
        // Jitter keeps the result in [delay/2, delay]; compare upper bounds.
        let first = backoff_delay(1, base, max);
        assert!(first <= base);
        let tenth = backoff_delay(10, base, max);
        assert!(tenth <= max);
        let huge = backoff_delay(64, base, max);
        assert!(huge <= max);
    }
}

//! Database helpers for users, sessions, and token state.

use anyhow::{anyhow, Context, Result};
use serde_json::json;
use sqlx::{PgPool, Row};
use tracing::Instrument;
use uuid::Uuid;

use super::state::AuthConfig;
use super::utils::{
    build_reset_url, build_verify_url, generate_session_token, generate_verification_token,
    hash_session_token, hash_verification_token, is_unique_violation,
};

/// Outcome when attempting to create a new user + verification record.
#[derive(Debug)]
pub(super) enum SignupOutcome {
    Created(Uuid),
    Conflict,
}

/// Outcome for a resend request (the endpoint answers 200 either way).
#[derive(Debug)]
pub(super) enum ResendOutcome {
    Queued,
    Cooldown,
    Noop,
}

/// Outcome when consuming an email verification token.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum VerifyOutcome {
    Verified,
    AlreadyVerified,
    Expired,
    Invalid,
}

/// Outcome for a forgot-password request (the endpoint answers 200 either way).
#[derive(Debug)]
pub(super) enum ResetRequestOutcome {
    Queued,
    Noop,
}

/// Outcome when consuming a password-reset token.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum ResetOutcome {
    Done,
    Expired,
    Invalid,
}

/// Fields needed to check a password login.
pub(super) struct LoginRecord {
    pub(super) user_id: Uuid,
    pub(super) name: String,
    pub(super) status: String,
    pub(super) password_hash: String,
}

/// Data resolved from a valid session token.
pub(crate) struct SessionRecord {
    pub(crate) session_id: Uuid,
    pub(crate) user_id: Uuid,
    pub(crate) email: String,
    pub(crate) name: String,
    pub(crate) created_at: String,
    pub(crate) expires_at: String,
}

/// A freshly minted session: the raw token plus its expiry.
pub(super) struct NewSession {
    pub(super) token: String,
    pub(super) expires_at: String,
}

/// Look up credential data by email (used by login).
pub(super) async fn lookup_login_record(pool: &PgPool, email: &str) -> Result<Option<LoginRecord>> {
    let query = "SELECT id, name, status::text AS status, password_hash FROM users WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup login record")?;

    Ok(row.map(|row| LoginRecord {
        user_id: row.get("id"),
        name: row.get("name"),
        status: row.get("status"),
        password_hash: row.get("password_hash"),
    }))
}

pub(super) async fn insert_user_and_verification(
    pool: &PgPool,
    name: &str,
    email: &str,
    password_hash: &str,
    config: &AuthConfig,
) -> Result<SignupOutcome> {
    // Transaction ensures user creation, verification token, and email outbox
    // row stay consistent even if something fails.
    let mut tx = pool.begin().await.context("begin signup transaction")?;

    let query = r"
        INSERT INTO users
            (name, email, password_hash)
        VALUES ($1, $2, $3)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .fetch_one(&mut *tx)
        .instrument(span)
        .await;

    let user_id: Uuid = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            if is_unique_violation(&err) {
                let _ = tx.rollback().await;
                return Ok(SignupOutcome::Conflict);
            }
            return Err(err).context("failed to insert user");
        }
    };

    let _token = insert_verification_records(&mut tx, user_id, email, config).await?;

    tx.commit().await.context("commit signup transaction")?;

    Ok(SignupOutcome::Created(user_id))
}

pub(super) async fn insert_verification_records(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    email: &str,
    config: &AuthConfig,
) -> Result<String> {
    // Generate a raw token for the email link and store only its hash.
    let token = generate_verification_token()?;
    let token_hash = hash_verification_token(&token);

    let query = r"
        INSERT INTO email_verification_tokens
            (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .bind(config.verify_token_ttl_seconds())
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email verification token")?;

    let verify_url = build_verify_url(config.frontend_base_url(), &token);
    enqueue_outbox_row(
        tx,
        email,
        "verify_email",
        &json!({ "email": email, "verify_url": verify_url }),
    )
    .await?;

    Ok(token)
}

/// Create a password-reset token and queue the reset email, if the account exists.
pub(super) async fn enqueue_password_reset(
    pool: &PgPool,
    email: &str,
    config: &AuthConfig,
) -> Result<ResetRequestOutcome> {
    let mut tx = pool.begin().await.context("begin reset-request transaction")?;

    let query = "SELECT id FROM users WHERE email = $1 LIMIT 1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup user for password reset")?;

    let Some(row) = row else {
        // Commit the empty transaction so callers cannot time the difference.
        tx.commit().await.context("commit reset-request noop")?;
        return Ok(ResetRequestOutcome::Noop);
    };

    let user_id: Uuid = row.get("id");
    let token = generate_verification_token()?;
    let token_hash = hash_verification_token(&token);

    let query = r"
        INSERT INTO password_reset_tokens
            (user_id, token_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(token_hash)
        .bind(config.reset_token_ttl_seconds())
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to insert password reset token")?;

    let reset_url = build_reset_url(config.frontend_base_url(), &token);
    enqueue_outbox_row(
        &mut tx,
        email,
        "password_reset",
        &json!({ "email": email, "reset_url": reset_url }),
    )
    .await?;

    tx.commit().await.context("commit reset-request enqueue")?;
    Ok(ResetRequestOutcome::Queued)
}

/// Consume a reset token, update the password, and revoke every session of
/// the affected user, all in one transaction.
pub(super) async fn consume_password_reset(
    pool: &PgPool,
    email: &str,
    token_hash: &[u8],
    new_password_hash: &str,
) -> Result<ResetOutcome> {
    let mut tx = pool.begin().await.context("begin reset transaction")?;

    let query = r"
        UPDATE password_reset_tokens
        SET consumed_at = NOW()
        WHERE token_hash = $1
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to consume password reset token")?;

    let Some(row) = row else {
        let outcome = classify_dead_reset_token(&mut tx, token_hash).await?;
        let _ = tx.rollback().await;
        return Ok(outcome);
    };

    let user_id: Uuid = row.get("user_id");

    // The caller supplies the email from the reset form; a mismatch means the
    // token does not belong to that account.
    let query = "SELECT email FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let owner: Option<String> = sqlx::query(query)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup reset token owner")?
        .map(|row| row.get("email"));

    if owner.as_deref() != Some(email) {
        let _ = tx.rollback().await;
        return Ok(ResetOutcome::Invalid);
    }

    let query = r"
        UPDATE users
        SET password_hash = $2,
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .bind(new_password_hash)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to update password hash")?;

    // A changed password invalidates every outstanding session.
    let query = "DELETE FROM user_sessions WHERE user_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to revoke sessions after password reset")?;

    tx.commit().await.context("commit reset transaction")?;
    Ok(ResetOutcome::Done)
}

/// Distinguish an expired reset token from an unknown/used one so the
/// handler can tell the user to request a fresh link.
async fn classify_dead_reset_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    token_hash: &[u8],
) -> Result<ResetOutcome> {
    let query = r"
        SELECT (expires_at <= NOW()) AS expired
        FROM password_reset_tokens
        WHERE token_hash = $1
          AND consumed_at IS NULL
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to classify reset token")?;

    match row {
        Some(row) if row.get::<bool, _>("expired") => Ok(ResetOutcome::Expired),
        _ => Ok(ResetOutcome::Invalid),
    }
}

pub(super) async fn insert_session(
    pool: &PgPool,
    user_id: Uuid,
    ttl_seconds: i64,
) -> Result<NewSession> {
    // Generate a random token, store only its hash, and return the raw value
    // so the caller can set the session cookie.
    let query = r"
        INSERT INTO user_sessions (user_id, session_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
        RETURNING expires_at::text AS expires_at
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_session_token()?;
        let token_hash = hash_session_token(&token);
        let result = sqlx::query(query)
            .bind(user_id)
            .bind(token_hash)
            .bind(ttl_seconds)
            .fetch_one(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(row) => {
                return Ok(NewSession {
                    token,
                    expires_at: row.get("expires_at"),
                })
            }
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

pub(super) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<SessionRecord>> {
    // Sessions stay valid for pending-verification users: registration signs
    // the user in immediately, and only the login endpoint gates on status.
    let query = r"
        SELECT user_sessions.id AS session_id,
               user_sessions.expires_at::text AS expires_at,
               users.id AS user_id,
               users.email,
               users.name,
               users.created_at::text AS created_at
        FROM user_sessions
        JOIN users ON users.id = user_sessions.user_id
        WHERE user_sessions.session_hash = $1
          AND user_sessions.expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    if row.is_none() {
        return Ok(None);
    }

    // Record activity for audit/visibility without extending the session TTL.
    let query = r"
        UPDATE user_sessions
        SET last_seen_at = NOW()
        WHERE session_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to update session last_seen_at")?;

    Ok(row.map(|row| SessionRecord {
        session_id: row.get("session_id"),
        user_id: row.get("user_id"),
        email: row.get("email"),
        name: row.get("name"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
    }))
}

pub(super) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Logout is idempotent; it's fine if no rows are deleted.
    let query = "DELETE FROM user_sessions WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

pub(super) async fn consume_verification_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    token_hash: &[u8],
) -> Result<VerifyOutcome> {
    // Mark the token consumed if still valid; then activate the user in the
    // same transaction.
    let query = r"
        UPDATE email_verification_tokens
        SET consumed_at = NOW()
        WHERE token_hash = $1
          AND consumed_at IS NULL
          AND expires_at > NOW()
        RETURNING user_id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to consume verification token")?;

    let Some(row) = row else {
        return classify_dead_verification_token(tx, token_hash).await;
    };

    let user_id: Uuid = row.get("user_id");
    let query = r"
        UPDATE users
        SET email_verified_at = NOW(),
            status = 'active',
            updated_at = NOW()
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(user_id)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to update user status")?;

    Ok(VerifyOutcome::Verified)
}

async fn classify_dead_verification_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    token_hash: &[u8],
) -> Result<VerifyOutcome> {
    // A repeat click on an old link is not an error when the account is
    // already active; expired links get their own message.
    let query = r"
        SELECT (email_verification_tokens.expires_at <= NOW()) AS expired,
               users.status::text AS status
        FROM email_verification_tokens
        JOIN users ON users.id = email_verification_tokens.user_id
        WHERE email_verification_tokens.token_hash = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to classify verification token")?;

    let Some(row) = row else {
        return Ok(VerifyOutcome::Invalid);
    };

    let status: String = row.get("status");
    if status == "active" {
        return Ok(VerifyOutcome::AlreadyVerified);
    }
    if row.get::<bool, _>("expired") {
        return Ok(VerifyOutcome::Expired);
    }
    Ok(VerifyOutcome::Invalid)
}

pub(super) async fn lookup_email_by_token_hash(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    token_hash: &[u8],
) -> Result<Option<String>> {
    // Used for per-email rate limiting during verification.
    let query = r"
        SELECT users.email
        FROM email_verification_tokens
        JOIN users ON users.id = email_verification_tokens.user_id
        WHERE email_verification_tokens.token_hash = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to lookup email for token")?;
    Ok(row.map(|row| row.get("email")))
}

pub(super) async fn enqueue_resend_verification(
    pool: &PgPool,
    email: &str,
    config: &AuthConfig,
) -> Result<ResendOutcome> {
    // Resend is intentionally opaque: callers always get the same response.
    let mut tx = pool.begin().await.context("begin resend transaction")?;

    let query = r"
        SELECT id, email, status::text AS status
        FROM users
        WHERE email = $1
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup user for resend")?;

    let Some(row) = row else {
        tx.commit().await.context("commit resend noop")?;
        return Ok(ResendOutcome::Noop);
    };

    let status: String = row.get("status");
    if status != "pending_verification" {
        tx.commit().await.context("commit resend noop")?;
        return Ok(ResendOutcome::Noop);
    }

    let user_id: Uuid = row.get("id");
    if resend_cooldown_active(&mut tx, user_id, config.resend_cooldown_seconds()).await? {
        tx.commit().await.context("commit resend cooldown")?;
        return Ok(ResendOutcome::Cooldown);
    }

    let email: String = row.get("email");
    let _ = insert_verification_records(&mut tx, user_id, &email, config).await?;
    tx.commit().await.context("commit resend enqueue")?;
    Ok(ResendOutcome::Queued)
}

async fn resend_cooldown_active(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user_id: Uuid,
    cooldown_seconds: i64,
) -> Result<bool> {
    // Cooldown prevents repeated resend requests from spamming the outbox.
    let query = r"
        SELECT 1
        FROM email_verification_tokens
        WHERE user_id = $1
          AND created_at > NOW() - ($2 * INTERVAL '1 second')
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(user_id)
        .bind(cooldown_seconds)
        .fetch_optional(&mut **tx)
        .instrument(span)
        .await
        .context("failed to check resend cooldown")?;
    Ok(row.is_some())
}

async fn enqueue_outbox_row(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    to_email: &str,
    template: &str,
    payload: &serde_json::Value,
) -> Result<()> {
    let payload_text =
        serde_json::to_string(payload).context("failed to serialize email payload")?;

    let query = r"
        INSERT INTO email_outbox (to_email, template, payload_json)
        VALUES ($1, $2, $3::jsonb)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(to_email)
        .bind(template)
        .bind(payload_text)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert email outbox row")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{LoginRecord, ResendOutcome, ResetOutcome, SignupOutcome, VerifyOutcome};
    use uuid::Uuid;

    #[test]
    fn signup_outcome_debug_names() {
        let id = Uuid::nil();
        assert_eq!(
            format!("{:?}", SignupOutcome::Created(id)),
            format!("Created({id:?})")
        );
        assert_eq!(format!("{:?}", SignupOutcome::Conflict), "Conflict");
    }

    #[test]
    fn resend_outcome_debug_names() {
        assert_eq!(format!("{:?}", ResendOutcome::Queued), "Queued");
        assert_eq!(format!("{:?}", ResendOutcome::Cooldown), "Cooldown");
        assert_eq!(format!("{:?}", ResendOutcome::Noop), "Noop");
    }

    #[test]
    fn verify_and_reset_outcomes_are_distinct() {
        assert_ne!(VerifyOutcome::Verified, VerifyOutcome::AlreadyVerified);
        assert_ne!(VerifyOutcome::Expired, VerifyOutcome::Invalid);
        assert_ne!(ResetOutcome::Done, ResetOutcome::Invalid);
        assert_ne!(ResetOutcome::Expired, ResetOutcome::Invalid);
    }

    #[test]
    fn login_record_holds_values() {
        let record = LoginRecord {
            user_id: Uuid::nil(),
            name: "Alice".to_string(),
            status: "active".to_string(),
            password_hash: "$argon2id$stub".to_string(),
        };
        assert_eq!(record.user_id, Uuid::nil());
        assert_eq!(record.status, "active");
        assert_eq!(record.name, "Alice");
    }
}

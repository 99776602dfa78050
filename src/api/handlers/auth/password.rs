//! Argon2id password hashing and verification.

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

/// Minimum accepted password length, enforced before hashing.
pub(super) const MIN_PASSWORD_LENGTH: usize = 8;

/// Check the only password rule enforced at signup and reset.
pub(super) fn acceptable_password(password: &str) -> bool {
    password.len() >= MIN_PASSWORD_LENGTH
}

/// Hash a password into a PHC string with a fresh random salt.
pub(super) fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash password: {err}"))?;
    Ok(hash.to_string())
}

/// Verify a password against a stored PHC hash.
///
/// Returns `Ok(false)` for a wrong password; errors only signal a malformed
/// stored hash or an internal argon2 failure.
pub(super) fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(password_hash)
        .map_err(|err| anyhow!("invalid stored password hash: {err}"))?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(anyhow!("failed to verify password: {err}")),
    }
}

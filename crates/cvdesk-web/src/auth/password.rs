use argon2::password_hash::{self, PasswordHash, PasswordVerifier};
use argon2::Argon2;

/// Checks `password` against a stored PHC string.
///
/// A wrong password is `Ok(false)`. A stored hash that cannot be parsed or
/// verified is an error, since that is a broken `[[users]]` entry rather than a
/// failed sign-in.
pub fn verify_password(stored_hash: &str, password: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| anyhow::anyhow!("Stored password hash is malformed: {e}"))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Password verification failed: {e}")),
    }
}

/// Argon2 work that runs off the async executor.
pub async fn verify_password_blocking(
    stored_hash: String,
    password: String,
) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&stored_hash, &password)).await?
}

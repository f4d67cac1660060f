//! Room password hashing.
//!
//! bcrypt is CPU-bound, so both operations run on the blocking pool.

use crate::errors::RvError;
use secrecy::{ExposeSecret, SecretString};
use tracing::instrument;

/// Lowest cost bcrypt accepts.
pub const MIN_HASH_COST: u32 = 4;

/// Highest cost bcrypt accepts.
pub const MAX_HASH_COST: u32 = 31;

/// Hash a room password.
///
/// # Errors
///
/// `RvError::Internal` if the cost is out of range or hashing fails.
#[instrument(skip_all)]
pub async fn hash_password(password: SecretString, cost: u32) -> Result<String, RvError> {
    if !(MIN_HASH_COST..=MAX_HASH_COST).contains(&cost) {
        return Err(RvError::Internal(format!(
            "invalid bcrypt cost: {cost} (must be {MIN_HASH_COST}-{MAX_HASH_COST})"
        )));
    }

    tokio::task::spawn_blocking(move || bcrypt::hash(password.expose_secret(), cost))
        .await
        .map_err(|e| RvError::Internal(format!("hash task failed: {e}")))?
        .map_err(|e| RvError::Internal(format!("password hashing failed: {e}")))
}

/// Check a supplied password against a stored hash. A missing password
/// never matches.
///
/// # Errors
///
/// `RvError::Internal` if the stored hash is unreadable.
#[instrument(skip_all)]
pub async fn verify_password(password: Option<SecretString>, hash: String) -> Result<bool, RvError> {
    let Some(password) = password else {
        return Ok(false);
    };

    tokio::task::spawn_blocking(move || bcrypt::verify(password.expose_secret(), &hash))
        .await
        .map_err(|e| RvError::Internal(format!("verify task failed: {e}")))?
        .map_err(|e| RvError::Internal(format!("password verification failed: {e}")))
}

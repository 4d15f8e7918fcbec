//! Password hashing and verification.
//!
//! bcrypt silently truncates input at 72 bytes, so anything longer is
//! rejected during validation, before it ever reaches the hasher.

use tracing::instrument;

use crate::errors::{Error, Result};
use crate::validator::Validator;

pub const HASH_COST: u32 = 12;
pub const MIN_PASSWORD_BYTES: usize = 8;
pub const MAX_PASSWORD_BYTES: usize = 72;

/// Hash a plaintext password on the blocking pool. Cost 12 keeps a
/// single hash in the tens of milliseconds, far too slow for the async
/// worker threads.
#[instrument(skip(password), err)]
pub async fn hash_password(password: String) -> Result<Vec<u8>> {
    tokio::task::spawn_blocking(move || {
        bcrypt::hash(&password, HASH_COST)
            .map(String::into_bytes)
            .map_err(|err| {
                tracing::error!(error = %err, "password hashing failed");
                Error::Internal {
                    operation: "hash password".to_string(),
                }
            })
    })
    .await
    .map_err(|_| Error::Internal {
        operation: "join password hashing task".to_string(),
    })?
}

/// Check a plaintext password against a stored hash on the blocking
/// pool. A hash that does not parse counts as a mismatch rather than an
/// internal error, so corrupted rows cannot be probed.
#[instrument(skip(password, password_hash))]
pub async fn verify_password(password: String, password_hash: Vec<u8>) -> Result<bool> {
    tokio::task::spawn_blocking(move || {
        let Ok(hash) = std::str::from_utf8(&password_hash) else {
            tracing::warn!("stored password hash is not valid utf-8");
            return Ok(false);
        };
        match bcrypt::verify(&password, hash) {
            Ok(matches) => Ok(matches),
            Err(err) => {
                tracing::warn!(error = %err, "stored password hash failed to parse");
                Ok(false)
            }
        }
    })
    .await
    .map_err(|_| Error::Internal {
        operation: "join password verification task".to_string(),
    })?
}

pub fn validate_password_plaintext(v: &mut Validator, password: Option<&str>) {
    let password = password.unwrap_or_default();
    v.check(!password.is_empty(), "password", "must be provided");
    v.check(
        password.len() >= MIN_PASSWORD_BYTES,
        "password",
        "must be at least 8 bytes long",
    );
    v.check(
        password.len() <= MAX_PASSWORD_BYTES,
        "password",
        "must not be more than 72 bytes long",
    );
}

//! Token issuance model.
//!
//! A token's plaintext is handed to the caller exactly once; only its
//! SHA-256 digest is ever persisted. Lookups re-derive the digest from
//! the presented plaintext, so a stored row can never be replayed as a
//! credential on its own.

use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE32_NOPAD;
use rand::prelude::RngExt;
use rand::rng;
use sha2::{Digest, Sha256};

use crate::db::models::users::UserId;
use crate::validator::Validator;

/// Number of base-32 characters in a token plaintext (16 random bytes).
pub const PLAINTEXT_LENGTH: usize = 26;

/// Purpose a token was issued for. Tokens are only ever looked up
/// within a single scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenScope {
    Activation,
    Authentication,
    PasswordReset,
}

impl TokenScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenScope::Activation => "activation",
            TokenScope::Authentication => "authentication",
            TokenScope::PasswordReset => "password-reset",
        }
    }
}

impl std::fmt::Display for TokenScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A freshly issued token. `plaintext` is returned to the caller once
/// and never persisted.
#[derive(Debug, Clone)]
pub struct Token {
    pub plaintext: String,
    pub hash: Vec<u8>,
    pub user_id: UserId,
    pub expiry: DateTime<Utc>,
    pub scope: TokenScope,
}

impl Token {
    /// Generate a new token for `user_id` expiring `ttl` from now.
    pub fn generate(user_id: UserId, ttl: Duration, scope: TokenScope) -> Self {
        let mut random_bytes = [0u8; 16];
        rng().fill(&mut random_bytes);

        let plaintext = BASE32_NOPAD.encode(&random_bytes);
        let hash = Self::hash_plaintext(&plaintext);

        Self {
            plaintext,
            hash,
            user_id,
            expiry: Utc::now() + ttl,
            scope,
        }
    }

    /// Digest of a presented plaintext, as stored in the tokens table.
    pub fn hash_plaintext(plaintext: &str) -> Vec<u8> {
        Sha256::digest(plaintext.as_bytes()).to_vec()
    }
}

/// Shape check run before any storage lookup is attempted.
pub fn validate_token_plaintext(v: &mut Validator, plaintext: &str) {
    v.check(!plaintext.is_empty(), "token", "must be provided");
    v.check(
        plaintext.len() == PLAINTEXT_LENGTH,
        "token",
        "must be 26 bytes long",
    );
}

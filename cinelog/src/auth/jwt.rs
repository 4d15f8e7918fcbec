//! Stateless JWT authentication, accepted alongside opaque tokens.
//!
//! Tokens are HS256-signed with the configured secret and pinned to
//! this service as both issuer and audience. The subject carries the
//! user id; verification yields only that id, and the caller still
//! loads the user record itself.

use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::db::models::users::UserId;
use crate::errors::{Error, Result};

pub const ISSUER: &str = "cinelog.example.com";
pub const AUDIENCE: &str = "cinelog.example.com";

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iss: String,
    aud: String,
    iat: i64,
    nbf: i64,
    exp: i64,
}

pub fn issue(user_id: UserId, secret: &str, ttl: chrono::Duration) -> Result<String> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iss: ISSUER.to_string(),
        aud: AUDIENCE.to_string(),
        iat: now.timestamp(),
        nbf: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|err| {
        tracing::error!(error = %err, "failed to sign jwt");
        Error::Internal {
            operation: "sign authentication token".to_string(),
        }
    })
}

/// Verify a bearer JWT and return the user id it was issued for.
pub fn verify(token: &str, secret: &str) -> Result<UserId> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_issuer(&[ISSUER]);
    validation.set_audience(&[AUDIENCE]);
    validation.validate_nbf = true;

    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|err| match err.kind() {
        ErrorKind::InvalidToken
        | ErrorKind::InvalidSignature
        | ErrorKind::ExpiredSignature
        | ErrorKind::ImmatureSignature
        | ErrorKind::InvalidIssuer
        | ErrorKind::InvalidAudience
        | ErrorKind::InvalidAlgorithm
        | ErrorKind::Base64(_)
        | ErrorKind::Json(_)
        | ErrorKind::Utf8(_)
        | ErrorKind::MissingRequiredClaim(_) => Error::InvalidAuthenticationToken,
        other => {
            tracing::error!(error_kind = ?other, "jwt verification failed unexpectedly");
            Error::Internal {
                operation: "verify authentication token".to_string(),
            }
        }
    })?;

    data.claims
        .sub
        .parse()
        .map_err(|_| Error::InvalidAuthenticationToken)
}

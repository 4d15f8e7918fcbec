//! API request/response models for token endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateAuthenticationTokenRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Request an activation or password-reset token be re-sent by email.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmailRequest {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthenticationTokenResponse {
    pub token: String,
    pub expiry: DateTime<Utc>,
}

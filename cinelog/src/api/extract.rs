//! Strict request extraction.
//!
//! [`StrictJson`] replaces [`axum::Json`] on every mutating route. It
//! enforces the request-body contract: at most 1 MiB, exactly one JSON
//! value, no unknown keys (via `deny_unknown_fields` on the target
//! type), and turns decode failures into plain-English 400 messages
//! instead of serde's internal phrasing. [`StrictQuery`] does the same
//! envelope conversion for query-string rejections.

use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::StatusCode;
use axum::http::request::Parts;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::error::Category;

use crate::errors::Error;

/// Maximum accepted request body, in bytes.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub struct StrictJson<T>(pub T);

impl<T, S> FromRequest<S> for StrictJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state).await.map_err(|rejection| {
            let message = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
                format!("body must not be larger than {MAX_BODY_BYTES} bytes")
            } else {
                "body could not be read".to_string()
            };
            Error::BadRequest { message }
        })?;

        if bytes.is_empty() {
            return Err(Error::BadRequest {
                message: "body must not be empty".to_string(),
            });
        }

        let mut deserializer = serde_json::Deserializer::from_slice(&bytes);
        let value = T::deserialize(&mut deserializer).map_err(friendly_json_error)?;

        // Anything after the first value is a protocol violation
        deserializer.end().map_err(|_| Error::BadRequest {
            message: "body must only contain a single JSON value".to_string(),
        })?;

        Ok(StrictJson(value))
    }
}

/// Query-string extraction that fails with the JSON error envelope
/// rather than axum's plain-text 400.
pub struct StrictQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for StrictQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| Error::BadRequest {
                message: format!("invalid query string ({})", rejection.body_text()),
            })?;
        Ok(StrictQuery(value))
    }
}

fn friendly_json_error(err: serde_json::Error) -> Error {
    let message = match err.classify() {
        Category::Eof => "body contains badly-formed JSON".to_string(),
        Category::Syntax => format!(
            "body contains badly-formed JSON (at line {} column {})",
            err.line(),
            err.column()
        ),
        Category::Data => {
            let raw = err.to_string();
            if let Some(field) = unknown_field_name(&raw) {
                format!("body contains unknown key \"{field}\"")
            } else {
                // Strip serde's trailing location, keep the description
                let description = raw.split(" at line ").next().unwrap_or(&raw);
                format!("body contains invalid data ({description})")
            }
        }
        Category::Io => "body could not be read".to_string(),
    };
    Error::BadRequest { message }
}

fn unknown_field_name(message: &str) -> Option<&str> {
    message
        .strip_prefix("unknown field `")
        .and_then(|rest| rest.split('`').next())
}

//! Field-level validation with accumulated, field-keyed error messages.
//!
//! Handlers build a [`Validator`], run their checks, and convert any
//! accumulated failures into a single 422 response carrying the full
//! field→message map. Only the first failure per field is kept.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::Error;

/// Permissive email shape check using the WHATWG HTML input pattern.
static EMAIL_RX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)*$",
    )
    .unwrap_or_else(|e| panic!("invalid email regex: {e}"))
});

/// Accumulates validation failures keyed by field name.
#[derive(Debug, Default)]
pub struct Validator {
    errors: HashMap<String, String>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Record a failure for `field` unless one is already present.
    pub fn add_error(&mut self, field: &str, message: &str) {
        self.errors.entry(field.to_string()).or_insert_with(|| message.to_string());
    }

    /// Record a failure for `field` when `ok` is false.
    pub fn check(&mut self, ok: bool, field: &str, message: &str) {
        if !ok {
            self.add_error(field, message);
        }
    }

    /// Consume the validator, returning the accumulated errors as a 422.
    pub fn into_result(self) -> Result<(), Error> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(Error::FailedValidation { errors: self.errors })
        }
    }

    pub fn errors(&self) -> &HashMap<String, String> {
        &self.errors
    }
}

/// True when `value` looks like an email address.
pub fn matches_email(value: &str) -> bool {
    EMAIL_RX.is_match(value)
}

/// True when `value` appears in `permitted`.
pub fn permitted_value(value: &str, permitted: &[&str]) -> bool {
    permitted.contains(&value)
}

/// True when all items in `values` are distinct.
pub fn all_unique<T: PartialEq>(values: &[T]) -> bool {
    values.iter().enumerate().all(|(i, v)| !values[..i].contains(v))
}

//! Request-scoped identity.
//!
//! The authentication middleware resolves every request to exactly one
//! [`Principal`] and stores it as a request extension. There is no
//! "missing" state: an unauthenticated request carries
//! [`Principal::Anonymous`], so downstream code matches on the enum
//! instead of probing for absent extensions.

use crate::db::models::users::User;

#[derive(Debug, Clone)]
pub enum Principal {
    Anonymous,
    User(User),
}

impl Principal {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous)
    }

    pub fn user(&self) -> Option<&User> {
        match self {
            Principal::Anonymous => None,
            Principal::User(user) => Some(user),
        }
    }
}

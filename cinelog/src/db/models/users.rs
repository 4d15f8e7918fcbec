//! Database models for user accounts.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

pub type UserId = i64;

/// Database entity model. The password hash is the bcrypt output bytes;
/// it never leaves the db/auth layers.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: UserId,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub email: String,
    pub password_hash: Vec<u8>,
    pub activated: bool,
    pub version: i32,
}

/// Request for creating a user account
#[derive(Debug, Clone)]
pub struct UserCreateRequest {
    pub name: String,
    pub email: String,
    pub password_hash: Vec<u8>,
}

//! Database models for catalog movies.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

pub type MovieId = i64;

/// Database entity model
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Movie {
    pub id: MovieId,
    pub created_at: DateTime<Utc>,
    pub title: String,
    pub year: i32,
    /// Runtime in minutes
    pub runtime: i32,
    pub genres: Vec<String>,
    pub version: i32,
}

/// Request for creating a movie
#[derive(Debug, Clone)]
pub struct MovieCreateRequest {
    pub title: String,
    pub year: i32,
    pub runtime: i32,
    pub genres: Vec<String>,
}

//! Database record structures matching table schemas.
//!
//! Row structs derive `sqlx::FromRow` for query results and are kept
//! separate from the API models so the storage and API representations
//! can evolve independently.

pub mod movies;
pub mod tokens;
pub mod users;

//! Capability traits over persistence, with one Postgres implementation
//! and one in-memory test double per store.
//!
//! Handlers depend on these traits through [`Stores`], never on a
//! concrete backend, so every handler test can run against the
//! in-memory doubles without a database.

use std::sync::Arc;

use async_trait::async_trait;

use crate::api::models::filters::{Filters, Metadata};
use crate::db::errors::Result;
use crate::db::models::movies::{Movie, MovieCreateRequest, MovieId};
use crate::db::models::tokens::{Token, TokenScope};
use crate::db::models::users::{User, UserCreateRequest, UserId};

pub mod memory;
pub mod movies;
pub mod permissions;
pub mod tokens;
pub mod users;

pub use memory::MemoryStores;
pub use movies::PgMovieStore;
pub use permissions::{MOVIES_READ, MOVIES_WRITE, PgPermissionStore};
pub use tokens::PgTokenStore;
pub use users::PgUserStore;

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a new account. Duplicate emails surface as a unique
    /// violation from the single INSERT, never from a follow-up read.
    async fn insert(&self, request: &UserCreateRequest) -> Result<User>;

    async fn get(&self, id: UserId) -> Result<Option<User>>;

    async fn get_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Resolve the owner of a non-expired token with the given scope and
    /// digest. Wrong token, wrong scope and expired are all `None` -
    /// indistinguishable by design.
    async fn get_for_token(&self, scope: TokenScope, token_hash: &[u8]) -> Result<Option<User>>;

    /// Version-guarded write of the full record. Returns the new version;
    /// a stale `user.version` yields `DbError::NotFound`, which callers
    /// surface as an edit conflict.
    async fn update(&self, user: &User) -> Result<i32>;
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn insert(&self, token: &Token) -> Result<()>;

    /// Bulk-invalidate all outstanding tokens of one scope for one user.
    async fn delete_all_for_user(&self, user_id: UserId, scope: TokenScope) -> Result<()>;
}

#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Full permission-code set for a user, fetched fresh per call.
    async fn get_all_for_user(&self, user_id: UserId) -> Result<Vec<String>>;

    async fn add_for_user(&self, user_id: UserId, codes: &[&str]) -> Result<()>;
}

#[async_trait]
pub trait MovieStore: Send + Sync {
    async fn insert(&self, request: &MovieCreateRequest) -> Result<Movie>;

    async fn get(&self, id: MovieId) -> Result<Option<Movie>>;

    /// Version-guarded write, same contract as [`UserStore::update`].
    async fn update(&self, movie: &Movie) -> Result<i32>;

    /// Returns whether a row was deleted.
    async fn delete(&self, id: MovieId) -> Result<bool>;

    /// Filtered, sorted, paginated listing with pre-limit total metadata.
    /// Empty `title` and empty `genres` are no-op filters.
    async fn list(&self, title: &str, genres: &[String], filters: &Filters) -> Result<(Vec<Movie>, Metadata)>;
}

/// Bundle of store handles shared through application state.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStore>,
    pub movies: Arc<dyn MovieStore>,
    pub tokens: Arc<dyn TokenStore>,
    pub permissions: Arc<dyn PermissionStore>,
}

impl Stores {
    /// Production wiring over a shared connection pool.
    pub fn postgres(pool: sqlx::PgPool) -> Self {
        Self {
            users: Arc::new(PgUserStore::new(pool.clone())),
            movies: Arc::new(PgMovieStore::new(pool.clone())),
            tokens: Arc::new(PgTokenStore::new(pool.clone())),
            permissions: Arc::new(PgPermissionStore::new(pool)),
        }
    }

    /// In-memory doubles backed by a single shared dataset.
    pub fn in_memory() -> Self {
        MemoryStores::new().into_stores()
    }
}

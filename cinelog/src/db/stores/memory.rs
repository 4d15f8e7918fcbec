//! In-memory store doubles backed by one shared dataset.
//!
//! These mirror the Postgres implementations' observable behavior -
//! duplicate emails surface as unique violations, stale-version updates
//! as `NotFound`, expired tokens are invisible to lookups - so handler
//! tests exercise the same contract the production stores honor.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::api::models::filters::{Filters, Metadata};
use crate::db::errors::{DbError, Result};
use crate::db::models::movies::{Movie, MovieCreateRequest, MovieId};
use crate::db::models::tokens::{Token, TokenScope};
use crate::db::models::users::{User, UserCreateRequest, UserId};
use crate::db::stores::{MovieStore, PermissionStore, Stores, TokenStore, UserStore};

#[derive(Debug, Clone)]
struct TokenRow {
    hash: Vec<u8>,
    user_id: UserId,
    expiry: chrono::DateTime<Utc>,
    scope: TokenScope,
}

#[derive(Debug, Default)]
struct MemData {
    users: Vec<User>,
    movies: Vec<Movie>,
    tokens: Vec<TokenRow>,
    permissions: HashMap<UserId, HashSet<String>>,
    next_user_id: UserId,
    next_movie_id: MovieId,
}

/// Factory handing out store handles that all share the same dataset.
#[derive(Clone, Default)]
pub struct MemoryStores {
    data: Arc<Mutex<MemData>>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_stores(self) -> Stores {
        Stores {
            users: Arc::new(MemUserStore { data: self.data.clone() }),
            movies: Arc::new(MemMovieStore { data: self.data.clone() }),
            tokens: Arc::new(MemTokenStore { data: self.data.clone() }),
            permissions: Arc::new(MemPermissionStore { data: self.data }),
        }
    }
}

fn lock(data: &Mutex<MemData>) -> Result<MutexGuard<'_, MemData>> {
    data.lock().map_err(|_| DbError::Other(anyhow::anyhow!("store mutex poisoned")))
}

pub struct MemUserStore {
    data: Arc<Mutex<MemData>>,
}

#[async_trait]
impl UserStore for MemUserStore {
    async fn insert(&self, request: &UserCreateRequest) -> Result<User> {
        let mut data = lock(&self.data)?;

        if data.users.iter().any(|u| u.email.eq_ignore_ascii_case(&request.email)) {
            return Err(DbError::UniqueViolation {
                constraint: Some("users_email_key".to_string()),
                table: Some("users".to_string()),
                message: "duplicate key value violates unique constraint".to_string(),
            });
        }

        data.next_user_id += 1;
        let user = User {
            id: data.next_user_id,
            created_at: Utc::now(),
            name: request.name.clone(),
            email: request.email.clone(),
            password_hash: request.password_hash.clone(),
            activated: false,
            version: 1,
        };
        data.users.push(user.clone());
        Ok(user)
    }

    async fn get(&self, id: UserId) -> Result<Option<User>> {
        let data = lock(&self.data)?;
        Ok(data.users.iter().find(|u| u.id == id).cloned())
    }

    async fn get_by_email(&self, email: &str) -> Result<Option<User>> {
        let data = lock(&self.data)?;
        Ok(data.users.iter().find(|u| u.email.eq_ignore_ascii_case(email)).cloned())
    }

    async fn get_for_token(&self, scope: TokenScope, token_hash: &[u8]) -> Result<Option<User>> {
        let data = lock(&self.data)?;
        let now = Utc::now();
        let user_id = data
            .tokens
            .iter()
            .find(|t| t.hash == token_hash && t.scope == scope && t.expiry > now)
            .map(|t| t.user_id);
        Ok(user_id.and_then(|id| data.users.iter().find(|u| u.id == id).cloned()))
    }

    async fn update(&self, user: &User) -> Result<i32> {
        let mut data = lock(&self.data)?;
        let Some(existing) = data
            .users
            .iter_mut()
            .find(|u| u.id == user.id && u.version == user.version)
        else {
            return Err(DbError::NotFound);
        };

        existing.name = user.name.clone();
        existing.email = user.email.clone();
        existing.password_hash = user.password_hash.clone();
        existing.activated = user.activated;
        existing.version += 1;
        Ok(existing.version)
    }
}

pub struct MemTokenStore {
    data: Arc<Mutex<MemData>>,
}

#[async_trait]
impl TokenStore for MemTokenStore {
    async fn insert(&self, token: &Token) -> Result<()> {
        let mut data = lock(&self.data)?;
        data.tokens.push(TokenRow {
            hash: token.hash.clone(),
            user_id: token.user_id,
            expiry: token.expiry,
            scope: token.scope,
        });
        Ok(())
    }

    async fn delete_all_for_user(&self, user_id: UserId, scope: TokenScope) -> Result<()> {
        let mut data = lock(&self.data)?;
        data.tokens.retain(|t| !(t.user_id == user_id && t.scope == scope));
        Ok(())
    }
}

pub struct MemPermissionStore {
    data: Arc<Mutex<MemData>>,
}

#[async_trait]
impl PermissionStore for MemPermissionStore {
    async fn get_all_for_user(&self, user_id: UserId) -> Result<Vec<String>> {
        let data = lock(&self.data)?;
        Ok(data
            .permissions
            .get(&user_id)
            .map(|codes| codes.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn add_for_user(&self, user_id: UserId, codes: &[&str]) -> Result<()> {
        let mut data = lock(&self.data)?;
        let entry = data.permissions.entry(user_id).or_default();
        for code in codes {
            entry.insert(code.to_string());
        }
        Ok(())
    }
}

pub struct MemMovieStore {
    data: Arc<Mutex<MemData>>,
}

#[async_trait]
impl MovieStore for MemMovieStore {
    async fn insert(&self, request: &MovieCreateRequest) -> Result<Movie> {
        let mut data = lock(&self.data)?;
        data.next_movie_id += 1;
        let movie = Movie {
            id: data.next_movie_id,
            created_at: Utc::now(),
            title: request.title.clone(),
            year: request.year,
            runtime: request.runtime,
            genres: request.genres.clone(),
            version: 1,
        };
        data.movies.push(movie.clone());
        Ok(movie)
    }

    async fn get(&self, id: MovieId) -> Result<Option<Movie>> {
        let data = lock(&self.data)?;
        Ok(data.movies.iter().find(|m| m.id == id).cloned())
    }

    async fn update(&self, movie: &Movie) -> Result<i32> {
        let mut data = lock(&self.data)?;
        let Some(existing) = data
            .movies
            .iter_mut()
            .find(|m| m.id == movie.id && m.version == movie.version)
        else {
            return Err(DbError::NotFound);
        };

        existing.title = movie.title.clone();
        existing.year = movie.year;
        existing.runtime = movie.runtime;
        existing.genres = movie.genres.clone();
        existing.version += 1;
        Ok(existing.version)
    }

    async fn delete(&self, id: MovieId) -> Result<bool> {
        let mut data = lock(&self.data)?;
        let before = data.movies.len();
        data.movies.retain(|m| m.id != id);
        Ok(data.movies.len() < before)
    }

    async fn list(&self, title: &str, genres: &[String], filters: &Filters) -> Result<(Vec<Movie>, Metadata)> {
        let data = lock(&self.data)?;
        let title_lower = title.to_lowercase();

        let mut matched: Vec<Movie> = data
            .movies
            .iter()
            .filter(|m| title.is_empty() || m.title.to_lowercase().contains(&title_lower))
            .filter(|m| genres.is_empty() || genres.iter().all(|g| m.genres.contains(g)))
            .cloned()
            .collect();

        let column = filters.sort_column().to_string();
        let descending = filters.sort_direction() == "DESC";
        matched.sort_by(|a, b| {
            let ordering = match column.as_str() {
                "title" => a.title.cmp(&b.title),
                "year" => a.year.cmp(&b.year),
                "runtime" => a.runtime.cmp(&b.runtime),
                _ => a.id.cmp(&b.id),
            };
            let ordering = if descending { ordering.reverse() } else { ordering };
            // Stable secondary sort on id ascending
            ordering.then(a.id.cmp(&b.id))
        });

        let total = matched.len() as i64;
        let page: Vec<Movie> = matched
            .into_iter()
            .skip(filters.offset() as usize)
            .take(filters.limit() as usize)
            .collect();

        Ok((page, Metadata::calculate(total, filters.page, filters.page_size)))
    }
}

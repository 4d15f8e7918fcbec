//! Postgres-backed token store.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::tokens::{Token, TokenScope};
use crate::db::models::users::UserId;
use crate::db::stores::TokenStore;

pub struct PgTokenStore {
    pool: PgPool,
}

impl PgTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenStore for PgTokenStore {
    #[instrument(skip(self, token), fields(user_id = token.user_id, scope = %token.scope), err)]
    async fn insert(&self, token: &Token) -> Result<()> {
        sqlx::query("INSERT INTO tokens (hash, user_id, expiry, scope) VALUES ($1, $2, $3, $4)")
            .bind(&token.hash)
            .bind(token.user_id)
            .bind(token.expiry)
            .bind(token.scope.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[instrument(skip(self), fields(scope = %scope), err)]
    async fn delete_all_for_user(&self, user_id: UserId, scope: TokenScope) -> Result<()> {
        sqlx::query("DELETE FROM tokens WHERE user_id = $1 AND scope = $2")
            .bind(user_id)
            .bind(scope.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

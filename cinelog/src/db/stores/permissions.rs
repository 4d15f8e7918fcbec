//! Postgres-backed permission store.
//!
//! Permission codes are read-only from the API's perspective; rows in
//! the `permissions` table are seeded by migration and granted to users
//! through the `users_permissions` join table.

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::instrument;

use crate::db::errors::Result;
use crate::db::models::users::UserId;
use crate::db::stores::PermissionStore;

pub const MOVIES_READ: &str = "movies:read";
pub const MOVIES_WRITE: &str = "movies:write";

pub struct PgPermissionStore {
    pool: PgPool,
}

impl PgPermissionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PermissionStore for PgPermissionStore {
    #[instrument(skip(self), err)]
    async fn get_all_for_user(&self, user_id: UserId) -> Result<Vec<String>> {
        let codes = sqlx::query_scalar::<_, String>(
            r#"
            SELECT permissions.code
            FROM permissions
            INNER JOIN users_permissions ON users_permissions.permission_id = permissions.id
            WHERE users_permissions.user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(codes)
    }

    #[instrument(skip(self), err)]
    async fn add_for_user(&self, user_id: UserId, codes: &[&str]) -> Result<()> {
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        sqlx::query(
            r#"
            INSERT INTO users_permissions (user_id, permission_id)
            SELECT $1, permissions.id FROM permissions WHERE permissions.code = ANY($2)
            "#,
        )
        .bind(user_id)
        .bind(&codes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

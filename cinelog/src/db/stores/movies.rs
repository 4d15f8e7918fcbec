//! Postgres-backed movie store.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::instrument;

use crate::api::models::filters::{Filters, Metadata};
use crate::db::errors::Result;
use crate::db::models::movies::{Movie, MovieCreateRequest, MovieId};
use crate::db::stores::MovieStore;

pub struct PgMovieStore {
    pool: PgPool,
}

impl PgMovieStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MovieStore for PgMovieStore {
    #[instrument(skip(self, request), fields(title = %request.title), err)]
    async fn insert(&self, request: &MovieCreateRequest) -> Result<Movie> {
        let movie = sqlx::query_as::<_, Movie>(
            r#"
            INSERT INTO movies (title, year, runtime, genres)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at, title, year, runtime, genres, version
            "#,
        )
        .bind(&request.title)
        .bind(request.year)
        .bind(request.runtime)
        .bind(&request.genres)
        .fetch_one(&self.pool)
        .await?;

        Ok(movie)
    }

    #[instrument(skip(self), err)]
    async fn get(&self, id: MovieId) -> Result<Option<Movie>> {
        let movie = sqlx::query_as::<_, Movie>(
            "SELECT id, created_at, title, year, runtime, genres, version FROM movies WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(movie)
    }

    #[instrument(skip(self, movie), fields(id = movie.id, version = movie.version), err)]
    async fn update(&self, movie: &Movie) -> Result<i32> {
        let version = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE movies
            SET title = $1, year = $2, runtime = $3, genres = $4, version = version + 1
            WHERE id = $5 AND version = $6
            RETURNING version
            "#,
        )
        .bind(&movie.title)
        .bind(movie.year)
        .bind(movie.runtime)
        .bind(&movie.genres)
        .bind(movie.id)
        .bind(movie.version)
        .fetch_one(&self.pool)
        .await?;

        Ok(version)
    }

    #[instrument(skip(self), err)]
    async fn delete(&self, id: MovieId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM movies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, title, genres, filters), err)]
    async fn list(&self, title: &str, genres: &[String], filters: &Filters) -> Result<(Vec<Movie>, Metadata)> {
        // Empty inputs are no-op filters via the `OR $n = ...` arms. The
        // sort column is interpolated, not bound - it comes from
        // Filters::sort_column() which only yields safelisted names.
        let query = format!(
            r#"
            SELECT count(*) OVER() AS total_records,
                   id, created_at, title, year, runtime, genres, version
            FROM movies
            WHERE (LOWER(title) LIKE '%' || LOWER($1) || '%' OR $1 = '')
              AND (genres @> $2 OR $2 = '{{}}')
            ORDER BY {} {}, id ASC
            LIMIT $3 OFFSET $4
            "#,
            filters.sort_column(),
            filters.sort_direction(),
        );

        let rows = sqlx::query(&query)
            .bind(title)
            .bind(genres)
            .bind(filters.limit())
            .bind(filters.offset())
            .fetch_all(&self.pool)
            .await?;

        let total_records = match rows.first() {
            Some(row) => row.try_get::<i64, _>("total_records")?,
            None => 0,
        };

        let movies = rows
            .into_iter()
            .map(|row| {
                Ok(Movie {
                    id: row.try_get("id")?,
                    created_at: row.try_get("created_at")?,
                    title: row.try_get("title")?,
                    year: row.try_get("year")?,
                    runtime: row.try_get("runtime")?,
                    genres: row.try_get("genres")?,
                    version: row.try_get("version")?,
                })
            })
            .collect::<Result<Vec<Movie>>>()?;

        let metadata = Metadata::calculate(total_records, filters.page, filters.page_size);

        Ok((movies, metadata))
    }
}

//! API request/response models for movies.

use chrono::Datelike;
use serde::{Deserialize, Serialize};

use crate::api::models::runtime::Runtime;
use crate::db::models::movies::{Movie, MovieId};
use crate::validator::{Validator, all_unique};

/// Earliest acceptable release year (the first film ever made).
const MIN_YEAR: i32 = 1888;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateMovieRequest {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<Runtime>,
    pub genres: Option<Vec<String>>,
}

/// Partial update; absent fields keep their current value.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateMovieRequest {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<Runtime>,
    pub genres: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MovieResponse {
    pub id: MovieId,
    pub title: String,
    pub year: i32,
    pub runtime: Runtime,
    pub genres: Vec<String>,
    pub version: i32,
}

impl From<Movie> for MovieResponse {
    fn from(movie: Movie) -> Self {
        Self {
            id: movie.id,
            title: movie.title,
            year: movie.year,
            runtime: Runtime(movie.runtime),
            genres: movie.genres,
            version: movie.version,
        }
    }
}

/// Query parameters for listing movies. Numeric parameters stay as
/// strings here so a value like `page=abc` becomes a field-level
/// validation error rather than a deserialization failure; unknown
/// parameters are ignored.
#[derive(Debug, Deserialize)]
pub struct ListMoviesQuery {
    pub title: Option<String>,
    /// Comma-separated genre list, e.g. `genres=crime,drama`.
    pub genres: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
    pub sort: Option<String>,
}

/// Shared checks for fully-populated movie fields. Both create and
/// update run these after filling in their respective defaults.
pub fn validate_movie(
    v: &mut Validator,
    title: &str,
    year: i32,
    runtime: i32,
    genres: &[String],
) {
    v.check(!title.is_empty(), "title", "must be provided");
    v.check(title.len() <= 500, "title", "must not be more than 500 bytes long");

    v.check(year != 0, "year", "must be provided");
    v.check(year >= MIN_YEAR, "year", "must be greater than 1888");
    v.check(
        year <= chrono::Utc::now().year(),
        "year",
        "must not be in the future",
    );

    v.check(runtime != 0, "runtime", "must be provided");
    v.check(runtime > 0, "runtime", "must be a positive integer");

    v.check(!genres.is_empty(), "genres", "must contain at least 1 genre");
    v.check(genres.len() <= 5, "genres", "must not contain more than 5 genres");
    v.check(all_unique(genres), "genres", "must not contain duplicate values");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(title: &str, year: i32, runtime: i32, genres: &[&str]) -> Validator {
        let genres: Vec<String> = genres.iter().map(|g| g.to_string()).collect();
        let mut v = Validator::new();
        validate_movie(&mut v, title, year, runtime, &genres);
        v
    }

    #[test]
    fn test_valid_movie_passes() {
        let v = validate("Casablanca", 1942, 102, &["drama", "romance", "war"]);
        assert!(v.is_valid());
    }

    #[test]
    fn test_missing_fields_are_flagged() {
        let v = validate("", 0, 0, &[]);
        assert!(!v.is_valid());
        assert_eq!(v.errors().get("title").map(String::as_str), Some("must be provided"));
        assert_eq!(v.errors().get("year").map(String::as_str), Some("must be provided"));
        assert_eq!(v.errors().get("runtime").map(String::as_str), Some("must be provided"));
        assert_eq!(
            v.errors().get("genres").map(String::as_str),
            Some("must contain at least 1 genre")
        );
    }

    #[test]
    fn test_year_bounds() {
        assert!(!validate("Old", 1800, 90, &["drama"]).is_valid());
        assert!(!validate("Future", chrono::Utc::now().year() + 1, 90, &["drama"]).is_valid());
    }

    #[test]
    fn test_duplicate_genres_rejected() {
        let v = validate("Dup", 2000, 90, &["drama", "drama"]);
        assert_eq!(
            v.errors().get("genres").map(String::as_str),
            Some("must not contain duplicate values")
        );
    }
}

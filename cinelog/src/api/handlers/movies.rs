//! Movie CRUD and listing handlers.

use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header::LOCATION};
use axum::response::Json;
use axum::Extension;
use serde_json::{Value, json};
use tracing::instrument;

use crate::api::extract::{StrictJson, StrictQuery};
use crate::api::models::filters::Filters;
use crate::api::models::movies::{
    CreateMovieRequest, ListMoviesQuery, MovieResponse, UpdateMovieRequest, validate_movie,
};
use crate::auth::{Principal, require_permission};
use crate::db::DbError;
use crate::db::models::movies::{MovieCreateRequest, MovieId};
use crate::db::stores::{MOVIES_READ, MOVIES_WRITE};
use crate::errors::{Error, Result};
use crate::validator::Validator;
use crate::AppState;

const SORT_SAFELIST: &[&str] = &[
    "id", "title", "year", "runtime", "-id", "-title", "-year", "-runtime",
];

/// POST /v1/movies
#[instrument(skip(state, principal, request))]
pub async fn create_movie(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    StrictJson(request): StrictJson<CreateMovieRequest>,
) -> Result<(StatusCode, HeaderMap, Json<Value>)> {
    require_permission(&state.stores, &principal, MOVIES_WRITE).await?;

    let title = request.title.unwrap_or_default();
    let year = request.year.unwrap_or_default();
    let runtime = request.runtime.map(i32::from).unwrap_or_default();
    let genres = request.genres.unwrap_or_default();

    let mut v = Validator::new();
    validate_movie(&mut v, &title, year, runtime, &genres);
    v.into_result()?;

    let movie = state
        .stores
        .movies
        .insert(&MovieCreateRequest {
            title,
            year,
            runtime,
            genres,
        })
        .await?;

    let mut headers = HeaderMap::new();
    let location = format!("/v1/movies/{}", movie.id);
    headers.insert(
        LOCATION,
        HeaderValue::from_str(&location).map_err(|_| Error::Internal {
            operation: "build location header".to_string(),
        })?,
    );

    Ok((
        StatusCode::CREATED,
        headers,
        Json(json!({ "movie": MovieResponse::from(movie) })),
    ))
}

/// GET /v1/movies/{id}
#[instrument(skip(state, principal))]
pub async fn show_movie(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<MovieId>,
) -> Result<Json<Value>> {
    require_permission(&state.stores, &principal, MOVIES_READ).await?;

    let movie = state.stores.movies.get(id).await?.ok_or(Error::NotFound)?;
    Ok(Json(json!({ "movie": MovieResponse::from(movie) })))
}

/// PATCH /v1/movies/{id}
///
/// Partial update: absent fields keep their stored value. The movie's
/// current version rides along into the store update, so a concurrent
/// edit surfaces as a 409 instead of silently losing one write.
#[instrument(skip(state, principal, request))]
pub async fn update_movie(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<MovieId>,
    StrictJson(request): StrictJson<UpdateMovieRequest>,
) -> Result<Json<Value>> {
    require_permission(&state.stores, &principal, MOVIES_WRITE).await?;

    let mut movie = state.stores.movies.get(id).await?.ok_or(Error::NotFound)?;

    if let Some(title) = request.title {
        movie.title = title;
    }
    if let Some(year) = request.year {
        movie.year = year;
    }
    if let Some(runtime) = request.runtime {
        movie.runtime = runtime.into();
    }
    if let Some(genres) = request.genres {
        movie.genres = genres;
    }

    let mut v = Validator::new();
    validate_movie(&mut v, &movie.title, movie.year, movie.runtime, &movie.genres);
    v.into_result()?;

    movie.version = state.stores.movies.update(&movie).await.map_err(edit_conflict)?;

    Ok(Json(json!({ "movie": MovieResponse::from(movie) })))
}

/// DELETE /v1/movies/{id}
#[instrument(skip(state, principal))]
pub async fn delete_movie(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(id): Path<MovieId>,
) -> Result<Json<Value>> {
    require_permission(&state.stores, &principal, MOVIES_WRITE).await?;

    if !state.stores.movies.delete(id).await? {
        return Err(Error::NotFound);
    }
    Ok(Json(json!({ "message": "movie successfully deleted" })))
}

/// GET /v1/movies
#[instrument(skip(state, principal))]
pub async fn list_movies(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    StrictQuery(query): StrictQuery<ListMoviesQuery>,
) -> Result<Json<Value>> {
    require_permission(&state.stores, &principal, MOVIES_READ).await?;

    let title = query.title.unwrap_or_default();
    let genres: Vec<String> = query
        .genres
        .as_deref()
        .map(|value| value.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    let mut v = Validator::new();
    let filters = Filters {
        page: parse_positive(&mut v, "page", query.page.as_deref(), 1),
        page_size: parse_positive(&mut v, "page_size", query.page_size.as_deref(), 20),
        sort: query.sort.unwrap_or_else(|| "id".to_string()),
        sort_safelist: SORT_SAFELIST,
    };
    filters.validate(&mut v);
    v.into_result()?;

    let (movies, metadata) = state.stores.movies.list(&title, &genres, &filters).await?;
    let movies: Vec<MovieResponse> = movies.into_iter().map(MovieResponse::from).collect();

    Ok(Json(json!({ "movies": movies, "metadata": metadata })))
}

/// Query parameters arrive as strings; a non-integer value is a
/// validation failure, not a 400.
fn parse_positive(v: &mut Validator, field: &'static str, raw: Option<&str>, default: i64) -> i64 {
    match raw {
        None => default,
        Some(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                v.add_error(field, "must be an integer value");
                default
            }
        },
    }
}

/// A version-guard miss on update means someone else got there first.
fn edit_conflict(err: DbError) -> Error {
    match err {
        DbError::NotFound => Error::EditConflict,
        other => Error::from(other),
    }
}

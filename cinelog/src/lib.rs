//! Cinelog: a JSON API for managing a movie database.
//!
//! The crate is organized around a small set of layers:
//!
//! - [`api`]: request/response models, strict JSON extraction, handlers
//! - [`auth`]: password hashing, opaque-token and JWT verification, the
//!   authentication middleware and authorization gates
//! - [`db`]: capability-trait stores with a Postgres implementation and
//!   an in-memory double used throughout the tests
//! - [`limits`], [`background`], [`email`]: per-client rate limiting,
//!   tracked background tasks, and outbound mail
//!
//! [`Application`] wires everything together: it connects the pool,
//! runs migrations, starts the limiter sweep, and serves the router
//! with graceful shutdown that drains in-flight background work.

pub mod api;
pub mod auth;
pub mod background;
pub mod config;
pub mod db;
pub mod email;
pub mod errors;
pub mod limits;
pub mod metrics;
pub mod telemetry;
pub mod validator;

#[cfg(test)]
pub mod test_utils;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{self, HeaderValue, Method, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use bon::Builder;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::{Level, info};

pub use config::Config;

use crate::api::extract::MAX_BODY_BYTES;
use crate::api::handlers::{healthcheck, movies, tokens, users};
use crate::background::BackgroundTasks;
use crate::config::LimiterConfig;
use crate::db::Stores;
use crate::email::Mailer;
use crate::errors::Error;
use crate::limits::RateLimiter;
use crate::metrics::Metrics;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application state shared across all request handlers.
#[derive(Clone, Builder)]
pub struct AppState {
    pub stores: Stores,
    pub config: Config,
    pub mailer: Mailer,
    pub limiter: Arc<RateLimiter>,
    pub background: BackgroundTasks,
    pub metrics: Arc<Metrics>,
}

/// Get the cinelog database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let mut origins = Vec::new();
    for origin in &config.cors.trusted_origins {
        origins.push(origin.parse::<HeaderValue>()?);
    }

    Ok(CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([http::header::AUTHORIZATION, http::header::CONTENT_TYPE])
        .expose_headers(vec![http::header::LOCATION]))
}

/// Recover a panicking handler into the standard 500 envelope. The
/// connection is closed afterwards since the stream state is unknown.
fn handle_panic(payload: Box<dyn std::any::Any + Send + 'static>) -> Response {
    tracing::error!(panic = background::panic_message(payload.as_ref()), "request handler panicked");

    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        axum::response::Json(serde_json::json!({
            "error": "the server encountered a problem and could not process your request"
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(http::header::CONNECTION, HeaderValue::from_static("close"));
    response
}

async fn not_found() -> Error {
    Error::NotFound
}

async fn method_not_allowed(method: Method) -> Error {
    Error::MethodNotAllowed {
        method: method.to_string(),
    }
}

/// Build the application router with all endpoints and middleware.
///
/// Middleware nesting, outermost first: request metrics, body-size cap,
/// request tracing, panic recovery, CORS, rate limiting,
/// authentication. The limiter therefore rejects over-budget clients
/// before any credential work, authentication runs for every route so
/// handlers always find a [`auth::Principal`] extension, and the
/// metrics layer counts every response, recovered panics included.
pub fn build_router(state: AppState) -> anyhow::Result<Router> {
    let v1 = Router::new()
        .route("/healthcheck", get(healthcheck::healthcheck))
        .route("/movies", get(movies::list_movies).post(movies::create_movie))
        .route(
            "/movies/{id}",
            get(movies::show_movie)
                .patch(movies::update_movie)
                .delete(movies::delete_movie),
        )
        .route("/users", post(users::register_user))
        .route("/users/activated", put(users::activate_user))
        .route("/users/password", put(users::update_password))
        .route("/tokens/authentication", post(tokens::create_authentication_token))
        .route("/tokens/activation", post(tokens::create_activation_token))
        .route("/tokens/password-reset", post(tokens::create_password_reset_token))
        .method_not_allowed_fallback(method_not_allowed);

    let router = Router::new()
        .nest("/v1", v1)
        .route("/debug/vars", get(metrics::show_metrics))
        .fallback(not_found)
        .layer(from_fn_with_state(state.clone(), auth::authenticate))
        .layer(from_fn_with_state(state.clone(), limits::rate_limit))
        .layer(create_cors_layer(&state.config)?)
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().level(Level::INFO)))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(from_fn_with_state(state.clone(), metrics::record_metrics))
        .with_state(state);

    Ok(router)
}

/// Long-running service tasks owned by the application, currently just
/// the rate-limiter sweep.
pub struct BackgroundServices {
    handles: Vec<JoinHandle<()>>,
    shutdown_token: CancellationToken,
}

impl BackgroundServices {
    pub fn start(limiter: Arc<RateLimiter>, config: &LimiterConfig) -> Self {
        let shutdown_token = CancellationToken::new();
        let mut handles = Vec::new();

        if config.enabled {
            let token = shutdown_token.clone();
            let sweep_interval = config.sweep_interval;
            let idle_timeout = config.idle_timeout;
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(sweep_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            let evicted = limiter.sweep(idle_timeout);
                            if evicted > 0 {
                                tracing::debug!(evicted, "swept idle rate limiter clients");
                            }
                        }
                    }
                }
            }));
        }

        Self {
            handles,
            shutdown_token,
        }
    }

    pub async fn shutdown(self) {
        self.shutdown_token.cancel();
        for handle in self.handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "background service failed to join");
            }
        }
    }
}

/// Main application struct that owns all resources and lifecycle.
///
/// 1. **Create**: [`Application::new`] connects the pool, runs
///    migrations, and starts background services
/// 2. **Serve**: [`Application::serve`] binds a TCP port and handles
///    requests until the shutdown future resolves
/// 3. **Shutdown**: background work is drained, then the pool closes
pub struct Application {
    router: Router,
    state: AppState,
    pool: PgPool,
    bg_services: BackgroundServices,
    bind_address: String,
}

impl Application {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        // statement_timeout bounds every query server-side; a hung
        // statement surfaces as a database error, not a stuck worker.
        let timeout_ms = config.database.query_timeout.as_millis().to_string();
        let connect_options = config
            .database
            .url
            .parse::<PgConnectOptions>()?
            .options([("statement_timeout", timeout_ms.as_str())]);

        let pool = PgPoolOptions::new()
            .max_connections(config.database.max_open_conns)
            .idle_timeout(config.database.max_idle_time)
            .acquire_timeout(config.database.query_timeout)
            .connect_with(connect_options)
            .await?;

        migrator().run(&pool).await?;
        info!("database migrations applied");

        let limiter = Arc::new(RateLimiter::new(
            config.limiter.enabled,
            config.limiter.rps,
            config.limiter.burst,
        ));
        let bg_services = BackgroundServices::start(limiter.clone(), &config.limiter);
        let bind_address = config.bind_address();
        let mailer = Mailer::new(&config)?;

        let state = AppState::builder()
            .stores(Stores::postgres(pool.clone()))
            .config(config)
            .mailer(mailer)
            .limiter(limiter)
            .background(BackgroundTasks::new())
            .metrics(Arc::new(Metrics::new()))
            .build();

        let router = build_router(state.clone())?;

        Ok(Self {
            router,
            state,
            pool,
            bg_services,
            bind_address,
        })
    }

    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(&self.bind_address).await?;
        info!(address = %self.bind_address, "cinelog listening");

        axum::serve(
            listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("server stopped accepting connections, draining background work");
        self.bg_services.shutdown().await;
        self.state.background.drain().await;

        info!("closing database connections");
        self.pool.close().await;

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::models::filters::{Filters, Metadata};
    use crate::auth::jwt;
    use crate::db::DbError;
    use crate::db::errors::Result as DbResult;
    use crate::db::models::movies::{Movie, MovieCreateRequest, MovieId};
    use crate::db::models::tokens::{Token, TokenScope};
    use crate::db::stores::{MOVIES_READ, MOVIES_WRITE, MovieStore};
    use crate::test_utils::{TEST_JWT_SECRET, TEST_PASSWORD, spawn_app, spawn_app_with, spawn_app_with_stores};
    use async_trait::async_trait;
    use serde_json::{Value, json};

    #[tokio::test]
    async fn test_healthcheck() {
        let app = spawn_app();
        let response = app.server.get("/v1/healthcheck").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["status"], "available");
        assert_eq!(body["system_info"]["environment"], "development");
        assert_eq!(body["system_info"]["version"], VERSION);
    }

    #[tokio::test]
    async fn test_unknown_route_returns_json_404() {
        let app = spawn_app();
        let response = app.server.get("/v1/nonexistent").await;

        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
        let body: Value = response.json();
        assert_eq!(body["error"], "the requested resource could not be found");
    }

    #[tokio::test]
    async fn test_wrong_method_returns_json_405() {
        let app = spawn_app();
        let response = app.server.delete("/v1/healthcheck").await;

        assert_eq!(response.status_code(), StatusCode::METHOD_NOT_ALLOWED);
        let body: Value = response.json();
        assert_eq!(body["error"], "the DELETE method is not supported for this resource");
    }

    #[tokio::test]
    async fn test_register_user() {
        let app = spawn_app();
        let response = app
            .server
            .post("/v1/users")
            .json(&json!({
                "name": "Alice Smith",
                "email": "alice@example.com",
                "password": TEST_PASSWORD,
            }))
            .await;

        assert_eq!(response.status_code(), StatusCode::CREATED);
        let body: Value = response.json();
        assert_eq!(body["user"]["name"], "Alice Smith");
        assert_eq!(body["user"]["email"], "alice@example.com");
        assert_eq!(body["user"]["activated"], false);
        assert!(body["user"].get("password_hash").is_none());

        // The welcome email goes out in the background
        app.state.background.drain().await;
        let token = app.token_from_mail();
        assert_eq!(token.len(), 26);
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let app = spawn_app();
        app.seed_user("alice@example.com", false, &[]).await;

        let response = app
            .server
            .post("/v1/users")
            .json(&json!({
                "name": "Alice Again",
                "email": "alice@example.com",
                "password": TEST_PASSWORD,
            }))
            .await;

        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["error"]["email"], "a user with this email address already exists");
    }

    #[tokio::test]
    async fn test_register_validation_errors() {
        let app = spawn_app();
        let response = app
            .server
            .post("/v1/users")
            .json(&json!({
                "name": "",
                "email": "not-an-email",
                "password": "short",
            }))
            .await;

        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["error"]["name"], "must be provided");
        assert_eq!(body["error"]["email"], "must be a valid email address");
        assert_eq!(body["error"]["password"], "must be at least 8 bytes long");
    }

    #[tokio::test]
    async fn test_register_rejects_unknown_keys_and_bad_bodies() {
        let app = spawn_app();

        let response = app
            .server
            .post("/v1/users")
            .json(&json!({ "name": "A", "email": "a@example.com", "password": TEST_PASSWORD, "rating": 5 }))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], r#"body contains unknown key "rating""#);

        let response = app.server.post("/v1/users").text("{}{}").await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "body must only contain a single JSON value");

        let response = app.server.post("/v1/users").text("").await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert_eq!(body["error"], "body must not be empty");
    }

    #[tokio::test]
    async fn test_activation_flow() {
        let app = spawn_app();
        let (user, _) = app.seed_user("alice@example.com", false, &[]).await;
        let token = Token::generate(user.id, chrono::Duration::days(3), TokenScope::Activation);
        app.state.stores.tokens.insert(&token).await.unwrap();

        let response = app
            .server
            .put("/v1/users/activated")
            .json(&json!({ "token": token.plaintext }))
            .await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["user"]["activated"], true);

        // The token is single-use
        let response = app
            .server
            .put("/v1/users/activated")
            .json(&json!({ "token": token.plaintext }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["error"]["token"], "invalid or expired activation token");
    }

    #[tokio::test]
    async fn test_activation_rejects_garbage_token() {
        let app = spawn_app();

        let response = app
            .server
            .put("/v1/users/activated")
            .json(&json!({ "token": "too-short" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["error"]["token"], "must be 26 bytes long");

        let response = app
            .server
            .put("/v1/users/activated")
            .json(&json!({ "token": "A".repeat(26) }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["error"]["token"], "invalid or expired activation token");
    }

    #[tokio::test]
    async fn test_create_authentication_token() {
        let app = spawn_app();
        app.seed_user("alice@example.com", false, &[]).await;

        // Activation is not required to log in
        let response = app
            .server
            .post("/v1/tokens/authentication")
            .json(&json!({ "email": "alice@example.com", "password": TEST_PASSWORD }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        let body: Value = response.json();
        let token = body["authentication_token"]["token"].as_str().unwrap();
        assert_eq!(token.len(), 26);
        assert!(body["authentication_token"]["expiry"].is_string());

        // Wrong password and unknown email get the identical 401
        let response = app
            .server
            .post("/v1/tokens/authentication")
            .json(&json!({ "email": "alice@example.com", "password": "wrong password" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        let wrong_password: Value = response.json();

        let response = app
            .server
            .post("/v1/tokens/authentication")
            .json(&json!({ "email": "nobody@example.com", "password": TEST_PASSWORD }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        let unknown_email: Value = response.json();

        assert_eq!(wrong_password, unknown_email);
        assert_eq!(wrong_password["error"], "invalid authentication credentials");
    }

    #[tokio::test]
    async fn test_authorization_gates() {
        let app = spawn_app();

        // Anonymous
        let response = app.server.get("/v1/movies").await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        let body: Value = response.json();
        assert_eq!(body["error"], "you must be authenticated to access this resource");

        // Authenticated but not activated
        let (_, token) = app.seed_user("inactive@example.com", false, &[MOVIES_READ]).await;
        let response = app.server.get("/v1/movies").authorization_bearer(&token).await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(body["error"], "your user account must be activated to access this resource");

        // Activated, read-only user cannot write
        let (_, token) = app.seed_user("reader@example.com", true, &[MOVIES_READ]).await;
        let response = app
            .server
            .post("/v1/movies")
            .authorization_bearer(&token)
            .json(&json!({ "title": "Moana", "year": 2016, "runtime": "107 mins", "genres": ["animation"] }))
            .await;
        assert_eq!(response.status_code(), StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(
            body["error"],
            "your user account doesn't have the necessary permissions to access this resource"
        );
    }

    #[tokio::test]
    async fn test_malformed_authorization_header() {
        let app = spawn_app();
        let response = app
            .server
            .get("/v1/movies")
            .add_header(http::header::AUTHORIZATION, "Basic dXNlcjpwYXNz")
            .await;

        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(http::header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );
        let body: Value = response.json();
        assert_eq!(body["error"], "invalid or missing authentication token");
    }

    #[tokio::test]
    async fn test_jwt_bearer_is_accepted() {
        let app = spawn_app();
        let (user, _) = app
            .seed_user("writer@example.com", true, &[MOVIES_READ, MOVIES_WRITE])
            .await;
        let jwt = jwt::issue(user.id, TEST_JWT_SECRET, chrono::Duration::hours(1)).unwrap();

        let response = app.server.get("/v1/movies").authorization_bearer(&jwt).await;
        assert_eq!(response.status_code(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_movie_crud() {
        let app = spawn_app();
        let (_, token) = app
            .seed_user("writer@example.com", true, &[MOVIES_READ, MOVIES_WRITE])
            .await;

        // Create
        let response = app
            .server
            .post("/v1/movies")
            .authorization_bearer(&token)
            .json(&json!({
                "title": "Casablanca",
                "year": 1942,
                "runtime": "102 mins",
                "genres": ["drama", "romance", "war"],
            }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
        let body: Value = response.json();
        let id = body["movie"]["id"].as_i64().unwrap();
        assert_eq!(body["movie"]["runtime"], "102 mins");
        assert_eq!(body["movie"]["version"], 1);
        assert_eq!(
            response.headers().get(http::header::LOCATION).unwrap(),
            &format!("/v1/movies/{id}").parse::<HeaderValue>().unwrap()
        );

        // Show
        let response = app
            .server
            .get(&format!("/v1/movies/{id}"))
            .authorization_bearer(&token)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["movie"]["title"], "Casablanca");

        // Partial update: only the runtime changes
        let response = app
            .server
            .patch(&format!("/v1/movies/{id}"))
            .authorization_bearer(&token)
            .json(&json!({ "runtime": "105 mins" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["movie"]["title"], "Casablanca");
        assert_eq!(body["movie"]["runtime"], "105 mins");
        assert_eq!(body["movie"]["version"], 2);

        // Delete
        let response = app
            .server
            .delete(&format!("/v1/movies/{id}"))
            .authorization_bearer(&token)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["message"], "movie successfully deleted");

        let response = app
            .server
            .get(&format!("/v1/movies/{id}"))
            .authorization_bearer(&token)
            .await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_movie_validation() {
        let app = spawn_app();
        let (_, token) = app
            .seed_user("writer@example.com", true, &[MOVIES_WRITE])
            .await;

        let response = app
            .server
            .post("/v1/movies")
            .authorization_bearer(&token)
            .json(&json!({ "title": "", "year": 1800, "runtime": "-10 mins", "genres": [] }))
            .await;

        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["error"]["title"], "must be provided");
        assert_eq!(body["error"]["year"], "must be greater than 1888");
        assert_eq!(body["error"]["runtime"], "must be a positive integer");
        assert_eq!(body["error"]["genres"], "must contain at least 1 genre");

        // A malformed runtime string never reaches validation
        let response = app
            .server
            .post("/v1/movies")
            .authorization_bearer(&token)
            .json(&json!({ "title": "M", "year": 1931, "runtime": "93 minutes", "genres": ["crime"] }))
            .await;
        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert!(body["error"].as_str().unwrap().contains("invalid runtime format"));
    }

    #[tokio::test]
    async fn test_list_movies_filters_and_metadata() {
        let app = spawn_app();
        let (_, token) = app.seed_user("reader@example.com", true, &[MOVIES_READ]).await;

        for (title, year, genres) in [
            ("Casablanca", 1942, vec!["drama", "romance", "war"]),
            ("The Breakfast Club", 1985, vec!["drama", "comedy"]),
            ("Moana", 2016, vec!["animation", "adventure"]),
        ] {
            app.state
                .stores
                .movies
                .insert(&MovieCreateRequest {
                    title: title.to_string(),
                    year,
                    runtime: 100,
                    genres: genres.into_iter().map(String::from).collect(),
                })
                .await
                .unwrap();
        }

        // Title filter is case-insensitive substring
        let response = app
            .server
            .get("/v1/movies")
            .add_query_param("title", "breakfast")
            .authorization_bearer(&token)
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["movies"].as_array().unwrap().len(), 1);
        assert_eq!(body["movies"][0]["title"], "The Breakfast Club");
        assert_eq!(body["metadata"]["total_records"], 1);

        // Genre filter requires every listed genre
        let response = app
            .server
            .get("/v1/movies")
            .add_query_param("genres", "drama,comedy")
            .authorization_bearer(&token)
            .await;
        let body: Value = response.json();
        assert_eq!(body["movies"].as_array().unwrap().len(), 1);

        // Descending year sort
        let response = app
            .server
            .get("/v1/movies")
            .add_query_param("sort", "-year")
            .authorization_bearer(&token)
            .await;
        let body: Value = response.json();
        assert_eq!(body["movies"][0]["title"], "Moana");
        assert_eq!(body["metadata"]["current_page"], 1);
        assert_eq!(body["metadata"]["last_page"], 1);
        assert_eq!(body["metadata"]["total_records"], 3);

        // No matches: empty list and an empty metadata object
        let response = app
            .server
            .get("/v1/movies")
            .add_query_param("title", "zzz")
            .authorization_bearer(&token)
            .await;
        let body: Value = response.json();
        assert_eq!(body["movies"].as_array().unwrap().len(), 0);
        assert_eq!(body["metadata"], json!({}));
    }

    #[tokio::test]
    async fn test_list_movies_rejects_bad_parameters() {
        let app = spawn_app();
        let (_, token) = app.seed_user("reader@example.com", true, &[MOVIES_READ]).await;

        let response = app
            .server
            .get("/v1/movies")
            .add_query_param("page", "abc")
            .add_query_param("sort", "price")
            .authorization_bearer(&token)
            .await;

        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["error"]["page"], "must be an integer value");
        assert_eq!(body["error"]["sort"], "invalid sort value");
    }

    #[tokio::test]
    async fn test_list_movies_bad_query_string_gets_json_envelope() {
        let app = spawn_app();
        let (_, token) = app.seed_user("reader@example.com", true, &[MOVIES_READ]).await;

        // A repeated key fails query deserialization before the handler
        let response = app
            .server
            .get("/v1/movies?page=1&page=2")
            .authorization_bearer(&token)
            .await;

        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body: Value = response.json();
        assert!(
            body["error"].as_str().unwrap().starts_with("invalid query string"),
            "{body}"
        );
    }

    /// Delegating movie store that lands a rival write between a
    /// caller's read and its version-guarded update, so the first
    /// guarded update always observes a stale version.
    struct ContendedMovieStore {
        inner: Arc<dyn MovieStore>,
    }

    #[async_trait]
    impl MovieStore for ContendedMovieStore {
        async fn insert(&self, request: &MovieCreateRequest) -> DbResult<Movie> {
            self.inner.insert(request).await
        }

        async fn get(&self, id: MovieId) -> DbResult<Option<Movie>> {
            self.inner.get(id).await
        }

        async fn update(&self, movie: &Movie) -> DbResult<i32> {
            let mut current = self.inner.get(movie.id).await?.ok_or(DbError::NotFound)?;
            if current.version == movie.version {
                current.title = format!("{} (rival edit)", current.title);
                self.inner.update(&current).await?;
            }
            self.inner.update(movie).await
        }

        async fn delete(&self, id: MovieId) -> DbResult<bool> {
            self.inner.delete(id).await
        }

        async fn list(&self, title: &str, genres: &[String], filters: &Filters) -> DbResult<(Vec<Movie>, Metadata)> {
            self.inner.list(title, genres, filters).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_movie_update_returns_conflict() {
        let mut stores = Stores::in_memory();
        stores.movies = Arc::new(ContendedMovieStore {
            inner: stores.movies.clone(),
        });
        let app = spawn_app_with_stores(stores, |_| {});
        let (_, token) = app.seed_user("writer@example.com", true, &[MOVIES_WRITE]).await;

        let movie = app
            .state
            .stores
            .movies
            .insert(&MovieCreateRequest {
                title: "Casablanca".to_string(),
                year: 1942,
                runtime: 102,
                genres: vec!["drama".to_string()],
            })
            .await
            .unwrap();

        let response = app
            .server
            .patch(&format!("/v1/movies/{}", movie.id))
            .authorization_bearer(&token)
            .json(&json!({ "runtime": "105 mins" }))
            .await;

        assert_eq!(response.status_code(), StatusCode::CONFLICT);
        let body: Value = response.json();
        assert_eq!(
            body["error"],
            "unable to update the record due to an edit conflict, please try again"
        );
    }

    #[tokio::test]
    async fn test_debug_vars_reports_request_counts() {
        let app = spawn_app();
        app.server.get("/v1/healthcheck").await;
        app.server.get("/v1/healthcheck").await;
        app.server.get("/v1/nonexistent").await;

        let response = app.server.get("/debug/vars").await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        // The snapshot request itself has been received but not yet
        // answered when the counters are read
        assert_eq!(body["total_requests_received"], 4);
        assert_eq!(body["total_responses_sent"], 3);
        assert_eq!(body["total_responses_sent_by_status"]["200"], 2);
        assert_eq!(body["total_responses_sent_by_status"]["404"], 1);
        assert!(body["total_processing_time_micros"].is_u64());
    }

    #[tokio::test]
    async fn test_password_reset_flow() {
        let app = spawn_app();
        app.seed_user("alice@example.com", true, &[]).await;

        let response = app
            .server
            .post("/v1/tokens/password-reset")
            .json(&json!({ "email": "alice@example.com" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::ACCEPTED);

        // The token travels by email
        app.state.background.drain().await;
        let reset_token = app.token_from_mail();

        let response = app
            .server
            .put("/v1/users/password")
            .json(&json!({ "password": "brand new password", "token": reset_token }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);
        let body: Value = response.json();
        assert_eq!(body["error"], Value::Null);
        assert_eq!(body["message"], "your password was successfully reset");

        // Old password no longer works, new one does
        let response = app
            .server
            .post("/v1/tokens/authentication")
            .json(&json!({ "email": "alice@example.com", "password": TEST_PASSWORD }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);

        let response = app
            .server
            .post("/v1/tokens/authentication")
            .json(&json!({ "email": "alice@example.com", "password": "brand new password" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::CREATED);
    }

    #[tokio::test]
    async fn test_password_reset_requires_activated_account() {
        let app = spawn_app();
        app.seed_user("inactive@example.com", false, &[]).await;

        let response = app
            .server
            .post("/v1/tokens/password-reset")
            .json(&json!({ "email": "inactive@example.com" }))
            .await;

        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["error"]["email"], "user account must be activated");
    }

    #[tokio::test]
    async fn test_resend_activation_token() {
        let app = spawn_app();
        app.seed_user("inactive@example.com", false, &[]).await;

        let response = app
            .server
            .post("/v1/tokens/activation")
            .json(&json!({ "email": "inactive@example.com" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::ACCEPTED);

        app.state.background.drain().await;
        let token = app.token_from_mail();
        let response = app
            .server
            .put("/v1/users/activated")
            .json(&json!({ "token": token }))
            .await;
        assert_eq!(response.status_code(), StatusCode::OK);

        // Asking again once activated is refused
        let response = app
            .server
            .post("/v1/tokens/activation")
            .json(&json!({ "email": "inactive@example.com" }))
            .await;
        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = response.json();
        assert_eq!(body["error"]["email"], "user has already been activated");
    }

    #[tokio::test]
    async fn test_rate_limit_rejects_burst_overflow() {
        let app = spawn_app_with(|config| {
            config.limiter.enabled = true;
            config.limiter.rps = 0.001;
            config.limiter.burst = 2;
        });

        // The test transport has no peer address, so fake one the way
        // a real connection would carry it
        let peer = std::net::SocketAddr::from(([192, 0, 2, 1], 50000));
        let router = build_router(app.state.clone())
            .unwrap()
            .layer(axum::middleware::map_request(move |mut request: axum::extract::Request| async move {
                request
                    .extensions_mut()
                    .insert(axum::extract::ConnectInfo(peer));
                request
            }));
        let server = axum_test::TestServer::new(router).unwrap();

        assert_eq!(server.get("/v1/healthcheck").await.status_code(), StatusCode::OK);
        assert_eq!(server.get("/v1/healthcheck").await.status_code(), StatusCode::OK);

        let response = server.get("/v1/healthcheck").await;
        assert_eq!(response.status_code(), StatusCode::TOO_MANY_REQUESTS);
        let body: Value = response.json();
        assert_eq!(body["error"], "rate limit exceeded");
    }

    #[tokio::test]
    async fn test_cors_trusted_origin() {
        let app = spawn_app_with(|config| {
            config.cors.trusted_origins = vec!["https://app.example.com".to_string()];
        });

        let response = app
            .server
            .get("/v1/healthcheck")
            .add_header(http::header::ORIGIN, "https://app.example.com")
            .await;
        assert_eq!(
            response.headers().get(http::header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://app.example.com"
        );

        let response = app
            .server
            .get("/v1/healthcheck")
            .add_header(http::header::ORIGIN, "https://evil.example.com")
            .await;
        assert!(response.headers().get(http::header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[test]
    fn test_panic_recovery_response() {
        let response = handle_panic(Box::new("boom"));

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers().get(http::header::CONNECTION).unwrap(), "close");
    }

    #[tokio::test]
    async fn test_responses_vary_on_authorization() {
        let app = spawn_app();
        let response = app.server.get("/v1/healthcheck").await;
        let vary: Vec<_> = response
            .headers()
            .get_all(http::header::VARY)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert!(vary.iter().any(|v| v.contains("Authorization")), "{vary:?}");
    }
}

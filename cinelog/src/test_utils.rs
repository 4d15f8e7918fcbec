//! Shared helpers for router-level tests: an in-memory application
//! behind an `axum_test::TestServer`, plus seeding shortcuts.

use std::sync::Arc;

use axum_test::TestServer;

use crate::background::BackgroundTasks;
use crate::config::Config;
use crate::db::models::tokens::{Token, TokenScope};
use crate::db::models::users::{User, UserCreateRequest};
use crate::db::stores::Stores;
use crate::email::Mailer;
use crate::limits::RateLimiter;
use crate::metrics::Metrics;
use crate::{AppState, build_router};

pub const TEST_JWT_SECRET: &str = "test-secret-at-least-32-bytes-long!!";
pub const TEST_PASSWORD: &str = "pa55word123";

pub struct TestApp {
    pub server: TestServer,
    pub state: AppState,
    pub mail_dir: tempfile::TempDir,
}

pub fn test_config(mail_dir: &tempfile::TempDir) -> Config {
    let mut config = Config::default();
    config.mail.file_dir = mail_dir.path().to_string_lossy().into_owned();
    config.auth.jwt_secret = Some(TEST_JWT_SECRET.to_string());
    config.limiter.enabled = false;
    config
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(|_| {})
}

pub fn spawn_app_with(customize: impl FnOnce(&mut Config)) -> TestApp {
    spawn_app_with_stores(Stores::in_memory(), customize)
}

/// Variant taking pre-built stores, for tests that wrap a store with
/// extra behavior (e.g. simulated write contention).
pub fn spawn_app_with_stores(stores: Stores, customize: impl FnOnce(&mut Config)) -> TestApp {
    let mail_dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&mail_dir);
    customize(&mut config);

    let limiter = Arc::new(RateLimiter::new(
        config.limiter.enabled,
        config.limiter.rps,
        config.limiter.burst,
    ));
    let mailer = Mailer::new(&config).unwrap();
    let state = AppState::builder()
        .stores(stores)
        .config(config)
        .mailer(mailer)
        .limiter(limiter)
        .background(BackgroundTasks::new())
        .metrics(Arc::new(Metrics::new()))
        .build();

    let server = TestServer::new(build_router(state.clone()).unwrap()).unwrap();
    TestApp {
        server,
        state,
        mail_dir,
    }
}

impl TestApp {
    /// Seed a user directly through the stores and hand back a valid
    /// authentication token for them.
    pub async fn seed_user(&self, email: &str, activated: bool, permissions: &[&str]) -> (User, String) {
        let password_hash = crate::auth::password::hash_password(TEST_PASSWORD.to_string())
            .await
            .unwrap();
        let mut user = self
            .state
            .stores
            .users
            .insert(&UserCreateRequest {
                name: "Test User".to_string(),
                email: email.to_string(),
                password_hash,
            })
            .await
            .unwrap();

        if activated {
            user.activated = true;
            user.version = self.state.stores.users.update(&user).await.unwrap();
        }
        if !permissions.is_empty() {
            self.state
                .stores
                .permissions
                .add_for_user(user.id, permissions)
                .await
                .unwrap();
        }

        let token = Token::generate(user.id, chrono::Duration::hours(1), TokenScope::Authentication);
        self.state.stores.tokens.insert(&token).await.unwrap();
        (user, token.plaintext)
    }

    /// Pull the 26-character token out of the most recently written
    /// email file.
    pub fn token_from_mail(&self) -> String {
        let mut entries: Vec<_> = std::fs::read_dir(self.mail_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect();
        entries.sort();
        let latest = entries.last().expect("an email should have been written");
        let contents = std::fs::read_to_string(latest).unwrap();

        let token_rx = regex::Regex::new(r"([A-Z2-7]{26})").unwrap();
        token_rx
            .captures(&contents)
            .expect("email should contain a token")[1]
            .to_string()
    }
}

//! Token issuance endpoints.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{Value, json};
use tracing::instrument;

use crate::AppState;
use crate::api::extract::StrictJson;
use crate::api::handlers::users::field_error;
use crate::api::models::tokens::{
    AuthenticationTokenResponse, CreateAuthenticationTokenRequest, EmailRequest,
};
use crate::api::models::users::validate_email;
use crate::auth::password::{validate_password_plaintext, verify_password};
use crate::db::models::tokens::{Token, TokenScope};
use crate::db::models::users::User;
use crate::errors::{Error, Result};
use crate::validator::Validator;

/// POST /v1/tokens/authentication
///
/// Activation is deliberately not required here: an unactivated user
/// can log in, they just cannot reach permission-gated resources.
#[instrument(skip(state, request))]
pub async fn create_authentication_token(
    State(state): State<AppState>,
    StrictJson(request): StrictJson<CreateAuthenticationTokenRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let email = request.email.unwrap_or_default();
    let password = request.password.unwrap_or_default();

    let mut v = Validator::new();
    validate_email(&mut v, &email);
    validate_password_plaintext(&mut v, Some(&password));
    v.into_result()?;

    // Unknown email and wrong password produce the identical 401 so the
    // endpoint cannot be used to enumerate accounts
    let user = state
        .stores
        .users
        .get_by_email(&email)
        .await?
        .ok_or(Error::InvalidCredentials)?;

    if !verify_password(password, user.password_hash.clone()).await? {
        return Err(Error::InvalidCredentials);
    }

    let token = Token::generate(user.id, chrono::Duration::hours(24), TokenScope::Authentication);
    state.stores.tokens.insert(&token).await?;

    let response = AuthenticationTokenResponse {
        token: token.plaintext,
        expiry: token.expiry,
    };
    Ok((StatusCode::CREATED, Json(json!({ "authentication_token": response }))))
}

/// POST /v1/tokens/activation
///
/// Re-sends an activation token for an account that never received (or
/// lost) the welcome email.
#[instrument(skip(state, request))]
pub async fn create_activation_token(
    State(state): State<AppState>,
    StrictJson(request): StrictJson<EmailRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let user = lookup_by_email(&state, request.email).await?;

    if user.activated {
        return Err(field_error("email", "user has already been activated"));
    }

    let token = Token::generate(user.id, chrono::Duration::hours(3), TokenScope::Activation);
    state.stores.tokens.insert(&token).await?;

    let mailer = state.mailer.clone();
    let (to_email, to_name, user_id) = (user.email, user.name, user.id);
    let plaintext = token.plaintext.clone();
    state.background.spawn("send activation email", async move {
        if let Err(err) = mailer.send_activation_token(&to_email, &to_name, &plaintext).await {
            tracing::error!(error = %err, user_id, "failed to send activation email");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "an email will be sent to you containing activation instructions" })),
    ))
}

/// POST /v1/tokens/password-reset
#[instrument(skip(state, request))]
pub async fn create_password_reset_token(
    State(state): State<AppState>,
    StrictJson(request): StrictJson<EmailRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let user = lookup_by_email(&state, request.email).await?;

    if !user.activated {
        return Err(field_error("email", "user account must be activated"));
    }

    let token = Token::generate(user.id, chrono::Duration::minutes(45), TokenScope::PasswordReset);
    state.stores.tokens.insert(&token).await?;

    let mailer = state.mailer.clone();
    let (to_email, to_name, user_id) = (user.email, user.name, user.id);
    let plaintext = token.plaintext.clone();
    state.background.spawn("send password reset email", async move {
        if let Err(err) = mailer.send_password_reset_token(&to_email, &to_name, &plaintext).await {
            tracing::error!(error = %err, user_id, "failed to send password reset email");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "an email will be sent to you containing password reset instructions" })),
    ))
}

async fn lookup_by_email(state: &AppState, email: Option<String>) -> Result<User> {
    let email = email.unwrap_or_default();
    let mut v = Validator::new();
    validate_email(&mut v, &email);
    v.into_result()?;

    state
        .stores
        .users
        .get_by_email(&email)
        .await?
        .ok_or_else(|| field_error("email", "no matching email address found"))
}

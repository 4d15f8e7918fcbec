//! Registration, activation and password-reset completion.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use serde_json::{Value, json};
use tracing::instrument;

use crate::AppState;
use crate::api::extract::StrictJson;
use crate::api::models::users::{
    ActivateUserRequest, RegisterUserRequest, UpdatePasswordRequest, UserResponse,
    validate_register,
};
use crate::auth::password::{hash_password, validate_password_plaintext};
use crate::db::DbError;
use crate::db::models::tokens::{Token, TokenScope, validate_token_plaintext};
use crate::db::models::users::UserCreateRequest;
use crate::db::stores::MOVIES_READ;
use crate::errors::{Error, Result};
use crate::validator::Validator;

pub fn field_error(field: &str, message: &str) -> Error {
    let mut errors = std::collections::HashMap::new();
    errors.insert(field.to_string(), message.to_string());
    Error::FailedValidation { errors }
}

/// POST /v1/users
///
/// Returns 201 immediately; the welcome email with the activation token
/// goes out in the background after the response is written.
#[instrument(skip(state, request))]
pub async fn register_user(
    State(state): State<AppState>,
    StrictJson(request): StrictJson<RegisterUserRequest>,
) -> Result<(StatusCode, Json<Value>)> {
    let mut v = Validator::new();
    validate_register(&mut v, &request);
    v.into_result()?;

    let name = request.name.unwrap_or_default();
    let email = request.email.unwrap_or_default();
    let password_hash = hash_password(request.password.unwrap_or_default()).await?;

    let user = state
        .stores
        .users
        .insert(&UserCreateRequest {
            name,
            email,
            password_hash,
        })
        .await
        .map_err(|err| {
            if err.is_unique_violation_on("email") {
                field_error("email", "a user with this email address already exists")
            } else {
                Error::from(err)
            }
        })?;

    // New accounts can browse the catalog once activated
    state.stores.permissions.add_for_user(user.id, &[MOVIES_READ]).await?;

    let token = Token::generate(user.id, chrono::Duration::days(3), TokenScope::Activation);
    state.stores.tokens.insert(&token).await?;

    let mailer = state.mailer.clone();
    let (to_email, to_name, user_id) = (user.email.clone(), user.name.clone(), user.id);
    let plaintext = token.plaintext.clone();
    state.background.spawn("send welcome email", async move {
        if let Err(err) = mailer.send_welcome(&to_email, &to_name, user_id, &plaintext).await {
            tracing::error!(error = %err, user_id, "failed to send welcome email");
        }
    });

    Ok((StatusCode::CREATED, Json(json!({ "user": UserResponse::from(user) }))))
}

/// PUT /v1/users/activated
#[instrument(skip(state, request))]
pub async fn activate_user(
    State(state): State<AppState>,
    StrictJson(request): StrictJson<ActivateUserRequest>,
) -> Result<Json<Value>> {
    let plaintext = request.token.unwrap_or_default();
    let mut v = Validator::new();
    validate_token_plaintext(&mut v, &plaintext);
    v.into_result()?;

    let hash = Token::hash_plaintext(&plaintext);
    let mut user = state
        .stores
        .users
        .get_for_token(TokenScope::Activation, &hash)
        .await?
        .ok_or_else(|| field_error("token", "invalid or expired activation token"))?;

    user.activated = true;
    user.version = state.stores.users.update(&user).await.map_err(edit_conflict)?;

    // The token is single-use; clear every outstanding one
    state
        .stores
        .tokens
        .delete_all_for_user(user.id, TokenScope::Activation)
        .await?;

    Ok(Json(json!({ "user": UserResponse::from(user) })))
}

/// PUT /v1/users/password
#[instrument(skip(state, request))]
pub async fn update_password(
    State(state): State<AppState>,
    StrictJson(request): StrictJson<UpdatePasswordRequest>,
) -> Result<Json<Value>> {
    let plaintext = request.token.unwrap_or_default();
    let mut v = Validator::new();
    validate_password_plaintext(&mut v, request.password.as_deref());
    validate_token_plaintext(&mut v, &plaintext);
    v.into_result()?;

    let hash = Token::hash_plaintext(&plaintext);
    let mut user = state
        .stores
        .users
        .get_for_token(TokenScope::PasswordReset, &hash)
        .await?
        .ok_or_else(|| field_error("token", "invalid or expired password reset token"))?;

    user.password_hash = hash_password(request.password.unwrap_or_default()).await?;
    user.version = state.stores.users.update(&user).await.map_err(edit_conflict)?;

    state
        .stores
        .tokens
        .delete_all_for_user(user.id, TokenScope::PasswordReset)
        .await?;

    Ok(Json(json!({ "message": "your password was successfully reset" })))
}

fn edit_conflict(err: DbError) -> Error {
    match err {
        DbError::NotFound => Error::EditConflict,
        other => Error::from(other),
    }
}

//! Request authentication.
//!
//! Runs on every request and resolves the `Authorization` header to a
//! [`Principal`] before any handler sees the request:
//!
//! - no header: the request proceeds as [`Principal::Anonymous`]
//! - anything other than `Bearer <token>`: 401 immediately
//! - a 26-character bearer value is an opaque token and is looked up by
//!   digest in the tokens table
//! - any other bearer value is treated as a JWT
//!
//! Authorization happens separately, in the handlers, through the gate
//! helpers at the bottom of this module. Permissions are read fresh on
//! every check so a revocation takes effect on the next request.

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::{AUTHORIZATION, VARY};
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;
use crate::auth::jwt;
use crate::auth::principal::Principal;
use crate::db::models::tokens::{PLAINTEXT_LENGTH, Token, TokenScope};
use crate::db::models::users::User;
use crate::db::stores::Stores;
use crate::errors::{Error, Result};

pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .map(|value| value.to_str().map(str::to_owned))
        .transpose()
        .map_err(|_| Error::InvalidAuthenticationToken)?;

    let principal = resolve_bearer(
        &state.stores,
        state.config.auth.jwt_secret.as_deref(),
        header.as_deref(),
    )
    .await?;
    request.extensions_mut().insert(principal);

    let mut response = next.run(request).await;
    // Caches must not serve one client's authenticated response to another
    response
        .headers_mut()
        .append(VARY, HeaderValue::from_static("Authorization"));
    Ok(response)
}

/// Resolve an optional `Authorization` header value to a principal.
async fn resolve_bearer(
    stores: &Stores,
    jwt_secret: Option<&str>,
    header: Option<&str>,
) -> Result<Principal> {
    let Some(header) = header else {
        return Ok(Principal::Anonymous);
    };

    let Some(token) = header.strip_prefix("Bearer ") else {
        return Err(Error::InvalidAuthenticationToken);
    };
    if token.is_empty() || token.contains(' ') {
        return Err(Error::InvalidAuthenticationToken);
    }

    // Opaque tokens are always exactly 26 base32 characters; a JWT never
    // is, so the length alone picks the verification path.
    let user = if token.len() == PLAINTEXT_LENGTH {
        let hash = Token::hash_plaintext(token);
        stores
            .users
            .get_for_token(TokenScope::Authentication, &hash)
            .await?
    } else {
        let secret = jwt_secret.ok_or(Error::InvalidAuthenticationToken)?;
        let user_id = jwt::verify(token, secret)?;
        stores.users.get(user_id).await?
    };

    user.map(Principal::User).ok_or(Error::InvalidAuthenticationToken)
}

/// Gate: the request must carry a known user, activated or not.
pub fn authenticated_user(principal: &Principal) -> Result<&User> {
    principal.user().ok_or(Error::AuthenticationRequired)
}

/// Gate: the user must also have activated their account.
pub fn activated_user(principal: &Principal) -> Result<&User> {
    let user = authenticated_user(principal)?;
    if !user.activated {
        return Err(Error::InactiveAccount);
    }
    Ok(user)
}

/// Gate: the activated user must hold the given permission code.
pub async fn require_permission<'a>(
    stores: &Stores,
    principal: &'a Principal,
    code: &str,
) -> Result<&'a User> {
    let user = activated_user(principal)?;
    let codes = stores.permissions.get_all_for_user(user.id).await?;
    if !codes.iter().any(|c| c == code) {
        return Err(Error::NotPermitted);
    }
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::hash_password;
    use crate::db::models::users::UserCreateRequest;
    use crate::db::stores::MOVIES_READ;

    async fn seeded_stores() -> (Stores, User, Token) {
        let stores = Stores::in_memory();
        let user = stores
            .users
            .insert(&UserCreateRequest {
                name: "Alice".to_string(),
                email: "alice@example.com".to_string(),
                password_hash: hash_password("pa55word123".to_string()).await.unwrap(),
            })
            .await
            .unwrap();
        let token = Token::generate(user.id, chrono::Duration::hours(24), TokenScope::Authentication);
        stores.tokens.insert(&token).await.unwrap();
        (stores, user, token)
    }

    #[tokio::test]
    async fn test_no_header_is_anonymous() {
        let (stores, _, _) = seeded_stores().await;
        let principal = resolve_bearer(&stores, None, None).await.unwrap();
        assert!(principal.is_anonymous());
    }

    #[tokio::test]
    async fn test_malformed_header_is_rejected() {
        let (stores, _, token) = seeded_stores().await;
        for header in [
            "",
            "Bearer",
            "Bearer ",
            "Basic dXNlcjpwYXNz",
            &format!("bearer {}", token.plaintext),
            &format!("Bearer {} extra", token.plaintext),
        ] {
            let err = resolve_bearer(&stores, None, Some(header)).await.unwrap_err();
            assert!(
                matches!(err, Error::InvalidAuthenticationToken),
                "header {header:?} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn test_opaque_token_resolves_user() {
        let (stores, user, token) = seeded_stores().await;
        let header = format!("Bearer {}", token.plaintext);
        let principal = resolve_bearer(&stores, None, Some(&header)).await.unwrap();
        assert_eq!(principal.user().map(|u| u.id), Some(user.id));
    }

    #[tokio::test]
    async fn test_unknown_opaque_token_is_rejected() {
        let (stores, _, _) = seeded_stores().await;
        let header = format!("Bearer {}", "A".repeat(PLAINTEXT_LENGTH));
        let err = resolve_bearer(&stores, None, Some(&header)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAuthenticationToken));
    }

    #[tokio::test]
    async fn test_jwt_resolves_user() {
        let (stores, user, _) = seeded_stores().await;
        let secret = "test-secret-at-least-32-bytes-long!!";
        let token = jwt::issue(user.id, secret, chrono::Duration::hours(1)).unwrap();
        let header = format!("Bearer {token}");
        let principal = resolve_bearer(&stores, Some(secret), Some(&header)).await.unwrap();
        assert_eq!(principal.user().map(|u| u.id), Some(user.id));
    }

    #[tokio::test]
    async fn test_jwt_without_configured_secret_is_rejected() {
        let (stores, user, _) = seeded_stores().await;
        let token = jwt::issue(user.id, "some-secret-32-bytes-long-padding!", chrono::Duration::hours(1)).unwrap();
        let header = format!("Bearer {token}");
        let err = resolve_bearer(&stores, None, Some(&header)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidAuthenticationToken));
    }

    #[tokio::test]
    async fn test_gates_fire_in_order() {
        let (stores, mut user, _) = seeded_stores().await;

        // Anonymous fails the first gate
        let err = require_permission(&stores, &Principal::Anonymous, MOVIES_READ)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthenticationRequired));

        // Authenticated but not activated fails the second
        let principal = Principal::User(user.clone());
        let err = require_permission(&stores, &principal, MOVIES_READ).await.unwrap_err();
        assert!(matches!(err, Error::InactiveAccount));

        // Activated without the permission fails the third
        user.activated = true;
        let principal = Principal::User(user.clone());
        let err = require_permission(&stores, &principal, MOVIES_READ).await.unwrap_err();
        assert!(matches!(err, Error::NotPermitted));

        // Granting the code lets the request through
        stores.permissions.add_for_user(user.id, &[MOVIES_READ]).await.unwrap();
        let granted = require_permission(&stores, &principal, MOVIES_READ).await.unwrap();
        assert_eq!(granted.id, user.id);
    }
}

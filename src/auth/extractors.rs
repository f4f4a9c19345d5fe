//! Axum extractors for authentication.

use axum::{extract::FromRequestParts, http::request::Parts};

use super::bearer::bearer_token;
use super::errors::{ApiAuthError, AuthError};
use super::state::HasAuthBackend;
use crate::db::{Database, User};
use crate::jwt::JwtConfig;

/// Resolve an access token to a live user.
///
/// Checks signature, expiry and `type=access`, then loads the subject and
/// rejects it if the row is gone or deactivated. Performs reads only.
pub async fn resolve_user(jwt: &JwtConfig, db: &Database, token: &str) -> Result<User, AuthError> {
    let claims = jwt.validate_access_token(token)?;

    let user = db
        .users()
        .get_by_id(&claims.sub)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    if !user.is_active {
        return Err(AuthError::InactiveAccount);
    }

    Ok(user)
}

/// Pass an admin through unchanged.
pub fn require_admin(user: User) -> Result<User, AuthError> {
    if user.is_admin {
        Ok(user)
    } else {
        Err(AuthError::Forbidden)
    }
}

async fn authenticate_request<S>(parts: &Parts, state: &S) -> Result<User, AuthError>
where
    S: HasAuthBackend + Send + Sync,
{
    let token = bearer_token(&parts.headers).ok_or(AuthError::MissingToken)?;
    resolve_user(state.jwt(), state.db(), token).await
}

/// Extractor for endpoints available to any active user.
pub struct CurrentUser(pub User);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        authenticate_request(parts, state)
            .await
            .map(CurrentUser)
            .map_err(ApiAuthError::from)
    }
}

/// Extractor for endpoints restricted to admins.
pub struct AdminUser(pub User);

impl<S> FromRequestParts<S> for AdminUser
where
    S: HasAuthBackend + Send + Sync,
{
    type Rejection = ApiAuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = authenticate_request(parts, state).await?;
        require_admin(user).map(AdminUser).map_err(ApiAuthError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::NewUser;
    use crate::jwt::{Claims, TokenType};

    const SECRET: &[u8] = b"test-secret-that-is-long-enough-0123";

    async fn setup() -> (Database, JwtConfig) {
        let db = Database::open(":memory:").await.unwrap();
        db.users()
            .create(NewUser {
                id: "uuid-1",
                email: "alice@example.com",
                password_hash: "hash",
                display_name: None,
                is_admin: false,
            })
            .await
            .unwrap();
        (db, JwtConfig::new(SECRET))
    }

    #[tokio::test]
    async fn test_resolve_user() {
        let (db, jwt) = setup().await;
        let token = jwt.generate_access_token("uuid-1", "alice@example.com").unwrap();

        let user = resolve_user(&jwt, &db, &token.token).await.unwrap();
        assert_eq!(user.email, "alice@example.com");
    }

    #[tokio::test]
    async fn test_resolve_user_rejects_refresh_token() {
        let (db, jwt) = setup().await;
        let token = jwt.generate_refresh_token("uuid-1").unwrap();

        let err = resolve_user(&jwt, &db, &token.token).await.unwrap_err();
        assert!(matches!(err, AuthError::Token(_)));
    }

    #[tokio::test]
    async fn test_resolve_user_unknown_subject() {
        let (db, jwt) = setup().await;
        let token = jwt.generate_access_token("uuid-2", "bob@example.com").unwrap();

        let err = resolve_user(&jwt, &db, &token.token).await.unwrap_err();
        assert!(matches!(err, AuthError::UserNotFound));
    }

    #[tokio::test]
    async fn test_resolve_user_rechecks_active_flag() {
        let (db, jwt) = setup().await;
        let token = jwt.generate_access_token("uuid-1", "alice@example.com").unwrap();
        db.users().set_active("uuid-1", false).await.unwrap();

        let err = resolve_user(&jwt, &db, &token.token).await.unwrap_err();
        assert!(matches!(err, AuthError::InactiveAccount));
    }

    #[tokio::test]
    async fn test_resolve_user_expired() {
        let (db, jwt) = setup().await;
        let token = jwt
            .encode(&Claims {
                sub: "uuid-1".into(),
                email: Some("alice@example.com".into()),
                jti: None,
                token_type: TokenType::Access,
                iat: 1,
                exp: 2,
            })
            .unwrap();

        let err = resolve_user(&jwt, &db, &token).await.unwrap_err();
        assert!(matches!(err, AuthError::Token(crate::jwt::JwtError::Expired)));
    }

    #[tokio::test]
    async fn test_require_admin() {
        let (db, _) = setup().await;
        let user = db.users().get_by_id("uuid-1").await.unwrap().unwrap();
        assert!(matches!(require_admin(user), Err(AuthError::Forbidden)));

        db.users().set_admin("uuid-1", true).await.unwrap();
        let admin = db.users().get_by_id("uuid-1").await.unwrap().unwrap();
        assert_eq!(require_admin(admin).unwrap().id, "uuid-1");
    }
}

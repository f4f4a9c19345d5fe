//! Signup, login, token refresh and logout.
//!
//! Every write that must be atomic (user row plus its first refresh token,
//! last-login stamp plus a new refresh token) runs in a single transaction.
//! Duplicate registrations are caught by the unique index on `users.email`
//! rather than a prior lookup, so concurrent signups for one address cannot
//! both succeed.

use std::sync::{Arc, OnceLock};

use tracing::{debug, info, warn};

use crate::db::{self, Database, NewUser, RefreshTokenStore, User, UserStore, hash_token};
use crate::jwt::{JwtConfig, JwtError, now_secs};
use crate::password::{self, MAX_PASSWORD_BYTES};

/// Longest accepted email address.
const MAX_EMAIL_LEN: usize = 254;

/// Hashed once and checked on logins for unknown emails, so they cost the
/// same bcrypt work as a wrong password.
const DUMMY_PASSWORD: &str = "ragdesk-unknown-account";

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("email already registered")]
    EmailAlreadyRegistered,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("{0}")]
    InvalidPassword(&'static str),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account is inactive")]
    InactiveAccount,
    #[error("invalid token: {0}")]
    InvalidToken(JwtError),
    #[error("refresh token is not recognised")]
    TokenRevoked,
    #[error("user not found")]
    UserNotFound,
    #[error("failed to issue token: {0}")]
    TokenIssue(JwtError),
    #[error("password hashing failed: {0}")]
    Hashing(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A user together with a freshly minted token pair.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

/// Credential operations over the users and refresh token tables.
#[derive(Clone)]
pub struct AccountService {
    db: Database,
    jwt: Arc<JwtConfig>,
    bcrypt_cost: u32,
    dummy_hash: Arc<OnceLock<String>>,
}

/// Trim, lowercase and shape-check an email address.
pub fn normalize_email(email: &str) -> Result<String, AccountError> {
    let email = email.trim().to_lowercase();

    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return Err(AccountError::InvalidEmail);
    }
    if email.chars().any(char::is_whitespace) {
        return Err(AccountError::InvalidEmail);
    }

    let Some((local, domain)) = email.split_once('@') else {
        return Err(AccountError::InvalidEmail);
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(AccountError::InvalidEmail);
    }
    if domain.starts_with('.') || domain.ends_with('.') {
        return Err(AccountError::InvalidEmail);
    }

    Ok(email)
}

impl AccountService {
    pub fn new(db: Database, jwt: Arc<JwtConfig>, bcrypt_cost: u32) -> Self {
        Self {
            db,
            jwt,
            bcrypt_cost,
            dummy_hash: Arc::new(OnceLock::new()),
        }
    }

    /// Register a new account and sign it in.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<IssuedTokens, AccountError> {
        let email = normalize_email(email)?;

        if password.is_empty() {
            return Err(AccountError::InvalidPassword("Password cannot be empty"));
        }
        if !password::within_limit(password) {
            debug!(
                max_bytes = MAX_PASSWORD_BYTES,
                "Rejected over-length password at signup"
            );
            return Err(AccountError::InvalidPassword(
                "Password cannot be longer than 72 bytes",
            ));
        }

        let display_name = display_name.map(str::trim).filter(|s| !s.is_empty());
        let password_hash = self.hash(password).await?;

        let user_id = uuid::Uuid::new_v4().to_string();
        let access = self
            .jwt
            .generate_access_token(&user_id, &email)
            .map_err(AccountError::TokenIssue)?;
        let refresh = self
            .jwt
            .generate_refresh_token(&user_id)
            .map_err(AccountError::TokenIssue)?;

        let mut tx = self.db.begin().await?;
        let user = match UserStore::insert_tx(
            &mut tx,
            NewUser {
                id: &user_id,
                email: &email,
                password_hash: &password_hash,
                display_name,
                is_admin: false,
            },
        )
        .await
        {
            Ok(user) => user,
            Err(e) if db::is_unique_violation(&e) => {
                return Err(AccountError::EmailAlreadyRegistered);
            }
            Err(e) => return Err(e.into()),
        };
        RefreshTokenStore::insert_tx(
            &mut tx,
            &user.id,
            &hash_token(&refresh.token),
            refresh.expires_at,
        )
        .await?;
        tx.commit().await?;

        info!(user_id = %user.id, "User registered");

        Ok(IssuedTokens {
            user,
            access_token: access.token,
            refresh_token: refresh.token,
        })
    }

    /// Check credentials and issue a new token pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<IssuedTokens, AccountError> {
        // An address that fails the shape check cannot match any stored row.
        let Ok(email) = normalize_email(email) else {
            return Err(AccountError::InvalidCredentials);
        };

        let Some(mut user) = self.db.users().get_by_email(&email).await? else {
            debug!("Login for unknown email");
            let dummy = self.dummy_hash().await?;
            self.verify(password, &dummy).await?;
            return Err(AccountError::InvalidCredentials);
        };

        if !self.verify(password, &user.password_hash).await? {
            debug!(user_id = %user.id, "Login with wrong password");
            return Err(AccountError::InvalidCredentials);
        }

        if !user.is_active {
            warn!(user_id = %user.id, "Login attempt on inactive account");
            return Err(AccountError::InactiveAccount);
        }

        let access = self
            .jwt
            .generate_access_token(&user.id, &user.email)
            .map_err(AccountError::TokenIssue)?;
        let refresh = self
            .jwt
            .generate_refresh_token(&user.id)
            .map_err(AccountError::TokenIssue)?;

        let mut tx = self.db.begin().await?;
        user.last_login_at = UserStore::touch_last_login_tx(&mut tx, &user.id).await?;
        RefreshTokenStore::insert_tx(
            &mut tx,
            &user.id,
            &hash_token(&refresh.token),
            refresh.expires_at,
        )
        .await?;
        tx.commit().await?;

        info!(user_id = %user.id, "User logged in");

        Ok(IssuedTokens {
            user,
            access_token: access.token,
            refresh_token: refresh.token,
        })
    }

    /// Mint a new access token from a stored, unexpired refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, AccountError> {
        let claims = self
            .jwt
            .validate_refresh_token(refresh_token)
            .map_err(AccountError::InvalidToken)?;

        let now = now_secs().map_err(AccountError::TokenIssue)?;
        let stored = self
            .db
            .tokens()
            .find_active(&hash_token(refresh_token), now)
            .await?
            .ok_or(AccountError::TokenRevoked)?;

        if stored.user_id != claims.sub {
            warn!(jti = %claims.jti, "Refresh token subject does not match stored owner");
            return Err(AccountError::TokenRevoked);
        }

        let user = self
            .db
            .users()
            .get_by_id(&claims.sub)
            .await?
            .ok_or(AccountError::UserNotFound)?;

        if !user.is_active {
            return Err(AccountError::InactiveAccount);
        }

        let access = self
            .jwt
            .generate_access_token(&user.id, &user.email)
            .map_err(AccountError::TokenIssue)?;
        Ok(access.token)
    }

    /// Forget a refresh token. Unknown tokens are ignored.
    pub async fn logout(&self, refresh_token: &str) -> Result<(), AccountError> {
        let removed = self
            .db
            .tokens()
            .delete_by_hash(&hash_token(refresh_token))
            .await?;
        debug!(removed, "Logout");
        Ok(())
    }

    async fn hash(&self, password: &str) -> Result<String, AccountError> {
        let password = password.to_owned();
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || password::hash_password(&password, cost))
            .await
            .map_err(|e| AccountError::Hashing(e.to_string()))?
            .map_err(|e| AccountError::Hashing(e.to_string()))
    }

    /// A hash at the configured cost that no real password is expected to match.
    async fn dummy_hash(&self) -> Result<String, AccountError> {
        if let Some(hash) = self.dummy_hash.get() {
            return Ok(hash.clone());
        }
        let hash = self.hash(DUMMY_PASSWORD).await?;
        Ok(self.dummy_hash.get_or_init(|| hash).clone())
    }

    async fn verify(&self, password: &str, hash: &str) -> Result<bool, AccountError> {
        let password = password.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || password::verify_password(&password, &hash))
            .await
            .map_err(|e| AccountError::Hashing(e.to_string()))
    }
}

use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub email: String,
    pub password_hash: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub is_admin: bool,
    pub created_at: String,
    pub last_login_at: Option<String>,
}

/// Fields needed to insert a user row.
#[derive(Debug, Clone, Copy)]
pub struct NewUser<'a> {
    pub id: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub display_name: Option<&'a str>,
    pub is_admin: bool,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    email: String,
    password_hash: String,
    display_name: Option<String>,
    is_active: i32,
    is_email_verified: i32,
    is_admin: i32,
    created_at: String,
    last_login_at: Option<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            display_name: row.display_name,
            is_active: row.is_active != 0,
            is_email_verified: row.is_email_verified != 0,
            is_admin: row.is_admin != 0,
            created_at: row.created_at,
            last_login_at: row.last_login_at,
        }
    }
}

const USER_COLUMNS: &str = "id, email, password_hash, display_name, is_active, \
     is_email_verified, is_admin, created_at, last_login_at";

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a user inside an open transaction.
    /// Fails with a unique violation if the email is already registered.
    pub async fn insert_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user: NewUser<'_>,
    ) -> Result<User, sqlx::Error> {
        let row: UserRow = sqlx::query_as(&format!(
            "INSERT INTO users (id, email, password_hash, display_name, is_active, is_email_verified, is_admin)
             VALUES (?, ?, ?, ?, 1, 0, ?)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(user.id)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.display_name)
        .bind(user.is_admin as i32)
        .fetch_one(&mut **tx)
        .await?;
        Ok(row.into())
    }

    /// Insert a user in its own transaction.
    pub async fn create(&self, user: NewUser<'_>) -> Result<User, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let created = Self::insert_tx(&mut tx, user).await?;
        tx.commit().await?;
        Ok(created)
    }

    /// Record a successful login inside an open transaction.
    pub async fn touch_last_login_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        id: &str,
    ) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(Option<String>,)> = sqlx::query_as(
            "UPDATE users SET last_login_at = datetime('now') WHERE id = ? RETURNING last_login_at",
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await?;
        Ok(row.and_then(|r| r.0))
    }

    /// Get a user by primary key.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = ?"))
                .bind(email)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Activate or deactivate a user.
    pub async fn set_active(&self, id: &str, active: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET is_active = ? WHERE id = ?")
            .bind(active as i32)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Grant or revoke admin rights.
    pub async fn set_admin(&self, id: &str, admin: bool) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET is_admin = ? WHERE id = ?")
            .bind(admin as i32)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count users with a given email (used by tests and the CLI).
    pub async fn count_by_email(&self, email: &str) -> Result<i64, sqlx::Error> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }
}

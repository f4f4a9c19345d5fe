//! Read-only aggregates for the admin dashboard.
//!
//! Every query must work on empty tables: counts come back as zero, averages
//! as `None`, and lists empty.

use serde::Serialize;
use sqlx::sqlite::SqlitePool;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserStats {
    pub total_users: i64,
    pub active_users: i64,
    pub verified_users: i64,
    pub new_users_week: i64,
    pub new_users_month: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatStats {
    pub total_conversations: i64,
    pub users_with_chats: i64,
    pub chats_today: i64,
    pub chats_week: i64,
    pub total_tokens: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ShortTermStats {
    pub total_stm: i64,
    pub users_with_stm: i64,
    pub avg_importance: Option<f64>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct LongTermStats {
    pub total_ltm: i64,
    pub users_with_ltm: i64,
    pub avg_importance: Option<f64>,
    pub user_context_count: i64,
    pub preferences_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub short_term: ShortTermStats,
    pub long_term: LongTermStats,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TopUser {
    pub email: String,
    pub chat_count: i64,
    pub tokens_used: i64,
    pub last_activity: Option<String>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MemoryCategory {
    pub category_primary: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminStats {
    pub user_stats: UserStats,
    pub chat_stats: ChatStats,
    pub memory_stats: MemoryStats,
    pub top_users: Vec<TopUser>,
    pub memory_categories: Vec<MemoryCategory>,
}

/// One row of the admin user list.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UserOverview {
    pub id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub is_email_verified: bool,
    pub is_admin: bool,
    pub created_at: String,
    pub last_login_at: Option<String>,
    pub chat_count: i64,
    pub ltm_count: i64,
    pub stm_count: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct RecentChat {
    pub chat_id: String,
    pub user_input_preview: String,
    pub ai_output_preview: String,
    pub tokens_used: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TierInfo {
    pub count: i64,
    pub avg_importance: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryInfo {
    pub long_term: TierInfo,
    pub short_term: TierInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserDetails {
    pub user: UserOverview,
    pub recent_chats: Vec<RecentChat>,
    pub memory_info: MemoryInfo,
}

const USER_OVERVIEW_SELECT: &str = "SELECT
        u.id, u.email, u.display_name, u.is_active, u.is_email_verified, u.is_admin,
        u.created_at, u.last_login_at,
        (SELECT COUNT(*) FROM chat_history ch WHERE ch.user_id = u.id) AS chat_count,
        (SELECT COUNT(*) FROM long_term_memory ltm WHERE ltm.user_id = u.id) AS ltm_count,
        (SELECT COUNT(*) FROM short_term_memory stm WHERE stm.user_id = u.id) AS stm_count
    FROM users u";

#[derive(Clone)]
pub struct StatsStore {
    pool: SqlitePool,
}

impl StatsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// System-wide statistics.
    pub async fn overview(&self) -> Result<AdminStats, sqlx::Error> {
        let user_stats: UserStats = sqlx::query_as(
            "SELECT
                COUNT(*) AS total_users,
                COALESCE(SUM(CASE WHEN is_active = 1 THEN 1 ELSE 0 END), 0) AS active_users,
                COALESCE(SUM(CASE WHEN is_email_verified = 1 THEN 1 ELSE 0 END), 0) AS verified_users,
                COALESCE(SUM(CASE WHEN created_at > datetime('now', '-7 days') THEN 1 ELSE 0 END), 0) AS new_users_week,
                COALESCE(SUM(CASE WHEN created_at > datetime('now', '-30 days') THEN 1 ELSE 0 END), 0) AS new_users_month
             FROM users",
        )
        .fetch_one(&self.pool)
        .await?;

        let chat_stats: ChatStats = sqlx::query_as(
            "SELECT
                COUNT(*) AS total_conversations,
                COUNT(DISTINCT user_id) AS users_with_chats,
                COALESCE(SUM(CASE WHEN created_at > datetime('now', '-1 day') THEN 1 ELSE 0 END), 0) AS chats_today,
                COALESCE(SUM(CASE WHEN created_at > datetime('now', '-7 days') THEN 1 ELSE 0 END), 0) AS chats_week,
                COALESCE(SUM(tokens_used), 0) AS total_tokens
             FROM chat_history",
        )
        .fetch_one(&self.pool)
        .await?;

        let short_term: ShortTermStats = sqlx::query_as(
            "SELECT
                COUNT(*) AS total_stm,
                COUNT(DISTINCT user_id) AS users_with_stm,
                AVG(importance_score) AS avg_importance
             FROM short_term_memory",
        )
        .fetch_one(&self.pool)
        .await?;

        let long_term: LongTermStats = sqlx::query_as(
            "SELECT
                COUNT(*) AS total_ltm,
                COUNT(DISTINCT user_id) AS users_with_ltm,
                AVG(importance_score) AS avg_importance,
                COALESCE(SUM(CASE WHEN is_user_context = 1 THEN 1 ELSE 0 END), 0) AS user_context_count,
                COALESCE(SUM(CASE WHEN is_preference = 1 THEN 1 ELSE 0 END), 0) AS preferences_count
             FROM long_term_memory",
        )
        .fetch_one(&self.pool)
        .await?;

        let top_users: Vec<TopUser> = sqlx::query_as(
            "SELECT
                u.email,
                COUNT(ch.chat_id) AS chat_count,
                COALESCE(SUM(ch.tokens_used), 0) AS tokens_used,
                MAX(ch.created_at) AS last_activity
             FROM users u
             LEFT JOIN chat_history ch ON u.id = ch.user_id
             GROUP BY u.id, u.email
             ORDER BY chat_count DESC, u.email
             LIMIT 10",
        )
        .fetch_all(&self.pool)
        .await?;

        let memory_categories: Vec<MemoryCategory> = sqlx::query_as(
            "SELECT category_primary, COUNT(*) AS count
             FROM long_term_memory
             GROUP BY category_primary
             ORDER BY count DESC, category_primary
             LIMIT 10",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(AdminStats {
            user_stats,
            chat_stats,
            memory_stats: MemoryStats {
                short_term,
                long_term,
            },
            top_users,
            memory_categories,
        })
    }

    /// Every user with activity counts, newest first.
    pub async fn list_users(&self) -> Result<Vec<UserOverview>, sqlx::Error> {
        sqlx::query_as(&format!(
            "{USER_OVERVIEW_SELECT} ORDER BY u.created_at DESC, u.rowid DESC"
        ))
        .fetch_all(&self.pool)
        .await
    }

    /// Detailed view of one user, or `None` if the id is unknown.
    pub async fn user_details(&self, user_id: &str) -> Result<Option<UserDetails>, sqlx::Error> {
        let user: Option<UserOverview> =
            sqlx::query_as(&format!("{USER_OVERVIEW_SELECT} WHERE u.id = ?"))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(user) = user else {
            return Ok(None);
        };

        let recent_chats: Vec<RecentChat> = sqlx::query_as(
            "SELECT chat_id,
                    substr(user_input, 1, 100) AS user_input_preview,
                    substr(ai_output, 1, 100) AS ai_output_preview,
                    tokens_used, created_at
             FROM chat_history
             WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC
             LIMIT 20",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        let long_term: TierInfo = sqlx::query_as(
            "SELECT COUNT(*) AS count, AVG(importance_score) AS avg_importance
             FROM long_term_memory WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let short_term: TierInfo = sqlx::query_as(
            "SELECT COUNT(*) AS count, AVG(importance_score) AS avg_importance
             FROM short_term_memory WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(Some(UserDetails {
            user,
            recent_chats,
            memory_info: MemoryInfo {
                long_term,
                short_term,
            },
        }))
    }
}

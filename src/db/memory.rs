//! Per-user conversational memory rows.
//!
//! Every query here takes the owning user id and filters on it.

use serde::Serialize;
use sqlx::sqlite::SqlitePool;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    ShortTerm,
    LongTerm,
}

/// A memory candidate for retrieval, from either tier.
#[derive(Debug, Clone)]
pub struct MemoryRow {
    pub tier: MemoryTier,
    pub summary: String,
    pub importance_score: f64,
}

/// A recorded chat exchange.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ChatRecord {
    pub chat_id: String,
    pub session_id: String,
    pub conversation_id: Option<String>,
    pub user_input: String,
    pub ai_output: String,
    pub tokens_used: i64,
    pub created_at: String,
}

/// Fields for a new chat history row.
#[derive(Debug, Clone, Copy)]
pub struct NewChat<'a> {
    pub user_id: &'a str,
    pub session_id: &'a str,
    pub conversation_id: Option<&'a str>,
    pub user_input: &'a str,
    pub ai_output: &'a str,
    pub model: Option<&'a str>,
    pub tokens_used: i64,
}

/// Fields for a new long-term memory row.
#[derive(Debug, Clone, Copy)]
pub struct NewLongTermMemory<'a> {
    pub user_id: &'a str,
    pub summary: &'a str,
    pub importance_score: f64,
    pub category: &'a str,
    pub is_user_context: bool,
    pub is_preference: bool,
}

#[derive(sqlx::FromRow)]
struct MemoryRowRaw {
    summary: String,
    importance_score: f64,
}

impl MemoryRowRaw {
    fn into_row(self, tier: MemoryTier) -> MemoryRow {
        MemoryRow {
            tier,
            summary: self.summary,
            importance_score: self.importance_score,
        }
    }
}

#[derive(Clone)]
pub struct MemoryStore {
    pool: SqlitePool,
}

impl MemoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn insert_chat_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        chat: NewChat<'_>,
    ) -> Result<String, sqlx::Error> {
        let chat_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO chat_history
                (chat_id, user_id, session_id, conversation_id, user_input, ai_output, model, tokens_used)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&chat_id)
        .bind(chat.user_id)
        .bind(chat.session_id)
        .bind(chat.conversation_id)
        .bind(chat.user_input)
        .bind(chat.ai_output)
        .bind(chat.model)
        .bind(chat.tokens_used)
        .execute(&mut **tx)
        .await?;
        Ok(chat_id)
    }

    async fn insert_short_term_tx(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        user_id: &str,
        chat_id: Option<&str>,
        summary: &str,
        importance_score: f64,
    ) -> Result<String, sqlx::Error> {
        let memory_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO short_term_memory (memory_id, user_id, chat_id, summary, importance_score)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&memory_id)
        .bind(user_id)
        .bind(chat_id)
        .bind(summary)
        .bind(importance_score)
        .execute(&mut **tx)
        .await?;
        Ok(memory_id)
    }

    /// Insert a chat history row. Returns the chat id.
    pub async fn record_chat(&self, chat: NewChat<'_>) -> Result<String, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let chat_id = Self::insert_chat_tx(&mut tx, chat).await?;
        tx.commit().await?;
        Ok(chat_id)
    }

    /// Insert a chat history row and its short-term memory in one transaction.
    /// The memory is linked to the chat row and goes away with it.
    /// Returns the chat id.
    pub async fn record_exchange(
        &self,
        chat: NewChat<'_>,
        summary: &str,
        importance_score: f64,
    ) -> Result<String, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let chat_id = Self::insert_chat_tx(&mut tx, chat).await?;
        Self::insert_short_term_tx(&mut tx, chat.user_id, Some(&chat_id), summary, importance_score)
            .await?;
        tx.commit().await?;
        Ok(chat_id)
    }

    /// Create a short-term memory not tied to any exchange. Returns the memory id.
    pub async fn create_short_term(
        &self,
        user_id: &str,
        summary: &str,
        importance_score: f64,
    ) -> Result<String, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let memory_id =
            Self::insert_short_term_tx(&mut tx, user_id, None, summary, importance_score).await?;
        tx.commit().await?;
        Ok(memory_id)
    }

    /// Create a long-term memory. Returns the memory id.
    pub async fn create_long_term(&self, memory: NewLongTermMemory<'_>) -> Result<String, sqlx::Error> {
        let memory_id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO long_term_memory
                (memory_id, user_id, summary, importance_score, category_primary, is_user_context, is_preference)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&memory_id)
        .bind(memory.user_id)
        .bind(memory.summary)
        .bind(memory.importance_score)
        .bind(memory.category)
        .bind(memory.is_user_context as i32)
        .bind(memory.is_preference as i32)
        .execute(&self.pool)
        .await?;
        Ok(memory_id)
    }

    /// Most recent memories of both tiers for one user, newest first per tier.
    pub async fn candidates(
        &self,
        user_id: &str,
        per_tier_limit: i64,
    ) -> Result<Vec<MemoryRow>, sqlx::Error> {
        let long_term: Vec<MemoryRowRaw> = sqlx::query_as(
            "SELECT summary, importance_score FROM long_term_memory
             WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(per_tier_limit)
        .fetch_all(&self.pool)
        .await?;

        let short_term: Vec<MemoryRowRaw> = sqlx::query_as(
            "SELECT summary, importance_score FROM short_term_memory
             WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(per_tier_limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(long_term
            .into_iter()
            .map(|r| r.into_row(MemoryTier::LongTerm))
            .chain(
                short_term
                    .into_iter()
                    .map(|r| r.into_row(MemoryTier::ShortTerm)),
            )
            .collect())
    }

    /// Most recent chat exchanges for one user.
    pub async fn history(&self, user_id: &str, limit: i64) -> Result<Vec<ChatRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT chat_id, session_id, conversation_id, user_input, ai_output, tokens_used, created_at
             FROM chat_history WHERE user_id = ?
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    /// Delete one user's exchanges for a conversation, together with the
    /// short-term memories recorded from them. Returns the number of exchanges removed.
    pub async fn delete_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
    ) -> Result<u64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM short_term_memory
             WHERE user_id = ? AND chat_id IN (
                SELECT chat_id FROM chat_history WHERE user_id = ? AND conversation_id = ?
             )",
        )
        .bind(user_id)
        .bind(user_id)
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        let result =
            sqlx::query("DELETE FROM chat_history WHERE user_id = ? AND conversation_id = ?")
                .bind(user_id)
                .bind(conversation_id)
                .execute(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, NewUser};

    async fn db_with_users() -> Database {
        let db = Database::open(":memory:").await.unwrap();
        for (id, email) in [("user-a", "a@example.com"), ("user-b", "b@example.com")] {
            db.users()
                .create(NewUser {
                    id,
                    email,
                    password_hash: "hash",
                    display_name: None,
                    is_admin: false,
                })
                .await
                .unwrap();
        }
        db
    }

    fn chat<'a>(user_id: &'a str, conversation_id: Option<&'a str>, input: &'a str) -> NewChat<'a> {
        NewChat {
            user_id,
            session_id: "session-1",
            conversation_id,
            user_input: input,
            ai_output: "answer",
            model: Some("test-model"),
            tokens_used: 12,
        }
    }

    #[tokio::test]
    async fn test_record_exchange_writes_both_rows() {
        let db = db_with_users().await;

        db.memories()
            .record_exchange(chat("user-a", None, "hello"), "User asked: hello", 0.5)
            .await
            .unwrap();

        let history = db.memories().history("user-a", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].user_input, "hello");
        assert_eq!(history[0].tokens_used, 12);

        let candidates = db.memories().candidates("user-a", 10).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].tier, MemoryTier::ShortTerm);
        assert_eq!(candidates[0].summary, "User asked: hello");
    }

    #[tokio::test]
    async fn test_candidates_are_scoped_to_user() {
        let db = db_with_users().await;

        db.memories().create_short_term("user-a", "a likes tea", 0.5).await.unwrap();
        db.memories()
            .create_long_term(NewLongTermMemory {
                user_id: "user-b",
                summary: "b likes coffee",
                importance_score: 0.9,
                category: "preference",
                is_user_context: false,
                is_preference: true,
            })
            .await
            .unwrap();

        let a = db.memories().candidates("user-a", 10).await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].summary, "a likes tea");

        let b = db.memories().candidates("user-b", 10).await.unwrap();
        assert_eq!(b.len(), 1);
        assert_eq!(b[0].tier, MemoryTier::LongTerm);
    }

    #[tokio::test]
    async fn test_delete_conversation_only_touches_owner() {
        let db = db_with_users().await;

        db.memories().record_chat(chat("user-a", Some("conv-1"), "q1")).await.unwrap();
        db.memories().record_chat(chat("user-a", Some("conv-2"), "q2")).await.unwrap();
        db.memories().record_chat(chat("user-b", Some("conv-1"), "q3")).await.unwrap();

        let deleted = db.memories().delete_conversation("user-a", "conv-1").await.unwrap();
        assert_eq!(deleted, 1);

        assert_eq!(db.memories().history("user-a", 10).await.unwrap().len(), 1);
        assert_eq!(db.memories().history("user-b", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_conversation_forgets_its_memories() {
        let db = db_with_users().await;

        db.memories()
            .record_exchange(chat("user-a", Some("conv-1"), "q1"), "User asked: q1", 0.5)
            .await
            .unwrap();
        db.memories()
            .record_exchange(chat("user-a", Some("conv-2"), "q2"), "User asked: q2", 0.5)
            .await
            .unwrap();
        db.memories()
            .record_exchange(chat("user-b", Some("conv-1"), "q3"), "User asked: q3", 0.5)
            .await
            .unwrap();
        db.memories().create_short_term("user-a", "standalone note", 0.5).await.unwrap();

        let deleted = db.memories().delete_conversation("user-a", "conv-1").await.unwrap();
        assert_eq!(deleted, 1);

        let mut remaining: Vec<String> = db
            .memories()
            .candidates("user-a", 10)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.summary)
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec!["User asked: q2", "standalone note"]);

        let other = db.memories().candidates("user-b", 10).await.unwrap();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].summary, "User asked: q3");
    }
}

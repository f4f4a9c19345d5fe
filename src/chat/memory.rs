//! Per-user conversational memory.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::db::{Database, MemoryTier, NewChat};

/// A remembered fact about one user.
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySnippet {
    pub summary: String,
    pub tier: MemoryTier,
    pub importance: f64,
}

/// One question/answer exchange to remember.
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub user_id: String,
    pub session_id: String,
    pub conversation_id: Option<String>,
    pub user_input: String,
    pub ai_output: String,
    pub model: Option<String>,
    pub tokens_used: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory store error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("memory engine unavailable: {0}")]
    Unavailable(String),
}

/// Stores and recalls conversational memory.
///
/// Every call names the user explicitly and implementations must never return
/// or modify rows belonging to anyone else.
#[async_trait]
pub trait MemoryEngine: Send + Sync {
    async fn retrieve(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemorySnippet>, MemoryError>;

    /// Durably store an exchange. Returns the chat id.
    async fn record_conversation(&self, record: ConversationRecord) -> Result<String, MemoryError>;
}

/// A memory handle bound to a single user.
#[derive(Clone)]
pub struct UserMemory {
    engine: Arc<dyn MemoryEngine>,
    user_id: String,
}

impl UserMemory {
    pub fn new(engine: Arc<dyn MemoryEngine>, user_id: impl Into<String>) -> Self {
        Self {
            engine,
            user_id: user_id.into(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<MemorySnippet>, MemoryError> {
        self.engine.retrieve(&self.user_id, query, limit).await
    }

    /// Store an exchange for this handle's user.
    pub async fn record(
        &self,
        session_id: &str,
        conversation_id: Option<&str>,
        user_input: &str,
        ai_output: &str,
        model: Option<&str>,
        tokens_used: i64,
    ) -> Result<String, MemoryError> {
        self.engine
            .record_conversation(ConversationRecord {
                user_id: self.user_id.clone(),
                session_id: session_id.to_string(),
                conversation_id: conversation_id.map(str::to_string),
                user_input: user_input.to_string(),
                ai_output: ai_output.to_string(),
                model: model.map(str::to_string),
                tokens_used,
            })
            .await
    }
}

/// Candidates read per tier before ranking.
const CANDIDATES_PER_TIER: i64 = 100;
/// Query words shorter than this are ignored for matching.
const MIN_KEYWORD_LEN: usize = 3;
/// Longest user input kept in a short-term summary.
const SUMMARY_INPUT_CHARS: usize = 200;
const SHORT_TERM_IMPORTANCE: f64 = 0.5;
/// Fixed lead-in of every short-term summary. Not matched against queries.
const SUMMARY_PREFIX: &str = "User asked: ";

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_KEYWORD_LEN)
        .map(str::to_lowercase)
        .collect()
}

fn summarize(user_input: &str) -> String {
    let trimmed = user_input.trim();
    let mut summary: String = trimmed.chars().take(SUMMARY_INPUT_CHARS).collect();
    if trimmed.chars().count() > SUMMARY_INPUT_CHARS {
        summary.push_str("...");
    }
    format!("{SUMMARY_PREFIX}{summary}")
}

fn summary_keywords(summary: &str) -> HashSet<String> {
    keywords(summary.strip_prefix(SUMMARY_PREFIX).unwrap_or(summary))
}

/// Memory engine over the local memory tables.
///
/// Recall ranks a user's recent memories by how many query keywords they
/// share, breaking ties on importance.
pub struct SqlMemoryEngine {
    db: Database,
}

impl SqlMemoryEngine {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl MemoryEngine for SqlMemoryEngine {
    async fn retrieve(
        &self,
        user_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemorySnippet>, MemoryError> {
        let wanted = keywords(query);
        if wanted.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let candidates = self
            .db
            .memories()
            .candidates(user_id, CANDIDATES_PER_TIER)
            .await?;

        let mut scored: Vec<(usize, MemorySnippet)> = candidates
            .into_iter()
            .filter_map(|row| {
                let hits = summary_keywords(&row.summary).intersection(&wanted).count();
                (hits > 0).then(|| {
                    (
                        hits,
                        MemorySnippet {
                            summary: row.summary,
                            tier: row.tier,
                            importance: row.importance_score,
                        },
                    )
                })
            })
            .collect();

        // Stable sort keeps the newest-first candidate order among equals.
        scored.sort_by(|(a_hits, a), (b_hits, b)| {
            b_hits
                .cmp(a_hits)
                .then_with(|| b.importance.total_cmp(&a.importance))
        });

        Ok(scored.into_iter().take(limit).map(|(_, m)| m).collect())
    }

    async fn record_conversation(&self, record: ConversationRecord) -> Result<String, MemoryError> {
        let chat_id = self
            .db
            .memories()
            .record_exchange(
                NewChat {
                    user_id: &record.user_id,
                    session_id: &record.session_id,
                    conversation_id: record.conversation_id.as_deref(),
                    user_input: &record.user_input,
                    ai_output: &record.ai_output,
                    model: record.model.as_deref(),
                    tokens_used: record.tokens_used,
                },
                &summarize(&record.user_input),
                SHORT_TERM_IMPORTANCE,
            )
            .await?;
        Ok(chat_id)
    }
}

//! Request-scoped chat sessions.
//!
//! A [`SessionFactory`] is shared by all requests but holds only immutable
//! handles. Each chat request opens its own [`ChatSession`] bound to the
//! caller, uses it once and drops it, so no conversational state can leak
//! between requests or users.

mod memory;
mod rag;

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use memory::{
    ConversationRecord, MemoryEngine, MemoryError, MemorySnippet, SqlMemoryEngine, UserMemory,
};
pub use rag::{HttpRagEngine, RagAnswer, RagEngine, RagError, RagSource};

#[derive(Debug, Clone)]
pub struct ChatSettings {
    /// Documents requested from the RAG engine per question
    pub top_k: usize,
    /// Memory snippets prepended to each question
    pub memory_limit: usize,
    /// Model name recorded alongside each exchange
    pub model: Option<String>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            memory_limit: 5,
            model: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error(transparent)]
    Rag(#[from] RagError),
}

/// Builds a fresh [`ChatSession`] per request.
pub struct SessionFactory {
    rag: Arc<dyn RagEngine>,
    memory: Arc<dyn MemoryEngine>,
    settings: ChatSettings,
}

impl SessionFactory {
    pub fn new(rag: Arc<dyn RagEngine>, memory: Arc<dyn MemoryEngine>, settings: ChatSettings) -> Self {
        Self {
            rag,
            memory,
            settings,
        }
    }

    /// Open a new session for one user. Never cached or reused.
    pub fn open_session(&self, user_id: &str, user_email: Option<&str>) -> ChatSession {
        let session_id = format!("session_{}", uuid::Uuid::new_v4().simple());
        debug!(user_id, session_id = %session_id, "Opened chat session");
        ChatSession {
            session_id,
            user_email: user_email.map(str::to_string),
            rag: self.rag.clone(),
            memory: UserMemory::new(self.memory.clone(), user_id),
            settings: self.settings.clone(),
        }
    }
}

/// A single-use chat session bound to one user.
pub struct ChatSession {
    session_id: String,
    user_email: Option<String>,
    rag: Arc<dyn RagEngine>,
    memory: UserMemory,
    settings: ChatSettings,
}

/// An answer plus the background task recording it.
///
/// Dropping `recording` detaches the task; it still runs to completion.
pub struct ChatReply {
    pub answer: RagAnswer,
    pub recording: JoinHandle<()>,
}

/// Prefix a question with what is remembered about the user.
pub fn build_query(query: &str, memories: &[MemorySnippet]) -> String {
    let lines: Vec<&str> = memories
        .iter()
        .map(|m| m.summary.trim())
        .filter(|s| !s.is_empty())
        .collect();

    if lines.is_empty() {
        return query.to_string();
    }

    let mut combined = String::from("\n\nPrevious user-specific information:\n");
    for line in lines {
        combined.push_str("- ");
        combined.push_str(line);
        combined.push('\n');
    }
    combined.push_str("User question: ");
    combined.push_str(query);
    combined
}

impl ChatSession {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        self.memory.user_id()
    }

    pub fn user_email(&self) -> Option<&str> {
        self.user_email.as_deref()
    }

    /// Answer a question with the user's memories as extra context.
    ///
    /// Memory failures are logged and the question is answered from the
    /// documents alone. Only a RAG failure is returned as an error.
    pub async fn ask(
        self,
        query: &str,
        top_k: Option<usize>,
        conversation_id: Option<&str>,
    ) -> Result<ChatReply, ChatError> {
        let top_k = top_k.unwrap_or(self.settings.top_k);

        let memories = match self.memory.retrieve(query, self.settings.memory_limit).await {
            Ok(memories) => memories,
            Err(e) => {
                warn!(
                    user_id = self.user_id(),
                    error = %e,
                    "Memory retrieval failed, answering without personalization"
                );
                Vec::new()
            }
        };
        debug!(
            user_id = self.user_id(),
            count = memories.len(),
            "Retrieved memories"
        );

        let combined = build_query(query, &memories);
        let answer = self.rag.ask(&combined, top_k).await?;

        let memory = self.memory.clone();
        let session_id = self.session_id.clone();
        let conversation_id = conversation_id.map(str::to_string);
        let user_input = query.to_string();
        let ai_output = answer.answer.clone();
        let model = self.settings.model.clone();
        let tokens_used = answer.tokens_used.unwrap_or(0);

        let recording = tokio::spawn(async move {
            if let Err(e) = memory
                .record(
                    &session_id,
                    conversation_id.as_deref(),
                    &user_input,
                    &ai_output,
                    model.as_deref(),
                    tokens_used,
                )
                .await
            {
                warn!(user_id = memory.user_id(), error = %e, "Failed to record conversation");
            }
        });

        Ok(ChatReply { answer, recording })
    }
}

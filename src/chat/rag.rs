//! Retrieval-augmented answer engine.
//!
//! The engine owns the document index and the language model; this crate only
//! sends it a question and reads back an answer with its sources.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One retrieved passage backing an answer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RagSource {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagAnswer {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<RagSource>,
    #[serde(default)]
    pub tokens_used: Option<i64>,
}

#[derive(Debug, thiserror::Error)]
pub enum RagError {
    #[error("RAG request failed: {0}")]
    Request(String),
    #[error("RAG request timed out after {0:?}")]
    Timeout(Duration),
    #[error("RAG engine returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid RAG response: {0}")]
    InvalidResponse(String),
}

/// Answers questions against the shared document corpus.
///
/// Implementations know nothing about users.
#[async_trait]
pub trait RagEngine: Send + Sync {
    async fn ask(&self, query: &str, top_k: usize) -> Result<RagAnswer, RagError>;
}

#[derive(Serialize)]
struct AskRequest<'a> {
    query: &'a str,
    top_k: usize,
}

/// RAG engine reached over HTTP: `POST {base_url}/ask`.
pub struct HttpRagEngine {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRagEngine {
    /// Default request timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RagError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RagError::Request(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            timeout,
        })
    }
}

#[async_trait]
impl RagEngine for HttpRagEngine {
    async fn ask(&self, query: &str, top_k: usize) -> Result<RagAnswer, RagError> {
        let response = self
            .client
            .post(format!("{}/ask", self.base_url.trim_end_matches('/')))
            .json(&AskRequest { query, top_k })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RagError::Timeout(self.timeout)
                } else {
                    RagError::Request(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RagError::Status { status, body });
        }

        response
            .json::<RagAnswer>()
            .await
            .map_err(|e| RagError::InvalidResponse(e.to_string()))
    }
}

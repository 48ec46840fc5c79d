//! Knowledge lookup used by the engine mid-turn.
//!
//! [`RetrievalClient::search`] never fails: backend trouble, empty results and
//! low scores all collapse to [`NO_INFORMATION_FOUND`], so the conversation
//! can carry on.

mod http;

pub use http::{DEFAULT_TIMEOUT, HttpKnowledgeIndex};

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::engine::Capability;

pub const NO_INFORMATION_FOUND: &str = "No specific information found.";
pub const PASSAGE_SEPARATOR: &str = "\n---\n";

pub const SEARCH_TOOL_NAME: &str = "search_knowledge_base";
pub const SEARCH_TOOL_DESCRIPTION: &str = "Search the knowledge base for facts about the organisation: \
people, roles, schedules, policies, fees and contact details. \
Use this before answering any question about the organisation.";

/// One ranked hit from the index. `score` is a relevance value in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    pub score: f32,
}

impl Passage {
    #[must_use]
    pub fn new(text: impl Into<String>, score: f32) -> Self {
        Self {
            text: text.into(),
            score,
        }
    }
}

/// A semantic search backend.
#[async_trait]
pub trait KnowledgeIndex: Send + Sync {
    /// # Errors
    /// Returns an error if the backend cannot be reached or answers badly.
    async fn query(&self, query: &str, top_k: usize) -> Result<Vec<Passage>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchOptions {
    pub top_k: usize,
    pub min_score: f32,
    pub max_chars_per_passage: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            top_k: 10,
            min_score: 0.3,
            max_chars_per_passage: 2000,
        }
    }
}

/// Keep non-blank passages scoring strictly above `min_score`, best first,
/// at most `top_k` of them, each cut to `max_chars` characters.
#[must_use]
pub fn format_passages(mut passages: Vec<Passage>, top_k: usize, min_score: f32, max_chars: usize) -> String {
    passages.retain(|p| p.score > min_score && !p.text.trim().is_empty());
    passages.sort_by(|a, b| b.score.total_cmp(&a.score));
    passages.truncate(top_k);
    if passages.is_empty() {
        return NO_INFORMATION_FOUND.to_string();
    }
    passages
        .iter()
        .map(|p| truncate_chars(&p.text, max_chars))
        .collect::<Vec<_>>()
        .join(PASSAGE_SEPARATOR)
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[derive(Clone)]
pub struct RetrievalClient {
    index: Arc<dyn KnowledgeIndex>,
    options: SearchOptions,
}

impl RetrievalClient {
    #[must_use]
    pub fn new(index: Arc<dyn KnowledgeIndex>, options: SearchOptions) -> Self {
        Self { index, options }
    }

    pub async fn search(&self, query: &str, top_k: usize, min_score: f32, max_chars_per_passage: usize) -> String {
        let query = query.trim();
        if query.is_empty() {
            return NO_INFORMATION_FOUND.to_string();
        }
        match self.index.query(query, top_k).await {
            Ok(passages) => {
                let hits = passages.len();
                let text = format_passages(passages, top_k, min_score, max_chars_per_passage);
                tracing::info!(query, hits, "Knowledge search finished");
                text
            }
            Err(err) => {
                tracing::warn!(query, error = %err, "Knowledge search failed");
                NO_INFORMATION_FOUND.to_string()
            }
        }
    }

    /// [`Self::search`] with the configured defaults.
    pub async fn search_default(&self, query: &str) -> String {
        let SearchOptions {
            top_k,
            min_score,
            max_chars_per_passage,
        } = self.options;
        self.search(query, top_k, min_score, max_chars_per_passage).await
    }
}

#[async_trait]
impl Capability for RetrievalClient {
    async fn invoke(&self, query: &str) -> String {
        self.search_default(query).await
    }
}

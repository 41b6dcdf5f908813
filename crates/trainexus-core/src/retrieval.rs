//! Document retrieval collaborator.
//!
//! The engine asks for excerpts once per simulation run and treats the
//! answer as a ranked black box.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::RetrievalError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Excerpt {
    pub text: String,
    pub score: f32,
}

#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    /// Ranked excerpts (best first) relevant to `query` for scenario `tag`.
    async fn retrieve(&self, tag: &str, query: &str) -> Result<Vec<Excerpt>, RetrievalError>;
}

/// Retriever for scenarios without linked documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDocuments;

#[async_trait]
impl DocumentRetriever for NoDocuments {
    async fn retrieve(&self, _tag: &str, _query: &str) -> Result<Vec<Excerpt>, RetrievalError> {
        Ok(Vec::new())
    }
}

/// Fixed excerpts per tag, ranked by score.
#[derive(Debug, Clone, Default)]
pub struct StaticRetriever {
    excerpts: HashMap<String, Vec<Excerpt>>,
    limit: Option<usize>,
}

impl StaticRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_excerpt(mut self, tag: &str, text: &str, score: f32) -> Self {
        self.excerpts.entry(tag.to_string()).or_default().push(Excerpt {
            text: text.to_string(),
            score,
        });
        self
    }

    /// Return at most `limit` excerpts per call.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
impl DocumentRetriever for StaticRetriever {
    async fn retrieve(&self, tag: &str, _query: &str) -> Result<Vec<Excerpt>, RetrievalError> {
        let mut found = self.excerpts.get(tag).cloned().unwrap_or_default();
        found.sort_by(|a, b| b.score.total_cmp(&a.score));
        if let Some(limit) = self.limit {
            found.truncate(limit);
        }
        Ok(found)
    }
}

/// Render excerpts as a bullet list for the `{documents}` placeholder.
pub fn format_excerpts(excerpts: &[Excerpt]) -> String {
    excerpts
        .iter()
        .map(|e| format!("- {}", e.text))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_retriever_ranks_and_limits() {
        let retriever = StaticRetriever::new()
            .with_excerpt("onboarding", "low", 0.1)
            .with_excerpt("onboarding", "high", 0.9)
            .with_excerpt("onboarding", "mid", 0.5)
            .with_limit(2);

        let found = retriever.retrieve("onboarding", "anything").await.unwrap();
        let texts: Vec<&str> = found.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["high", "mid"]);

        assert!(retriever.retrieve("other", "q").await.unwrap().is_empty());
    }

    #[test]
    fn excerpts_render_as_bullets() {
        let text = format_excerpts(&[
            Excerpt {
                text: "Refund policy: 30 days".to_string(),
                score: 1.0,
            },
            Excerpt {
                text: "Escalate to a manager".to_string(),
                score: 0.5,
            },
        ]);
        assert_eq!(text, "- Refund policy: 30 days\n- Escalate to a manager");
    }
}

//! The `LanguageModelProvider` capability.
//!
//! Used by the `QueryRouter` (C8) for project-selection fallback and,
//! optionally, by the frontend's `ask` invocation for answer synthesis.
//! The retrieval core itself never requires a language model.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A single message in a chat-style prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

/// Recognized option keys for `stream_chat`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub tools: Option<serde_json::Value>,
}

/// One chunk of a streamed chat response.
#[derive(Debug, Clone)]
pub enum ChatStreamChunk {
    Text(String),
    ToolCall { name: String, arguments: serde_json::Value },
    Usage { prompt_tokens: u32, completion_tokens: u32 },
    Done,
}

/// A candidate project offered to the language model for routing.
#[derive(Debug, Clone)]
pub struct RoutingCandidate {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
}

/// The language model's project-selection decision.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub project_ids: Vec<String>,
    pub confidence: f32,
}

#[async_trait]
pub trait LanguageModelProvider: Send + Sync {
    /// Streams a chat completion. The core never calls this directly for
    /// retrieval; it is exposed for the frontend's `ask` path.
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> anyhow::Result<Vec<ChatStreamChunk>>;

    /// Used by `QueryRouter` (C8) method `llm`: pick zero or more projects
    /// from `candidates` for `query`, with a confidence in `[0,1]`.
    async fn route_query(
        &self,
        query: &str,
        candidates: &[RoutingCandidate],
    ) -> anyhow::Result<RoutingDecision>;
}

#[cfg(test)]
pub mod fake {
    use super::*;

    /// A fake LM that always routes to every candidate with a fixed
    /// confidence, for exercising the `llm` and `fallback_all` paths
    /// without a real model.
    pub struct FakeLanguageModel {
        pub confidence: f32,
        pub pick: Option<Vec<String>>,
    }

    impl FakeLanguageModel {
        pub fn always_confident(pick: Vec<String>) -> Self {
            FakeLanguageModel {
                confidence: 0.95,
                pick: Some(pick),
            }
        }

        pub fn never_confident() -> Self {
            FakeLanguageModel {
                confidence: 0.1,
                pick: None,
            }
        }
    }

    #[async_trait]
    impl LanguageModelProvider for FakeLanguageModel {
        async fn stream_chat(
            &self,
            _messages: &[ChatMessage],
            _options: &ChatOptions,
        ) -> anyhow::Result<Vec<ChatStreamChunk>> {
            Ok(vec![
                ChatStreamChunk::Text("fake response".into()),
                ChatStreamChunk::Done,
            ])
        }

        async fn route_query(
            &self,
            _query: &str,
            candidates: &[RoutingCandidate],
        ) -> anyhow::Result<RoutingDecision> {
            let project_ids = self.pick.clone().unwrap_or_else(|| {
                candidates.iter().map(|c| c.id.clone()).collect()
            });
            Ok(RoutingDecision {
                project_ids,
                confidence: self.confidence,
            })
        }
    }
}

//! services/api/src/adapters/knowledge_base.rs
//!
//! Retrieval for the course chat. Questions are embedded with OpenAI and looked
//! up in a Pinecone index filled by the ingestion job.
//! It implements the `KnowledgeBaseService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig, error::OpenAIError, types::embeddings::CreateEmbeddingRequestArgs, Client,
};
use async_trait::async_trait;
use ecos_core::ports::{KnowledgeBaseService, PortError, PortResult};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const PINECONE_API_VERSION: &str = "2024-07";

//=========================================================================================
// Pinecone Wire Types
//=========================================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<QueryMatch>,
}

#[derive(Debug, Deserialize)]
struct QueryMatch {
    #[serde(default)]
    score: f32,
    #[serde(default)]
    metadata: Option<MatchMetadata>,
}

#[derive(Debug, Deserialize)]
struct MatchMetadata {
    #[serde(default)]
    text: Option<String>,
}

/// Keeps the passage text of each match, best first, skipping matches that
/// were indexed without text.
fn passages_from(response: QueryResponse) -> Vec<String> {
    let mut matches = response.matches;
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches
        .into_iter()
        .filter_map(|m| m.metadata.and_then(|md| md.text))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `KnowledgeBaseService` with OpenAI embeddings and Pinecone.
#[derive(Clone)]
pub struct PineconeKnowledgeBase {
    openai: Client<OpenAIConfig>,
    http: reqwest::Client,
    embedding_model: String,
    index_host: String,
    api_key: String,
}

impl PineconeKnowledgeBase {
    /// Creates a new `PineconeKnowledgeBase`. `index_host` may be given with or
    /// without its scheme.
    pub fn new(
        openai: Client<OpenAIConfig>,
        embedding_model: String,
        index_host: String,
        api_key: String,
    ) -> Self {
        let index_host = if index_host.starts_with("http") {
            index_host.trim_end_matches('/').to_string()
        } else {
            format!("https://{}", index_host.trim_end_matches('/'))
        };
        Self {
            openai,
            http: reqwest::Client::new(),
            embedding_model,
            index_host,
            api_key,
        }
    }

    async fn embed(&self, text: &str) -> PortResult<Vec<f32>> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .input(text)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .openai
            .embeddings()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Unexpected(e.to_string()))?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| PortError::Unexpected("Embedding response was empty.".to_string()))
    }
}

//=========================================================================================
// `KnowledgeBaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl KnowledgeBaseService for PineconeKnowledgeBase {
    async fn search(&self, query: &str, top_k: usize) -> PortResult<Vec<String>> {
        let vector = self.embed(query).await?;

        let response = self
            .http
            .post(format!("{}/query", self.index_host))
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", PINECONE_API_VERSION)
            .json(&QueryRequest {
                vector: &vector,
                top_k,
                include_metadata: true,
            })
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("Pinecone request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(PortError::Unexpected(format!(
                "Pinecone query failed with status {}: {}",
                status, error_text
            )));
        }

        let body: QueryResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("Failed to parse Pinecone response: {}", e)))?;

        let passages = passages_from(body);
        debug!("Retrieved {} passages for question", passages.len());
        Ok(passages)
    }
}

/// Used when no index is configured: the chat then answers from the model alone.
#[derive(Clone, Default)]
pub struct EmptyKnowledgeBase;

#[async_trait]
impl KnowledgeBaseService for EmptyKnowledgeBase {
    async fn search(&self, _query: &str, _top_k: usize) -> PortResult<Vec<String>> {
        warn!("No vector index configured; answering without retrieved context.");
        Ok(Vec::new())
    }
}

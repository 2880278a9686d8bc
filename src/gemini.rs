use crate::config::env_string;
use crate::error::{ProviderError, RagError};
use crate::providers::{ChatModel, Embedder, Embedding, GenerationParams};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::env;

const EMBEDDING_MODEL: &str = "models/text-embedding-004";
const GENERATION_MODEL: &str = "models/gemini-2.0-flash";

/// Configuration for Gemini API
#[derive(Clone, Debug)]
pub struct GeminiConfig {
    pub api_key: String,
    pub embeddings_url: String,
    pub generate_url: String,
}

impl GeminiConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = env::var("GEMINI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(RagError::MissingApiKey("GEMINI_API_KEY"))?;
        let embeddings_url = env_string(
            "GEMINI_EMBEDDINGS_URL",
            "https://generativelanguage.googleapis.com/v1beta/models/text-embedding-004:embedContent",
        );
        let generate_url = env_string(
            "GEMINI_GENERATE_URL",
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent",
        );

        Ok(GeminiConfig {
            api_key,
            embeddings_url,
            generate_url,
        })
    }
}

/// Client for interacting with Gemini API
#[derive(Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    /// Create a new Gemini client
    pub fn new(config: GeminiConfig) -> Self {
        let client = reqwest::Client::new();
        GeminiClient { config, client }
    }

    /// Get the client configuration
    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    /// Generate embeddings for a text
    pub async fn get_embedding(&self, text: &str) -> Result<Embedding> {
        #[derive(Serialize)]
        struct EmbeddingContent<'a> {
            parts: Vec<Part<'a>>,
        }

        #[derive(Serialize)]
        struct EmbeddingRequest<'a> {
            model: &'static str,
            content: EmbeddingContent<'a>,
        }

        let request = EmbeddingRequest {
            model: EMBEDDING_MODEL,
            content: EmbeddingContent {
                parts: vec![Part { text }],
            },
        };

        let url = format!("{}?key={}", self.config.embeddings_url, self.config.api_key);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Embedding(ProviderError::from_transport(e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(
                RagError::Embedding(ProviderError::from_status(status, &error_text)).into(),
            );
        }

        let response_data: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::MalformedResponse(e.to_string()))?;

        Ok(Embedding {
            values: response_data.embedding.values,
        })
    }

    /// Generate text using Gemini model
    pub async fn generate_text(&self, prompt: &str, params: GenerationParams) -> Result<String> {
        let request = GenerateRequest {
            model: GENERATION_MODEL,
            contents: vec![Content::new_with_role(prompt, "user")],
            generation_config: GenerationConfig {
                temperature: params.temperature,
                top_p: 0.8,
                top_k: 40,
                max_output_tokens: params.max_tokens,
            },
        };

        let url = format!("{}?key={}", self.config.generate_url, self.config.api_key);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| RagError::Llm(ProviderError::from_transport(e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(
                RagError::Llm(ProviderError::from_status(status, &error_text)).into(),
            );
        }

        let response_data: GenerateResponse = response
            .json()
            .await
            .map_err(|e| RagError::MalformedResponse(e.to_string()))?;

        // Extract the generated text from the response
        response_data
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| RagError::MalformedResponse("No response generated".to_string()).into())
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    /// Gemini's embedContent takes one text per call
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.get_embedding(text).await?);
        }
        Ok(embeddings)
    }

    fn model(&self) -> &str {
        EMBEDDING_MODEL
    }
}

#[async_trait]
impl ChatModel for GeminiClient {
    async fn complete(&self, prompt: &str, params: GenerationParams) -> Result<String> {
        self.generate_text(prompt, params).await
    }

    fn model(&self) -> &str {
        GENERATION_MODEL
    }
}

// Shared request/response structures for the Gemini API

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    embedding: EmbeddingData,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    values: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'static str,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
    role: &'static str,
}

impl<'a> Content<'a> {
    fn new_with_role(text: &'a str, role: &'static str) -> Self {
        Content {
            parts: vec![Part { text }],
            role,
        }
    }
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client(server: &MockServer) -> GeminiClient {
        GeminiClient::new(GeminiConfig {
            api_key: "gem_key".to_string(),
            embeddings_url: server.url("/embed"),
            generate_url: server.url("/generate"),
        })
    }

    #[tokio::test]
    async fn embed_issues_one_call_per_text() {
        let server = MockServer::start_async().await;

        let embed_mock = server.mock(|when, then| {
            when.method(POST).path("/embed").query_param("key", "gem_key");
            then.status(200)
                .json_body(json!({ "embedding": { "values": [0.5, 0.5] } }));
        });

        let embeddings = client(&server)
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[1].values, vec![0.5, 0.5]);
        embed_mock.assert_calls(2);
    }

    #[tokio::test]
    async fn generate_extracts_first_candidate() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/generate");
            then.status(200).json_body(json!({
                "candidates": [
                    { "content": { "parts": [ { "text": "A knowledge graph." } ] } }
                ]
            }));
        });

        let text = client(&server)
            .complete("Define KG", GenerationParams::extraction())
            .await
            .unwrap();

        assert_eq!(text, "A knowledge graph.");
    }

    #[tokio::test]
    async fn empty_candidates_are_malformed() {
        let server = MockServer::start_async().await;

        server.mock(|when, then| {
            when.method(POST).path("/generate");
            then.status(200).json_body(json!({ "candidates": [] }));
        });

        let err = client(&server)
            .complete("Define KG", GenerationParams::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::MalformedResponse(_))
        ));
    }
}

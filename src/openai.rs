use crate::config::{env_or, env_string, API_KEY_VAR};
use crate::error::{ProviderError, RagError};
use crate::providers::{ChatModel, Embedder, Embedding, GenerationParams};
use anyhow::Result;
use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use std::env;

/// Configuration for an OpenAI-compatible API (SiliconFlow by default)
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub params: GenerationParams,
}

impl OpenAiConfig {
    /// Create a new configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let api_key = env::var(API_KEY_VAR)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or(RagError::MissingApiKey(API_KEY_VAR))?;
        let defaults = GenerationParams::default();

        Ok(OpenAiConfig {
            api_key,
            base_url: env_string("OPENAI_BASE_URL", "https://api.siliconflow.cn/v1"),
            chat_model: env_string("LLM_MODEL", "deepseek-ai/DeepSeek-V3.2"),
            embedding_model: env_string("EMBEDDING_MODEL", "BAAI/bge-m3"),
            params: GenerationParams {
                temperature: env_or("LLM_TEMPERATURE", defaults.temperature)?,
                max_tokens: env_or("LLM_MAX_TOKENS", defaults.max_tokens)?,
            },
        })
    }
}

/// Client for chat completions and embeddings over the OpenAI wire format
#[derive(Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a new client
    pub fn new(config: OpenAiConfig) -> Self {
        let client = reqwest::Client::new();
        OpenAiClient { config, client }
    }

    /// Get the client configuration
    pub fn config(&self) -> &OpenAiConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Generate embeddings for a batch of texts
    pub async fn get_embeddings(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        let request = EmbeddingRequest {
            model: &self.config.embedding_model,
            input: texts,
            encoding_format: "float",
        };
        debug!(
            "Requesting {} embeddings from {}",
            texts.len(),
            self.config.embedding_model
        );

        let response = self
            .client
            .post(self.url("embeddings"))
            .bearer_auth(&self.config.api_key)
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

        let mut response_data: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| RagError::MalformedResponse(e.to_string()))?;
        response_data.data.sort_by_key(|d| d.index);

        if response_data.data.len() != texts.len() {
            return Err(RagError::MalformedResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                response_data.data.len()
            ))
            .into());
        }

        Ok(response_data
            .data
            .into_iter()
            .map(|d| Embedding { values: d.embedding })
            .collect())
    }

    /// Generate text for a single user prompt
    pub async fn generate_text(&self, prompt: &str, params: GenerationParams) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.chat_model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let response = self
            .client
            .post(self.url("chat/completions"))
            .bearer_auth(&self.config.api_key)
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

        let response_data: ChatResponse = response
            .json()
            .await
            .map_err(|e| RagError::MalformedResponse(e.to_string()))?;

        response_data
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RagError::MalformedResponse("No response generated".to_string()).into())
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        self.get_embeddings(texts).await
    }

    fn model(&self) -> &str {
        &self.config.embedding_model
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn complete(&self, prompt: &str, params: GenerationParams) -> Result<String> {
        self.generate_text(prompt, params).await
    }

    fn model(&self) -> &str {
        &self.config.chat_model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Deserialize, Debug)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize, Debug)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: Option<String>,
}

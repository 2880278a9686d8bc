//! Provider seams: anything that turns text into vectors or prompts into text

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Representation of a vector embedding
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.values.len()
    }
}

/// Sampling parameters for a single completion
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationParams {
    /// Low-variance settings used for structured extraction
    pub fn extraction() -> Self {
        GenerationParams {
            temperature: 0.3,
            max_tokens: 1024,
        }
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        GenerationParams {
            temperature: 0.7,
            max_tokens: 8192,
        }
    }
}

/// Trait for embedding APIs
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input in the same order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Embedding>>;

    /// Model name for logging
    fn model(&self) -> &str;
}

/// Trait for chat / completion APIs
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Send a single user prompt and return the generated text
    async fn complete(&self, prompt: &str, params: GenerationParams) -> Result<String>;

    /// Model name for logging
    fn model(&self) -> &str;
}

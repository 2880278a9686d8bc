use anyhow::{anyhow, Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Variable holding the key for the OpenAI-compatible provider
pub const API_KEY_VAR: &str = "DEEPSEEK_API_KEY";

/// Read an environment variable, falling back to a default when unset
pub(crate) fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow!("Invalid value for {}: {} ({})", name, raw, e)),
        _ => Ok(default),
    }
}

pub(crate) fn env_string(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// Which LLM / embedding provider serves requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    /// Any OpenAI-compatible API (SiliconFlow by default)
    OpenAi,
    Gemini,
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "siliconflow" | "deepseek" => Ok(ProviderKind::OpenAi),
            "gemini" => Ok(ProviderKind::Gemini),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// Where chunk embeddings are stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorBackend {
    /// JSON file under the data directory
    Local,
    Qdrant,
}

impl FromStr for VectorBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" | "file" => Ok(VectorBackend::Local),
            "qdrant" => Ok(VectorBackend::Qdrant),
            other => Err(format!("unknown vector backend '{}'", other)),
        }
    }
}

/// Text splitting parameters, measured in characters
#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        ChunkingConfig {
            chunk_size: 600,
            chunk_overlap: 100,
        }
    }
}

impl ChunkingConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let config = ChunkingConfig {
            chunk_size: env_or("CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: env_or("CHUNK_OVERLAP", defaults.chunk_overlap)?,
        };
        if config.chunk_size == 0 || config.chunk_overlap >= config.chunk_size {
            return Err(anyhow!(
                "CHUNK_OVERLAP ({}) must be smaller than a non-zero CHUNK_SIZE ({})",
                config.chunk_overlap,
                config.chunk_size
            ));
        }
        Ok(config)
    }
}

/// Per-document entity limits for knowledge graph extraction
#[derive(Debug, Clone, Copy)]
pub struct GraphConfig {
    pub max_keywords: usize,
    pub max_methods: usize,
    pub max_fields: usize,
    pub max_datasets: usize,
    pub max_applications: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            max_keywords: 8,
            max_methods: 5,
            max_fields: 4,
            max_datasets: 3,
            max_applications: 3,
        }
    }
}

impl GraphConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(GraphConfig {
            max_keywords: env_or("MAX_KEYWORDS_PER_DOC", defaults.max_keywords)?,
            max_methods: env_or("MAX_METHODS_PER_DOC", defaults.max_methods)?,
            max_fields: defaults.max_fields,
            max_datasets: env_or("MAX_DATASETS_PER_DOC", defaults.max_datasets)?,
            max_applications: defaults.max_applications,
        })
    }
}

/// Filesystem layout and vector backend selection
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub backend: VectorBackend,
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        Ok(StorageConfig {
            data_dir: PathBuf::from(env_string("DATA_DIR", "data")),
            backend: env_or("VECTOR_BACKEND", VectorBackend::Local)?,
        })
    }

    /// File backing the local vector store
    pub fn local_store_path(&self) -> PathBuf {
        self.data_dir.join("vector_store.json")
    }

    /// Directory receiving knowledge graph JSON and HTML
    pub fn graphs_dir(&self) -> PathBuf {
        self.data_dir.join("graphs")
    }
}

/// Application-wide settings assembled from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub provider: ProviderKind,
    pub chunking: ChunkingConfig,
    pub retrieval_k: u64,
    pub graph: GraphConfig,
    pub storage: StorageConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Ok(AppConfig {
            provider: env_or("LLM_PROVIDER", ProviderKind::OpenAi)?,
            chunking: ChunkingConfig::from_env()?,
            retrieval_k: env_or("RETRIEVAL_K", 12)?,
            graph: GraphConfig::from_env()?,
            storage: StorageConfig::from_env()?,
        })
    }
}

/// Write the API key into a `.env` file, replacing any existing entry
pub fn save_api_key<P: AsRef<Path>>(env_path: P, api_key: &str) -> Result<()> {
    let env_path = env_path.as_ref();
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(anyhow!("API key must not be empty"));
    }

    let existing = if env_path.exists() {
        fs::read_to_string(env_path)
            .with_context(|| format!("Failed to read {}", env_path.display()))?
    } else {
        String::new()
    };

    let prefix = format!("{}=", API_KEY_VAR);
    let mut key_found = false;
    let mut lines: Vec<String> = existing
        .lines()
        .map(|line| {
            if line.trim_start().starts_with(&prefix) {
                key_found = true;
                format!("{}{}", prefix, api_key)
            } else {
                line.to_string()
            }
        })
        .collect();

    if !key_found {
        lines.push(format!("{}{}", prefix, api_key));
    }

    let mut content = lines.join("\n");
    content.push('\n');

    fs::write(env_path, content)
        .with_context(|| format!("Failed to write {}", env_path.display()))?;
    env::set_var(API_KEY_VAR, api_key);

    Ok(())
}

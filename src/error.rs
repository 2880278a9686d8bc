//! Failure points of the ingestion, retrieval and generation pipeline

use reqwest::StatusCode;
use thiserror::Error;

/// A failed call to an embedding or chat provider
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ProviderError {
    pub status: Option<StatusCode>,
    pub timed_out: bool,
    pub message: String,
}

impl ProviderError {
    /// Non-success HTTP response
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        ProviderError {
            status: Some(status),
            timed_out: false,
            message: format!("API request failed: {} {}", status, body),
        }
    }

    /// The request never produced a response
    pub fn from_transport(err: reqwest::Error) -> Self {
        ProviderError {
            status: err.status(),
            timed_out: err.is_timeout(),
            message: err.to_string(),
        }
    }

    /// Rate limits, auth throttling, server errors and timeouts.
    /// Message text is only consulted when there is no status code.
    pub fn is_retryable(&self) -> bool {
        if self.timed_out {
            return true;
        }
        match self.status {
            Some(status) => {
                status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::FORBIDDEN
                    || status.is_server_error()
            }
            None => {
                let msg = self.message.to_lowercase();
                ["rate limit", "rpm limit", "timed out", "timeout"]
                    .iter()
                    .any(|needle| msg.contains(needle))
            }
        }
    }
}

impl From<String> for ProviderError {
    fn from(message: String) -> Self {
        ProviderError {
            status: None,
            timed_out: false,
            message,
        }
    }
}

impl From<&str> for ProviderError {
    fn from(message: &str) -> Self {
        message.to_string().into()
    }
}

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Unsupported document format: {0}. Only PDF, DOCX and text files are supported.")]
    UnsupportedFormat(String),

    #[error("Failed to parse document {file}: {reason}")]
    DocumentParse { file: String, reason: String },

    #[error("Document {0} contains no extractable text")]
    EmptyDocument(String),

    #[error("Missing API key: set {0} in the environment or .env file")]
    MissingApiKey(&'static str),

    #[error("Embedding request failed: {0}")]
    Embedding(ProviderError),

    #[error("LLM request failed: {0}")]
    Llm(ProviderError),

    #[error("Vector store error: {0}")]
    VectorStore(String),

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Question is empty")]
    EmptyQuestion,

    #[error("No relevant information found in corpus {0}")]
    NoRelevantChunks(String),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

impl RagError {
    /// Whether a provider failure is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            RagError::Embedding(err) | RagError::Llm(err) => err.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_api_key_names_variable() {
        let err = RagError::MissingApiKey("DEEPSEEK_API_KEY");
        assert!(err.to_string().contains("DEEPSEEK_API_KEY"));
    }

    fn http(code: u16, body: &str) -> RagError {
        RagError::Embedding(ProviderError::from_status(
            StatusCode::from_u16(code).unwrap(),
            body,
        ))
    }

    #[test]
    fn test_retryable_classification() {
        assert!(http(429, "Too Many Requests").is_retryable());
        assert!(http(403, "RPM limit exceeded").is_retryable());
        assert!(http(503, "Service Unavailable").is_retryable());
        assert!(RagError::Llm("operation timed out".into()).is_retryable());
        assert!(RagError::Embedding("RPM limit exceeded".into()).is_retryable());
        assert!(!http(400, "Bad Request").is_retryable());
        assert!(!RagError::EmptyQuestion.is_retryable());
    }

    #[test]
    fn test_status_decides_over_body_text() {
        assert!(!http(400, "batch size must not exceed 50 items").is_retryable());
        assert!(!http(401, "rate limit tier unavailable").is_retryable());
        assert!(http(520, "Unknown Error").is_retryable());
        assert!(http(529, "Overloaded").is_retryable());
    }

    #[test]
    fn test_status_is_part_of_message() {
        let err = http(404, "model not found");
        assert_eq!(
            err.to_string(),
            "Embedding request failed: API request failed: 404 Not Found model not found"
        );
    }
}

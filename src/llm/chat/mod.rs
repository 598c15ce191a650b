pub mod groq;

use async_trait::async_trait;
use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

use super::LlmConfig;
use crate::models::chat::PromptMessage;
use self::groq::GroqChatClient;

/// Why a single model attempt failed. Every variant is absorbed by the
/// fallback walk; none of them fails the request on its own.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("malformed response body: {0}")]
    MalformedBody(String),

    #[error("response contained no choices")]
    EmptyChoices,

    #[error("request error: {0}")]
    Request(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else if err.is_connect() {
            UpstreamError::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            UpstreamError::Status(status.as_u16())
        } else if err.is_decode() {
            UpstreamError::MalformedBody(err.to_string())
        } else {
            UpstreamError::Request(err.to_string())
        }
    }
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Runs one non-streaming completion of `messages` against `model` and
    /// returns the text of the first choice.
    async fn complete(
        &self,
        messages: &[PromptMessage],
        model: &str
    ) -> Result<String, UpstreamError>;

    fn get_base_url(&self) -> Option<String>;
}

pub fn new_client(
    config: &LlmConfig
) -> Result<Arc<dyn ChatClient>, Box<dyn StdError + Send + Sync>> {
    let client = GroqChatClient::from_config(config)?;
    Ok(Arc::new(client))
}

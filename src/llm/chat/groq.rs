use async_trait::async_trait;
use log::{ debug, warn };
use reqwest::{ Client as HttpClient, StatusCode, header::{ HeaderMap, HeaderValue, CONTENT_TYPE } };
use serde::{ Deserialize, Serialize };
use std::error::Error as StdError;
use std::time::Duration;

use super::{ ChatClient, UpstreamError };
use crate::llm::{ CompletionOptions, LlmConfig };
use crate::models::chat::PromptMessage;

const DEFAULT_BASE_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

pub struct GroqChatClient {
    http: HttpClient,
    api_key: Option<String>,
    base_url: String,
    options: CompletionOptions,
}

#[derive(Serialize)]
struct GroqRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct GroqResponse {
    choices: Vec<GroqChoice>,
}

#[derive(Deserialize)]
struct GroqChoice {
    message: GroqMessage,
}

#[derive(Deserialize)]
struct GroqMessage {
    content: Option<String>,
}

impl GroqChatClient {
    pub fn new(
        api_key: Option<String>,
        base_url: Option<String>,
        timeout: Duration,
        options: CompletionOptions
    ) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        let api_url = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = HttpClient::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| Box::new(e) as Box<dyn StdError + Send + Sync>)?;

        Ok(Self {
            http,
            api_key,
            base_url: api_url,
            options,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, Box<dyn StdError + Send + Sync>> {
        if config.api_key.is_none() {
            warn!("No upstream API key configured; every completion request will be rejected by the provider.");
        }

        Self::new(
            config.api_key.clone(),
            config.base_url.clone(),
            config.timeout,
            config.options,
        )
    }
}

#[async_trait]
impl ChatClient for GroqChatClient {
    async fn complete(
        &self,
        messages: &[PromptMessage],
        model: &str
    ) -> Result<String, UpstreamError> {
        let req = GroqRequest {
            model,
            messages,
            temperature: self.options.temperature,
            max_tokens: self.options.max_tokens,
            stream: false,
        };

        let mut builder = self.http.post(&self.base_url).json(&req);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await?;
        let status = resp.status();
        if status != StatusCode::OK {
            debug!("Groq returned {} for model {}", status, model);
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let body = resp.bytes().await?;
        let parsed: GroqResponse = serde_json::from_slice(&body)
            .map_err(|e| UpstreamError::MalformedBody(e.to_string()))?;

        let content = parsed.choices
            .into_iter()
            .next()
            .ok_or(UpstreamError::EmptyChoices)?
            .message.content
            .ok_or_else(|| UpstreamError::MalformedBody("choice has no message content".into()))?;

        // An empty string is still a located reply.
        Ok(content)
    }

    fn get_base_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}

pub mod chat;

use crate::cli::Args;
use std::time::Duration;

/// Sampling parameters sent with every completion request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompletionOptions {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_tokens: 500,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout: Duration,
    pub options: CompletionOptions,
}

impl LlmConfig {
    pub fn from_args(args: &Args) -> Self {
        Self {
            api_key: Some(args.chat_api_key.clone()).filter(|k| !k.trim().is_empty()),
            base_url: Some(args.chat_base_url.clone()).filter(|u| !u.trim().is_empty()),
            timeout: Duration::from_secs(args.timeout_secs),
            options: CompletionOptions {
                temperature: args.temperature,
                max_tokens: args.max_tokens,
            },
        }
    }
}

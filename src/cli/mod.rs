use clap::Parser;

pub const DEFAULT_PRIMARY_MODEL: &str = "llama-3.1-8b-instant";

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant in a chat application. Be friendly, concise, and helpful.";

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the HTTP server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "0.0.0.0:8000")]
    pub server_addr: String,

    #[arg(long, env = "ENABLE_TLS", default_value = "false")]
    pub enable_tls: bool,

    /// Optional path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Optional path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    // --- Upstream Chat Provider Args ---
    /// API key for the upstream chat completion provider.
    /// Left empty, every upstream call fails authentication instead of aborting startup.
    #[arg(long, env = "API_KEY", default_value = "")]
    pub chat_api_key: String,

    /// Full URL of the OpenAI-compatible chat completions endpoint.
    #[arg(
        long,
        env = "CHAT_BASE_URL",
        default_value = "https://api.groq.com/openai/v1/chat/completions"
    )]
    pub chat_base_url: String,

    /// Model tried first for every request.
    #[arg(long, env = "PRIMARY_MODEL", default_value = DEFAULT_PRIMARY_MODEL)]
    pub primary_model: String,

    /// Ordered, comma separated backup models tried after the primary fails.
    #[arg(
        long,
        env = "FALLBACK_MODELS",
        value_delimiter = ',',
        default_value = "mixtral-8x7b-32768,gemma2-9b-it"
    )]
    pub fallback_models: Vec<String>,

    #[arg(long, env = "CHAT_TEMPERATURE", default_value = "0.7")]
    pub temperature: f32,

    #[arg(long, env = "CHAT_MAX_TOKENS", default_value = "500")]
    pub max_tokens: u32,

    /// Per-attempt upstream timeout in seconds.
    #[arg(long, env = "CHAT_TIMEOUT_SECS", default_value = "15")]
    pub timeout_secs: u64,

    // --- Prompt Args ---
    /// System message placed at the head of every upstream prompt.
    #[arg(long, env = "SYSTEM_PROMPT", default_value = DEFAULT_SYSTEM_PROMPT)]
    pub system_prompt: String,

    /// Maximum number of trailing context entries forwarded upstream.
    #[arg(long, env = "CONTEXT_WINDOW", default_value = "10")]
    pub context_window: usize,

    // --- History Store Args ---
    /// History chat store type (none, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "none")]
    pub history_type: String,

    /// Messages kept per conversation; also the number returned when reading one back.
    #[arg(long, env = "HISTORY_LIMIT", default_value = "50")]
    pub history_limit: usize,

    /// Conversations kept in the memory store before the oldest is dropped.
    #[arg(long, env = "HISTORY_MAX_CONVERSATIONS", default_value = "1000")]
    pub history_max_conversations: usize,
}

impl Args {
    /// Primary model followed by the fallbacks, in the order they are attempted.
    /// Blank names are skipped, so a blank primary promotes the first fallback.
    pub fn model_order(&self) -> Vec<String> {
        std::iter::once(&self.primary_model)
            .chain(self.fallback_models.iter())
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect()
    }
}

use crate::cli::{ Args, DEFAULT_PRIMARY_MODEL, DEFAULT_SYSTEM_PROMPT };
use crate::history::HistoryStore;
use crate::llm::chat::ChatClient;
use crate::models::chat::{ ChatRequest, ChatResponse, PromptMessage };

use chrono::Utc;
use futures::FutureExt;
use log::{ debug, error, info, warn };
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

pub const ALL_FAILED_REPLY: &str = "I'm having trouble connecting to the AI service. Please try again.";
pub const ALL_FAILED_ERROR: &str = "All AI models failed";
pub const FAULT_REPLY: &str = "An unexpected error occurred.";
pub const ERROR_MODEL: &str = "error";

const DEFAULT_CONTEXT_WINDOW: usize = 10;
const MAX_ERROR_LEN: usize = 100;
const LOG_PREVIEW_LEN: usize = 50;

/// Faults that escape the fallback walk. Both end up as the fault-shaped
/// response, never as a transport error.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Fault(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelAttempt {
    pub model: String,
    pub error: Option<String>,
}

#[derive(Debug)]
pub enum WalkOutcome {
    Succeeded {
        model: String,
        reply: String,
        attempts: Vec<ModelAttempt>,
    },
    AllFailed {
        attempts: Vec<ModelAttempt>,
    },
}

#[derive(Clone)]
pub struct Relay {
    chat_client: Arc<dyn ChatClient>,
    primary_model: String,
    fallback_models: Vec<String>,
    system_prompt: String,
    context_window: usize,
    history_store: Option<Arc<dyn HistoryStore>>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn preview(text: &str, len: usize) -> String {
    text.chars().take(len).collect()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "request handler panicked".to_string()
    }
}

impl Relay {
    pub fn new(
        chat_client: Arc<dyn ChatClient>,
        primary_model: impl Into<String>,
        fallback_models: Vec<String>
    ) -> Self {
        Self {
            chat_client,
            primary_model: primary_model.into(),
            fallback_models,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            context_window: DEFAULT_CONTEXT_WINDOW,
            history_store: None,
        }
    }

    pub fn from_args(
        args: &Args,
        chat_client: Arc<dyn ChatClient>,
        history_store: Option<Arc<dyn HistoryStore>>
    ) -> Self {
        let mut models = args.model_order().into_iter();
        let primary = models.next().unwrap_or_else(|| DEFAULT_PRIMARY_MODEL.to_string());

        let relay = Self::new(chat_client, primary, models.collect())
            .with_system_prompt(args.system_prompt.clone())
            .with_context_window(args.context_window);

        match history_store {
            Some(store) => relay.with_history(store),
            None => relay,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_context_window(mut self, window: usize) -> Self {
        self.context_window = window;
        self
    }

    pub fn with_history(mut self, store: Arc<dyn HistoryStore>) -> Self {
        self.history_store = Some(store);
        self
    }

    pub fn history_store(&self) -> Option<&Arc<dyn HistoryStore>> {
        self.history_store.as_ref()
    }

    /// Every model in attempt order: primary first, then the fallbacks.
    pub fn models_available(&self) -> Vec<String> {
        std::iter::once(self.primary_model.clone())
            .chain(self.fallback_models.iter().cloned())
            .collect()
    }

    /// System preamble, the trailing context window, then the new user message.
    pub fn build_prompt(&self, request: &ChatRequest) -> Vec<PromptMessage> {
        let context = request.context.as_deref().unwrap_or(&[]);
        let start = context.len().saturating_sub(self.context_window);

        let mut messages = Vec::with_capacity(context.len() - start + 2);
        messages.push(PromptMessage::system(self.system_prompt.clone()));
        messages.extend(context[start..].iter().map(PromptMessage::from));
        messages.push(PromptMessage::user(request.message.clone()));
        messages
    }

    /// Tries each model once, in order, stopping at the first success.
    pub async fn complete_with_fallback(&self, messages: &[PromptMessage]) -> WalkOutcome {
        let mut attempts = Vec::new();

        for model in self.models_available() {
            debug!("Trying model {}", model);
            match self.chat_client.complete(messages, &model).await {
                Ok(reply) => {
                    attempts.push(ModelAttempt { model: model.clone(), error: None });
                    return WalkOutcome::Succeeded { model, reply, attempts };
                }
                Err(e) => {
                    warn!("Model {} failed: {}", model, e);
                    attempts.push(ModelAttempt { model, error: Some(e.to_string()) });
                }
            }
        }

        WalkOutcome::AllFailed { attempts }
    }

    /// Never fails: upstream trouble and internal faults both come back as
    /// a response with `success == false`.
    pub async fn handle(&self, request: ChatRequest) -> ChatResponse {
        let conversation_id = request.conversation_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_id);
        let message_id = new_id();

        let processed = AssertUnwindSafe(self.process(&request, &conversation_id, &message_id))
            .catch_unwind().await;

        match processed {
            Ok(response) => response,
            Err(payload) => {
                let fault = RelayError::Fault(panic_message(payload.as_ref()));
                error!("Error handling chat request {}: {}", message_id, fault);
                Self::fault_response(&fault, conversation_id, message_id)
            }
        }
    }

    pub fn fault_response(
        err: &RelayError,
        conversation_id: String,
        message_id: String
    ) -> ChatResponse {
        ChatResponse {
            reply: FAULT_REPLY.to_string(),
            conversation_id,
            message_id,
            timestamp: now(),
            model_used: ERROR_MODEL.to_string(),
            success: false,
            error: Some(preview(&err.to_string(), MAX_ERROR_LEN)),
        }
    }

    /// Fault response for a request that never produced ids of its own.
    pub fn rejected(err: &RelayError) -> ChatResponse {
        Self::fault_response(err, new_id(), new_id())
    }

    async fn process(
        &self,
        request: &ChatRequest,
        conversation_id: &str,
        message_id: &str
    ) -> ChatResponse {
        info!("Received chat message: '{}'", preview(&request.message, LOG_PREVIEW_LEN));

        let messages = self.build_prompt(request);
        self.record(conversation_id, "user", &request.message).await;

        match self.complete_with_fallback(&messages).await {
            WalkOutcome::Succeeded { model, reply, attempts } => {
                info!(
                    "Response ready from {} after {} attempt(s): {}...",
                    model,
                    attempts.len(),
                    preview(&reply, LOG_PREVIEW_LEN)
                );
                self.record(conversation_id, "assistant", &reply).await;

                ChatResponse {
                    reply,
                    conversation_id: conversation_id.to_string(),
                    message_id: message_id.to_string(),
                    timestamp: now(),
                    model_used: model,
                    success: true,
                    error: None,
                }
            }
            WalkOutcome::AllFailed { attempts } => {
                error!("All models failed for message {}: {:?}", message_id, attempts);

                ChatResponse {
                    reply: ALL_FAILED_REPLY.to_string(),
                    conversation_id: conversation_id.to_string(),
                    message_id: message_id.to_string(),
                    timestamp: now(),
                    model_used: ERROR_MODEL.to_string(),
                    success: false,
                    error: Some(ALL_FAILED_ERROR.to_string()),
                }
            }
        }
    }

    async fn record(&self, conversation_id: &str, role: &str, content: &str) {
        if let Some(store) = &self.history_store {
            if let Err(e) = store.add_message(conversation_id, role, content).await {
                warn!("Failed to record {} message for {}: {}", role, conversation_id, e);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::history::MemoryHistoryStore;
    use crate::llm::chat::UpstreamError;
    use crate::llm::chat::groq::GroqChatClient;
    use crate::llm::CompletionOptions;
    use axum::{ routing::post, Json, Router };
    use clap::Parser;
    use serde_json::{ json, Value };
    use std::time::Duration;
    use crate::models::chat::ContextEntry;
    use async_trait::async_trait;
    use std::collections::{ HashMap, HashSet };
    use std::sync::Mutex;

    /// Replies per model; models without a script answer with HTTP 503.
    #[derive(Default)]
    pub(crate) struct ScriptedClient {
        replies: HashMap<String, String>,
        pub calls: Mutex<Vec<(String, Vec<PromptMessage>)>>,
    }

    impl ScriptedClient {
        pub(crate) fn replying(pairs: &[(&str, &str)]) -> Self {
            Self {
                replies: pairs
                    .iter()
                    .map(|(m, r)| (m.to_string(), r.to_string()))
                    .collect(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn models_called(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
        }
    }

    #[async_trait]
    impl ChatClient for ScriptedClient {
        async fn complete(
            &self,
            messages: &[PromptMessage],
            model: &str
        ) -> Result<String, UpstreamError> {
            self.calls.lock().unwrap().push((model.to_string(), messages.to_vec()));
            self.replies.get(model).cloned().ok_or(UpstreamError::Status(503))
        }

        fn get_base_url(&self) -> Option<String> {
            None
        }
    }

    struct PanickingClient;

    #[async_trait]
    impl ChatClient for PanickingClient {
        async fn complete(
            &self,
            _messages: &[PromptMessage],
            _model: &str
        ) -> Result<String, UpstreamError> {
            panic!("{}", "x".repeat(300));
        }

        fn get_base_url(&self) -> Option<String> {
            None
        }
    }

    const PRIMARY: &str = "llama-3.1-8b-instant";
    const FALLBACKS: [&str; 2] = ["mixtral-8x7b-32768", "gemma2-9b-it"];

    fn relay_with(client: Arc<dyn ChatClient>) -> Relay {
        Relay::new(
            client,
            PRIMARY,
            FALLBACKS.iter().map(|m| m.to_string()).collect()
        )
    }

    fn request(message: &str) -> ChatRequest {
        ChatRequest {
            message: message.to_string(),
            conversation_id: None,
            user_id: None,
            context: None,
        }
    }

    #[tokio::test]
    async fn primary_success_uses_primary() {
        let client = Arc::new(ScriptedClient::replying(&[(PRIMARY, "hello there")]));
        let relay = relay_with(client.clone());

        let resp = relay.handle(request("hi")).await;

        assert!(resp.success);
        assert_eq!(resp.reply, "hello there");
        assert_eq!(resp.model_used, PRIMARY);
        assert!(resp.error.is_none());
        assert!(Uuid::parse_str(&resp.conversation_id).is_ok());
        assert!(Uuid::parse_str(&resp.message_id).is_ok());
        assert_eq!(client.models_called(), vec![PRIMARY]);
    }

    #[tokio::test]
    async fn falls_back_in_configured_order() {
        let client = Arc::new(ScriptedClient::replying(&[(FALLBACKS[1], "from gemma")]));
        let relay = relay_with(client.clone());

        let resp = relay.handle(request("hi")).await;

        assert!(resp.success);
        assert_eq!(resp.model_used, FALLBACKS[1]);
        assert_eq!(client.models_called(), vec![PRIMARY, FALLBACKS[0], FALLBACKS[1]]);
    }

    #[tokio::test]
    async fn first_fallback_wins_when_primary_fails() {
        let client = Arc::new(
            ScriptedClient::replying(&[(FALLBACKS[0], "mixtral"), (FALLBACKS[1], "gemma")])
        );
        let relay = relay_with(client.clone());

        let resp = relay.handle(request("hi")).await;

        assert_eq!(resp.model_used, FALLBACKS[0]);
        assert_eq!(resp.reply, "mixtral");
        assert_eq!(client.models_called(), vec![PRIMARY, FALLBACKS[0]]);
    }

    #[tokio::test]
    async fn all_models_failing_gives_fixed_failure() {
        let client = Arc::new(ScriptedClient::default());
        let relay = relay_with(client.clone());

        let resp = relay.handle(request("hi")).await;

        assert!(!resp.success);
        assert_eq!(resp.reply, ALL_FAILED_REPLY);
        assert_eq!(resp.model_used, "error");
        assert_eq!(resp.error.as_deref(), Some("All AI models failed"));
        assert_eq!(client.models_called().len(), 3);
    }

    #[tokio::test]
    async fn walk_reports_every_failed_attempt() {
        let relay = relay_with(Arc::new(ScriptedClient::default()));

        match relay.complete_with_fallback(&[PromptMessage::user("hi")]).await {
            WalkOutcome::AllFailed { attempts } => {
                let models: Vec<_> = attempts.iter().map(|a| a.model.as_str()).collect();
                assert_eq!(models, vec![PRIMARY, FALLBACKS[0], FALLBACKS[1]]);
                assert!(attempts.iter().all(|a| a.error.as_deref() == Some("upstream returned HTTP 503")));
            }
            other => panic!("expected AllFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn only_last_ten_context_entries_are_forwarded() {
        let client = Arc::new(ScriptedClient::replying(&[(PRIMARY, "ok")]));
        let relay = relay_with(client.clone());

        let context: Vec<ContextEntry> = (0..15)
            .map(|i| ContextEntry {
                role: Some(if i % 2 == 0 { "user".into() } else { "assistant".into() }),
                content: Some(format!("turn {}", i)),
            })
            .collect();
        let mut req = request("latest");
        req.context = Some(context);

        relay.handle(req).await;

        let calls = client.calls.lock().unwrap();
        let sent = &calls[0].1;
        assert_eq!(sent.len(), 12);
        assert_eq!(sent[0], PromptMessage::system(DEFAULT_SYSTEM_PROMPT));
        let forwarded: Vec<_> = sent[1..11].iter().map(|m| m.content.as_str()).collect();
        let expected: Vec<String> = (5..15).map(|i| format!("turn {}", i)).collect();
        assert_eq!(forwarded, expected);
        assert_eq!(sent[1].role, "assistant");
        assert_eq!(sent[11], PromptMessage::user("latest"));
    }

    #[test]
    fn missing_context_fields_get_defaults() {
        let relay = relay_with(Arc::new(ScriptedClient::default()));
        let mut req = request("q");
        req.context = Some(vec![ContextEntry::default()]);

        let prompt = relay.build_prompt(&req);
        assert_eq!(prompt[1], PromptMessage { role: "user".into(), content: String::new() });
    }

    #[test]
    fn custom_window_and_system_prompt() {
        let relay = relay_with(Arc::new(ScriptedClient::default()))
            .with_system_prompt("terse")
            .with_context_window(1);
        let mut req = request("q");
        req.context = Some(vec![
            ContextEntry { role: None, content: Some("a".into()) },
            ContextEntry { role: None, content: Some("b".into()) },
        ]);

        let prompt = relay.build_prompt(&req);
        assert_eq!(prompt, vec![
            PromptMessage::system("terse"),
            PromptMessage::user("b"),
            PromptMessage::user("q"),
        ]);
    }

    #[tokio::test]
    async fn conversation_id_is_kept_and_message_ids_are_unique() {
        let relay = relay_with(Arc::new(ScriptedClient::replying(&[(PRIMARY, "ok")])));

        let mut ids = HashSet::new();
        for _ in 0..5 {
            let mut req = request("hi");
            req.conversation_id = Some("conv-42".into());
            let resp = relay.handle(req).await;
            assert_eq!(resp.conversation_id, "conv-42");
            assert!(ids.insert(resp.message_id));
        }
    }

    #[tokio::test]
    async fn panic_becomes_truncated_fault_response() {
        let relay = relay_with(Arc::new(PanickingClient));
        let mut req = request("hi");
        req.conversation_id = Some("c".into());

        let resp = relay.handle(req).await;

        assert!(!resp.success);
        assert_eq!(resp.reply, FAULT_REPLY);
        assert_eq!(resp.model_used, "error");
        assert_eq!(resp.conversation_id, "c");
        assert_eq!(resp.error.unwrap().chars().count(), 100);
    }

    #[test]
    fn rejected_request_error_is_truncated() {
        let err = RelayError::InvalidRequest("y".repeat(500));
        let resp = Relay::rejected(&err);
        assert!(!resp.success);
        let message = resp.error.unwrap();
        assert!(message.starts_with("Invalid request: yyy"));
        assert!(message.chars().count() <= 100);
    }

    #[tokio::test]
    async fn exchange_is_recorded_when_history_is_injected() {
        let store = Arc::new(MemoryHistoryStore::default());
        let relay = relay_with(Arc::new(ScriptedClient::replying(&[(PRIMARY, "answer")])))
            .with_history(store.clone());
        let mut req = request("question");
        req.conversation_id = Some("c9".into());

        relay.handle(req).await;

        let conv = store.get_conversation("c9", 10).await.unwrap();
        let turns: Vec<_> = conv.messages
            .iter()
            .map(|m| (m.role.as_str(), m.content.as_str()))
            .collect();
        assert_eq!(turns, vec![("user", "question"), ("assistant", "answer")]);
    }

    #[test]
    fn models_available_lists_primary_then_fallbacks() {
        let relay = relay_with(Arc::new(ScriptedClient::default()));
        assert_eq!(relay.models_available(), vec![PRIMARY, FALLBACKS[0], FALLBACKS[1]]);
    }

    #[test]
    fn from_args_promotes_first_fallback_over_blank_primary() {
        let args = Args::try_parse_from([
            "chat-relay",
            "--primary-model",
            "",
            "--fallback-models",
            "mixtral-8x7b-32768",
        ]).unwrap();
        let relay = Relay::from_args(&args, Arc::new(ScriptedClient::default()), None);
        assert_eq!(relay.models_available(), vec!["mixtral-8x7b-32768"]);

        let args = Args::try_parse_from([
            "chat-relay",
            "--primary-model",
            " ",
            "--fallback-models",
            " ",
        ]).unwrap();
        let relay = Relay::from_args(&args, Arc::new(ScriptedClient::default()), None);
        assert_eq!(relay.models_available(), vec![DEFAULT_PRIMARY_MODEL]);
    }

    #[tokio::test]
    async fn empty_upstream_content_is_a_primary_success() {
        let router = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<Value>| async move {
                let content = if body["model"] == PRIMARY { "" } else { "from fallback" };
                Json(json!({ "choices": [{ "message": { "content": content } }] }))
            })
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        let client = GroqChatClient::new(
            Some("k".into()),
            Some(format!("http://{}/v1/chat/completions", addr)),
            Duration::from_secs(5),
            CompletionOptions::default()
        ).unwrap();
        let relay = relay_with(Arc::new(client));

        let resp = relay.handle(request("hi")).await;

        assert!(resp.success);
        assert_eq!(resp.model_used, PRIMARY);
        assert_eq!(resp.reply, "");
        assert!(resp.error.is_none());
    }
}

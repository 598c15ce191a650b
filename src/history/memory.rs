use async_trait::async_trait;
use chrono::Utc;
use std::collections::{ HashMap, VecDeque };
use std::error::Error;
use tokio::sync::RwLock;

use crate::history::HistoryStore;
use crate::models::chat::{ ChatMessage, Conversation };

pub const DEFAULT_MAX_MESSAGES: usize = 50;
pub const DEFAULT_MAX_CONVERSATIONS: usize = 1000;

#[derive(Default)]
struct Conversations {
    by_id: HashMap<String, VecDeque<ChatMessage>>,
    // Creation order, oldest first.
    order: VecDeque<String>,
}

/// Process-local history bounded on both axes: each conversation keeps its
/// newest `max_messages`, and the oldest conversation is dropped once more
/// than `max_conversations` exist.
pub struct MemoryHistoryStore {
    max_messages: usize,
    max_conversations: usize,
    conversations: RwLock<Conversations>,
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGES, DEFAULT_MAX_CONVERSATIONS)
    }
}

impl MemoryHistoryStore {
    pub fn new(max_messages: usize, max_conversations: usize) -> Self {
        Self {
            max_messages: max_messages.max(1),
            max_conversations: max_conversations.max(1),
            conversations: RwLock::new(Conversations::default()),
        }
    }

    pub async fn conversation_count(&self) -> usize {
        self.conversations.read().await.by_id.len()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn add_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>> {
        let message = ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now().timestamp(),
        };

        let mut guard = self.conversations.write().await;
        let state = &mut *guard;

        if !state.by_id.contains_key(conversation_id) {
            state.order.push_back(conversation_id.to_string());
            state.by_id.insert(conversation_id.to_string(), VecDeque::new());

            while state.by_id.len() > self.max_conversations {
                match state.order.pop_front() {
                    Some(oldest) => {
                        state.by_id.remove(&oldest);
                    }
                    None => break,
                }
            }
        }

        if let Some(messages) = state.by_id.get_mut(conversation_id) {
            messages.push_back(message);
            while messages.len() > self.max_messages {
                messages.pop_front();
            }
        }
        Ok(())
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
        limit: usize
    ) -> Result<Conversation, Box<dyn Error + Send + Sync>> {
        let guard = self.conversations.read().await;
        let messages = guard.by_id
            .get(conversation_id)
            .map(|all| {
                let start = all.len().saturating_sub(limit);
                all.iter().skip(start).cloned().collect()
            })
            .unwrap_or_default();

        Ok(Conversation {
            id: conversation_id.to_string(),
            messages,
        })
    }
}

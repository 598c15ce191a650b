mod memory;

use async_trait::async_trait;
use log::info;
use std::error::Error;
use std::sync::Arc;
use crate::cli::Args;
use crate::models::chat::Conversation;

pub use memory::MemoryHistoryStore;

/// Advisory record of exchanges passing through the relay. Nothing on the
/// completion path reads it back.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn add_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str
    ) -> Result<(), Box<dyn Error + Send + Sync>>;

    async fn get_conversation(
        &self,
        conversation_id: &str,
        limit: usize
    ) -> Result<Conversation, Box<dyn Error + Send + Sync>>;
}

pub fn create_history_store(
    args: &Args
) -> Result<Option<Arc<dyn HistoryStore>>, Box<dyn Error + Send + Sync>> {
    match args.history_type.to_lowercase().as_str() {
        "none" | "" => Ok(None),
        "memory" => Ok(Some(Arc::new(
            MemoryHistoryStore::new(args.history_limit, args.history_max_conversations)
        ))),
        _ =>
            Err(
                Box::new(
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("Unsupported history store type: {}", args.history_type)
                    )
                )
            ),
    }
}

pub fn initialize_history_store(
    args: &Args
) -> Result<Option<Arc<dyn HistoryStore>>, Box<dyn Error + Send + Sync>> {
    let store = create_history_store(args)?;
    if store.is_some() {
        info!("Chat history will be kept in: {}", args.history_type);
    } else {
        info!("Chat history disabled");
    }
    Ok(store)
}

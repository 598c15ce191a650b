pub mod models;
pub mod server;
pub mod llm;
pub mod cli;
pub mod history;
pub mod relay;

use cli::Args;
use history::initialize_history_store;
use llm::{ chat::new_client as new_chat_client, LlmConfig };
use log::info;
use relay::Relay;
use server::Server;
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("TLS Enabled: {}", args.enable_tls);
    info!("Primary Model: {}", args.primary_model);
    info!("Fallback Models: {:?}", args.fallback_models);
    info!("Upstream Timeout: {}s", args.timeout_secs);
    info!("Temperature: {}", args.temperature);
    info!("Max Tokens: {}", args.max_tokens);
    info!("Context Window: {}", args.context_window);
    info!("History Store Type: {}", args.history_type);
    info!("-------------------------");

    let chat_config = LlmConfig::from_args(&args);
    let chat_client = new_chat_client(&chat_config)?;
    info!(
        "Chat client configured: BaseURL={}",
        chat_client.get_base_url().as_deref().unwrap_or("adapter default")
    );

    let history_store = initialize_history_store(&args)?;
    let relay = Arc::new(Relay::from_args(&args, chat_client, history_store));

    let addr = args.server_addr.clone();
    info!("Starting server on: {}", addr);
    let server = Server::new(addr, relay, args);
    server.run().await?;

    Ok(())
}

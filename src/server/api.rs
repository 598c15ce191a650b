use crate::cli::Args;
use crate::models::chat::{ ChatRequest, ChatResponse, HealthResponse, ServiceInfo };
use crate::relay::{ Relay, RelayError };
use std::collections::BTreeMap;
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    routing::{ get, post },
    Router,
    Json,
    extract::{ State, Path, rejection::JsonRejection },
    response::{ IntoResponse, Response },
    http::StatusCode,
};
use chrono::Utc;
use serde_json::{ json, Map, Value };
use tower_http::cors::{ Any, CorsLayer };
use log::{ info, warn, error };

const SERVICE_NAME: &str = "Chat AI Service";

#[derive(Clone)]
struct AppState {
    relay: Arc<Relay>,
    history_limit: usize,
}

pub fn router(relay: Arc<Relay>, history_limit: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/chat", post(chat_handler))
        .route("/echo", post(echo_handler))
        .route("/conversations/{id}", get(conversation_handler))
        .layer(cors)
        .with_state(AppState { relay, history_limit })
}

pub async fn start_http_server(
    addr: &str,
    relay: Arc<Relay>,
    args: &Args,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = addr.parse::<SocketAddr>()?;
    let app = router(relay, args.history_limit);

    if args.enable_tls {
        let (cert_path, key_path) = match (&args.tls_cert_path, &args.tls_key_path) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                return Err("TLS enabled without cert/key".into());
            }
        };
        info!("TLS enabled. Loading certificate from '{}' and key from '{}'", cert_path, key_path);

        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(
            cert_path,
            key_path
        ).await?;

        info!("HTTPS server listening on: https://{}", addr);
        axum_server::bind_rustls(addr, tls_config)
            .serve(app.into_make_service())
            .await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
            e
        })?;

        info!("HTTP server listening on: http://{}", addr);
        axum::serve(listener, app.into_make_service()).await?;
    }

    Ok(())
}

async fn root_handler() -> Json<ServiceInfo> {
    let endpoints = BTreeMap::from([
        ("POST /chat".to_string(), "Send chat message".to_string()),
        ("GET /health".to_string(), "Health check".to_string()),
        ("POST /echo".to_string(), "Echo the request body".to_string()),
        ("GET /conversations/{id}".to_string(), "Recorded conversation history".to_string()),
        ("GET /".to_string(), "This info".to_string()),
    ]);

    Json(ServiceInfo {
        service: "Chat AI Backend".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        endpoints,
    })
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: SERVICE_NAME.to_string(),
        timestamp: Utc::now().to_rfc3339(),
        models_available: state.relay.models_available(),
    })
}

// Always 200: a body that is not a ChatRequest still gets a ChatResponse.
async fn chat_handler(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Json<ChatResponse> {
    match payload {
        Ok(Json(request)) => Json(state.relay.handle(request).await),
        Err(rejection) => {
            warn!("Rejected chat request body: {}", rejection.body_text());
            Json(Relay::rejected(&RelayError::InvalidRequest(rejection.body_text())))
        }
    }
}

// Only JSON objects are echoed; anything else is rejected with 422.
async fn echo_handler(Json(body): Json<Map<String, Value>>) -> Json<Value> {
    Json(json!({
        "received": body,
        "timestamp": Utc::now().to_rfc3339(),
        "echo": "Test successful",
    }))
}

async fn conversation_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    let store = match state.relay.history_store() {
        Some(store) => store,
        None => return (StatusCode::NOT_FOUND, Json(json!({
            "error": "Conversation history is disabled",
        }))).into_response(),
    };

    match store.get_conversation(&id, state.history_limit).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => {
            error!("Failed to read conversation {}: {}", id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({
                "error": "Failed to read conversation",
            }))).into_response()
        }
    }
}

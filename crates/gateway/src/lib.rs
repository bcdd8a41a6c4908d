//! HTTP gateway for apotheca.
//!
//! Two routes: `GET /health` and `POST /chat/stream`, the latter answering
//! with a Server-Sent-Events stream of the agent loop's client events
//! (`delta`, `tool_status`, `error`, `done`).
//!
//! Authentication is a fronting concern: the gateway trusts the
//! `X-Authenticated-User` header set by the auth layer in front of it and
//! passes the identifier into the tool context. It never sees credentials.
//!
//! Built on Axum; CORS, trace logging, and a request body limit are applied
//! as tower layers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, State},
    http::HeaderMap,
    response::sse::{Event as SseEvent, KeepAlive, Sse},
    response::Json,
    routing::{get, post},
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

use apotheca_agent::{AgentLoop, ClientEvent, Locale};
use apotheca_config::AppConfig;
use apotheca_core::message::{Message, Role};
use apotheca_core::tool::ToolContext;

/// Header carrying the out-of-band authenticated user id.
const USER_HEADER: &str = "x-authenticated-user";

/// Shared application state for the gateway.
pub struct GatewayState {
    pub agent: Arc<AgentLoop>,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState, config: &AppConfig) -> Router {
    let cors = if config.gateway.cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(AllowOrigin::any())
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        let origins: Vec<_> = config
            .gateway
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .layer(DefaultBodyLimit::max(1024 * 1024)) // 1 MB body limit
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Assemble all subsystems from config and serve until shutdown.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let store = apotheca_store::Store::open(&config.database.url).await?;
    apotheca_store::seed::seed_if_empty(&store).await?;

    let provider = Arc::new(apotheca_provider::from_config(&config.provider));
    if !config.has_api_key() {
        warn!("No provider API key configured — requests will fail with a clean error event");
    }

    let tools = Arc::new(apotheca_tools::pharmacy_registry(&store));
    let agent = Arc::new(
        {
            let agent = AgentLoop::new(provider, &config.provider.model, tools)
                .with_temperature(config.provider.temperature);
            match config.provider.max_tokens {
                Some(max) => agent.with_max_tokens(max),
                None => agent,
            }
        },
    );

    let state = Arc::new(GatewayState { agent });
    let app = build_router(state, &config);

    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    info!(addr = %addr, model = %config.provider.model, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChatMessageDto {
    role: Role,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatStreamRequest {
    messages: Vec<ChatMessageDto>,

    /// Optional "en"/"he" hint selecting the system-prompt phrasing.
    #[serde(default, rename = "localeHint")]
    locale_hint: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run one agent request, streaming events to the client as SSE frames.
///
/// The loop runs in its own task; when the client disconnects the SSE
/// stream (and with it the channel receiver) is dropped, which the loop
/// observes on its next send and stops consuming the provider.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<ChatStreamRequest>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let user_id = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let ctx = match user_id {
        Some(id) => ToolContext::authenticated(id),
        None => ToolContext::anonymous(),
    };
    let locale = Locale::from_hint(payload.locale_hint.as_deref());

    // Only user/assistant turns are accepted from the wire — the system
    // prompt is owned by policy, and tool messages only ever originate here.
    let messages: Vec<Message> = payload
        .messages
        .into_iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .map(|m| match m.role {
            Role::Assistant => Message::assistant(m.content),
            _ => Message::user(m.content),
        })
        .collect();

    info!(
        messages = messages.len(),
        authenticated = ctx.user_id.is_some(),
        "chat/stream request"
    );

    let (tx, rx) = mpsc::channel::<ClientEvent>(64);
    let agent = state.agent.clone();
    tokio::spawn(async move {
        agent.run(messages, locale, ctx, tx).await;
    });

    let stream = ReceiverStream::new(rx).map(|event| -> Result<SseEvent, Infallible> {
        let frame = SseEvent::default().event(event.event_type());
        Ok(frame
            .json_data(&event)
            .unwrap_or_else(|_| SseEvent::default().event("error").data("{}")))
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

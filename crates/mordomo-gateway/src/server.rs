//! Gateway server: Axum HTTP routes plus a WebSocket control channel

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{ConnectInfo, Path, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use futures_util::{SinkExt, StreamExt};
use mordomo_core::{AgentResult, Enhancer, Orchestrator, enhance_or_fallback};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::ApiError;
use crate::events::EventBus;
use crate::protocol::{
    ERR_INTERNAL, ERR_INVALID_METHOD, ERR_INVALID_PARAMS, GatewayRequest, GatewayResponse, methods,
};
use crate::session::{DEFAULT_SESSION, SessionManager};

const SERVICE_NAME: &str = "Mordomo Gateway";

/// Shared by every HTTP handler and WebSocket connection
#[derive(Clone)]
pub struct GatewayState {
    pub orchestrator: Arc<Orchestrator>,
    /// Rewrites agent messages into natural language when configured
    pub enhancer: Option<Arc<dyn Enhancer>>,
    pub sessions: Arc<SessionManager>,
    pub events: EventBus,
    pub start_time: Instant,
}

impl GatewayState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            enhancer: None,
            sessions: Arc::new(SessionManager::new()),
            events: EventBus::new(256),
            start_time: Instant::now(),
        }
    }

    pub fn with_enhancer(mut self, enhancer: Arc<dyn Enhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    /// Cap the number of sessions kept in memory
    pub fn with_session_limit(mut self, max_sessions: usize) -> Self {
        self.sessions = Arc::new(SessionManager::with_capacity(max_sessions));
        self
    }
}

pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    pub fn new(bind: SocketAddr, state: GatewayState) -> Self {
        Self { state, bind }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(root_handler))
            .route("/health", get(health_handler))
            .route("/chat", post(chat_handler))
            .route("/mcp", post(mcp_handler))
            .route("/agents", get(agents_handler))
            .route("/agents/{agent_id}/query", post(agent_query_handler))
            .route("/context", get(context_handler))
            .route("/context/clear", post(context_clear_handler))
            .route("/ws", get(ws_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves, letting in-flight requests finish
    pub async fn run_until<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let listener = tokio::net::TcpListener::bind(self.bind).await?;
        info!("Gateway listening on {}", self.bind);

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("Gateway stopped");
        Ok(())
    }
}

// ── chat pipeline ──

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default = "default_session")]
    pub session_id: String,
    #[serde(default)]
    pub context: Option<Map<String, Value>>,
}

fn default_session() -> String {
    DEFAULT_SESSION.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub agent: String,
    pub data: Map<String, Value>,
    pub follow_up: Vec<String>,
}

/// Route within the session, then enhance. The session stays locked only while routing.
async fn answer(
    state: &GatewayState,
    session_id: &str,
    message: &str,
    context: Option<Map<String, Value>>,
) -> AgentResult<ChatReply> {
    let session = state.sessions.open(session_id).await;
    let routed = {
        let mut session = session.lock().await;
        state
            .orchestrator
            .route_query(&mut session, message, context)
            .await?
    };
    state.sessions.record_activity(session_id).await;

    info!(
        "Routed to {} (collaborators: {})",
        routed.primary_agent,
        routed.collaborating_agents.len()
    );

    let response = enhance_or_fallback(
        state.enhancer.as_deref(),
        message,
        &routed.response,
        &routed.primary_agent,
    )
    .await;

    Ok(ChatReply {
        response,
        agent: routed.primary_agent,
        data: routed.response.data,
        follow_up: routed.response.follow_up,
    })
}

// ── HTTP handlers ──

async fn root_handler(State(state): State<GatewayState>) -> Json<Value> {
    Json(json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "agents": state.orchestrator.agents_info(),
        "status": "running",
    }))
}

async fn health_handler(State(state): State<GatewayState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "agents": state.orchestrator.registry().len(),
    }))
}

async fn chat_handler(
    State(state): State<GatewayState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = info_span!("chat", request_id = %request_id, session_id = %request.session_id);

    async move {
        info!("Chat request received ({} chars)", request.message.chars().count());

        if request.message.trim().is_empty() {
            return Err(ApiError::validation(
                "message",
                "Message cannot be empty",
                "Message is required and cannot be empty",
            )
            .with_error_id(request_id.clone()));
        }

        let reply = answer(&state, &request.session_id, &request.message, request.context)
            .await
            .map_err(|e| {
                ApiError::processing(
                    "orchestrator",
                    format!("Failed to process chat request: {}", e),
                )
                .with_error_id(request_id.clone())
            })?;

        Ok(Json(reply))
    }
    .instrument(span)
    .await
}

async fn agents_handler(State(state): State<GatewayState>) -> Json<Value> {
    let agents = state.orchestrator.agents_info();
    Json(json!({
        "total": agents.len(),
        "agents": agents,
    }))
}

/// Run one agent directly, bypassing selection
async fn agent_query_handler(
    State(state): State<GatewayState>,
    Path(agent_id): Path<String>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<Value>, ApiError> {
    info!("Direct query for {}", agent_id);
    if state.orchestrator.registry().find(&agent_id).is_none() {
        return Err(ApiError::agent_not_found(&agent_id));
    }

    let session = state.sessions.open(&request.session_id).await;
    let mut session = session.lock().await;
    let response = state.orchestrator.query_agent(
        &mut session,
        &agent_id,
        &request.message,
        request.context,
    )?;

    Ok(Json(json!({
        "agent": agent_id,
        "response": response,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct SessionSelector {
    #[serde(default)]
    session_id: Option<String>,
}

impl SessionSelector {
    fn id(&self) -> &str {
        self.session_id.as_deref().unwrap_or(DEFAULT_SESSION)
    }
}

async fn context_handler(
    State(state): State<GatewayState>,
    Query(selector): Query<SessionSelector>,
) -> Json<Value> {
    let Some(session) = state.sessions.find(selector.id()).await else {
        return Json(json!({
            "conversation_history": [],
            "user_profile": {},
            "session_data": {},
        }));
    };
    let session = session.lock().await;
    Json(serde_json::to_value(&session.shared).unwrap_or_default())
}

/// Body is optional: an empty body clears the default session
async fn context_clear_handler(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let selector: SessionSelector = if body.iter().all(u8::is_ascii_whitespace) {
        SessionSelector::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| {
            ApiError::validation("body", "Invalid JSON in request body", "Invalid JSON format")
        })?
    };

    if let Some(session) = state.sessions.find(selector.id()).await {
        state.orchestrator.clear_context(&mut *session.lock().await);
    }
    info!("Context cleared for session '{}'", selector.id());
    Ok(Json(json!({ "status": "context cleared" })))
}

/// Tool-calling surface: each agent is listed as a tool and calls route normally
async fn mcp_handler(
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body: Value = serde_json::from_slice(&body).map_err(|_| {
        ApiError::validation("body", "Invalid JSON in request body", "Invalid JSON format")
    })?;
    let method = body.get("method").and_then(Value::as_str).unwrap_or_default();
    let params = body.get("params").cloned().unwrap_or_else(|| json!({}));
    debug!("MCP request: {}", method);

    match method {
        "tools/list" => {
            let tools: Vec<Value> = state
                .orchestrator
                .registry()
                .iter()
                .map(|agent| {
                    json!({
                        "name": agent.id(),
                        "description": agent.description(),
                        "parameters": {
                            "query": {"type": "string"},
                            "context": {"type": "object"},
                        },
                    })
                })
                .collect();
            info!("MCP tools listed: {}", tools.len());
            Ok(Json(json!({ "tools": tools })))
        }
        "tools/call" => {
            let tool = params.get("name").and_then(Value::as_str).unwrap_or_default();
            let arguments = params
                .get("arguments")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            let query = arguments
                .get("query")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let session_id = params
                .get("session_id")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_SESSION);
            info!("MCP tool called: {}", tool);

            let session = state.sessions.open(session_id).await;
            let routed = {
                let mut session = session.lock().await;
                state
                    .orchestrator
                    .route_query(&mut session, &query, Some(arguments))
                    .await
                    .map_err(|e| {
                        ApiError::processing("mcp_handler", format!("MCP processing failed: {}", e))
                    })?
            };
            let text = serde_json::to_string(&routed.response)
                .map_err(|e| ApiError::internal(e.to_string()))?;

            Ok(Json(json!({
                "content": [{ "type": "text", "text": text }],
            })))
        }
        other => {
            warn!("Unknown MCP method: {}", other);
            Ok(Json(json!({ "error": "Unknown method" })))
        }
    }
}

// ── WebSocket ──

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    info!("WebSocket connection from {}", addr);
    ws.on_upgrade(move |socket| handle_ws(socket, state, addr))
}

async fn handle_ws(socket: WebSocket, state: GatewayState, addr: SocketAddr) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut event_rx = state.events.subscribe();
    let (reply_tx, mut reply_rx) = mpsc::channel::<GatewayResponse>(32);

    // replies go only to this client, events go to everyone
    let send_task = tokio::spawn(async move {
        loop {
            let outgoing = tokio::select! {
                reply = reply_rx.recv() => match reply {
                    Some(reply) => serde_json::to_string(&reply),
                    None => break,
                },
                event = event_rx.recv() => match event {
                    Ok(event) => serde_json::to_string(&event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client {} lagged by {} events", addr, n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            let text = match outgoing {
                Ok(text) => text,
                Err(e) => {
                    error!("Failed to serialize outgoing frame: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                warn!("WebSocket error from {}: {}", addr, e);
                break;
            }
        };

        let response = handle_request(&state, &text).await;
        if reply_tx.send(response).await.is_err() {
            break;
        }
    }

    send_task.abort();
    info!("Client {} disconnected", addr);
}

pub async fn handle_request(state: &GatewayState, raw: &str) -> GatewayResponse {
    let req: GatewayRequest = match serde_json::from_str(raw) {
        Ok(r) => r,
        Err(e) => {
            return GatewayResponse::err(None, ERR_INVALID_PARAMS, format!("Invalid JSON: {}", e));
        }
    };
    let id = req.id.clone();
    let session_id = req.param_str("session_id").unwrap_or(DEFAULT_SESSION);

    match req.method.as_str() {
        methods::STATUS_GET => GatewayResponse::ok(
            id,
            json!({
                "status": "ok",
                "agents": state.orchestrator.registry().len(),
                "sessions": state.sessions.count().await,
                "connected_clients": state.events.subscriber_count(),
                "uptime_secs": state.start_time.elapsed().as_secs(),
            }),
        ),

        methods::SESSION_LIST => {
            let sessions = state.sessions.list().await;
            GatewayResponse::ok(id, json!({ "sessions": sessions }))
        }

        methods::SESSION_NEW => {
            let name = req.param_str("name").unwrap_or("Nova conversa");
            let info = state.sessions.create(name).await;
            let value = serde_json::to_value(&info).unwrap_or_default();
            state.events.session_created(value.clone());
            GatewayResponse::ok(id, value)
        }

        methods::SESSION_HISTORY => match state.sessions.find(session_id).await {
            Some(session) => {
                let session = session.lock().await;
                GatewayResponse::ok(
                    id,
                    json!({
                        "session_id": session_id,
                        "messages": session.history(),
                    }),
                )
            }
            None => GatewayResponse::err(
                id,
                ERR_INVALID_PARAMS,
                format!("Session '{}' not found", session_id),
            ),
        },

        methods::SESSION_CLEAR => match state.sessions.find(session_id).await {
            Some(session) => {
                state.orchestrator.clear_context(&mut *session.lock().await);
                GatewayResponse::ok(
                    id,
                    json!({ "session_id": session_id, "status": "context cleared" }),
                )
            }
            None => GatewayResponse::err(
                id,
                ERR_INVALID_PARAMS,
                format!("Session '{}' not found", session_id),
            ),
        },

        methods::MESSAGE_SEND => {
            let content = match req.param_str("content") {
                Some(c) if !c.trim().is_empty() => c,
                _ => {
                    return GatewayResponse::err(
                        id,
                        ERR_INVALID_PARAMS,
                        "Missing or empty 'content' parameter",
                    );
                }
            };
            let context = req.params.get("context").and_then(Value::as_object).cloned();

            state.events.typing(session_id, true);
            let result = answer(state, session_id, content, context).await;
            state.events.typing(session_id, false);

            match result {
                Ok(reply) => {
                    state
                        .events
                        .message_received(session_id, &reply.agent, &reply.response);
                    GatewayResponse::ok(
                        id,
                        json!({
                            "session_id": session_id,
                            "agent": reply.agent,
                            "content": reply.response,
                            "data": reply.data,
                            "follow_up": reply.follow_up,
                        }),
                    )
                }
                Err(e) => {
                    error!("message.send failed for session '{}': {}", session_id, e);
                    GatewayResponse::err(id, ERR_INTERNAL, e.to_string())
                }
            }
        }

        other => GatewayResponse::err(id, ERR_INVALID_METHOD, format!("Unknown method: {}", other)),
    }
}

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router, serve,
};
use minijinja::Environment;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::media::MediaStore;
use crate::orchestrator::{ConversationSnapshot, InputOutcome, Orchestrator};
use crate::presentation::ConversationView;

// Envelope for everything pushed to WebSocket clients
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BroadcastMessage {
    pub message_type: String,
    pub payload: serde_json::Value,
}

impl BroadcastMessage {
    fn conversation(snapshot: &ConversationSnapshot) -> Self {
        Self {
            message_type: "Conversation".to_string(),
            payload: serde_json::to_value(ConversationView::from(snapshot))
                .unwrap_or(serde_json::Value::Null),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            message_type: "Error".to_string(),
            payload: serde_json::json!({ "message": message.into() }),
        }
    }
}

/// Intents the browser may send over the socket.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientIntent {
    SendMessage { text: String },
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
}

// Shared application state
#[derive(Clone)]
pub struct AppState {
    templates: Arc<Environment<'static>>,
    orchestrator: Arc<Orchestrator>,
    media: MediaStore,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, media: MediaStore) -> Result<Self> {
        let templates = create_minijinja_env().context("Failed to initialize template engine")?;
        Ok(Self {
            templates: Arc::new(templates),
            orchestrator,
            media,
        })
    }
}

// Templates are compiled into the binary so the server runs from any directory
fn create_minijinja_env() -> Result<Environment<'static>> {
    let mut env = Environment::new();
    env.add_template("index.html", include_str!("../templates/index.html"))?;
    Ok(env)
}

async fn index_handler(State(state): State<AppState>) -> Result<Html<String>, (StatusCode, Html<String>)> {
    state
        .templates
        .get_template("index.html")
        .and_then(|tmpl| {
            let context = minijinja::context! {
                title => "FitStream AI",
                subtitle => "Research & Video Companion",
            };
            tmpl.render(context)
        })
        .map(Html)
        .map_err(|e| {
            error!("Failed to get or render template: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(format!("Internal Server Error: {}", e)),
            )
        })
}

async fn conversation_handler(State(state): State<AppState>) -> Json<ConversationView> {
    Json(ConversationView::from(&state.orchestrator.snapshot()))
}

/// Runs the request to completion and reports how it was handled.
async fn send_message_handler(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Json<InputOutcome> {
    Json(state.orchestrator.handle_user_input(&request.text).await)
}

async fn media_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match state.media.read(&id).await {
        Ok(Some((bytes, mime_type))) => ([(header::CONTENT_TYPE, mime_type)], bytes).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("Failed to read session media {}: {}", id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// WebSocket upgrade handler
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    info!("WebSocket connection upgrade requested");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(socket: &mut WebSocket, msg: &BroadcastMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json_msg) => socket.send(Message::Text(json_msg)).await.is_ok(),
        Err(e) => {
            error!("Failed to serialize broadcast message: {}", e);
            true
        }
    }
}

// Handle individual WebSocket connections
async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("New WebSocket connection established");
    let mut updates = state.orchestrator.subscribe();

    // Initial frame so the client can render without waiting for a change
    let initial = BroadcastMessage::conversation(&state.orchestrator.snapshot());
    if !send_json(&mut socket, &initial).await {
        warn!("Failed to send initial state to new WebSocket client");
        return;
    }

    loop {
        tokio::select! {
            update = updates.recv() => {
                let snapshot = match update {
                    Ok(snapshot) => snapshot,
                    // Only the latest state matters; re-read it after falling behind.
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("WebSocket client lagged by {} updates", skipped);
                        state.orchestrator.snapshot()
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                if !send_json(&mut socket, &BroadcastMessage::conversation(&snapshot)).await {
                    warn!("WebSocket client disconnected or send error. Closing connection.");
                    break;
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientIntent>(&text) {
                            Ok(ClientIntent::SendMessage { text }) => {
                                let orchestrator = state.orchestrator.clone();
                                // Progress reaches this client through the update stream
                                tokio::spawn(async move {
                                    let outcome = orchestrator.handle_user_input(&text).await;
                                    info!(?outcome, "WebSocket message handled");
                                });
                            }
                            Err(e) => {
                                warn!("Unrecognized client message {}: {}", text, e);
                                let reply = BroadcastMessage::error(format!("Unrecognized message: {}", e));
                                if !send_json(&mut socket, &reply).await {
                                    break;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Binary(_))) => {
                        warn!("Received unexpected binary message from client");
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Axum answers pings itself
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested WebSocket close");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        break;
                    }
                    None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                }
            }
        }
    }
    info!("WebSocket connection closed");
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/ws", get(ws_handler))
        .route("/api/conversation", get(conversation_handler))
        .route("/api/messages", axum::routing::post(send_message_handler))
        .route("/media/:id", get(media_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn start_web_server(host: std::net::IpAddr, port: u16, state: AppState) -> Result<()> {
    let app = router(state);

    let addr = SocketAddr::new(host, port);
    info!("Web server listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context(format!("Failed to bind to address {}", addr))?;

    serve(listener, app.into_make_service())
        .await
        .context("Web server failed")?;

    Ok(())
}

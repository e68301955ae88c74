use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Path as AxumPath, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use overseer_core::{Config, Error, Event, Paths, TaskSpec};
use overseer_credentials::CredentialStore;
use overseer_runner::{Drained, RunnerRegistry, TaskRunner};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Shared state passed to HTTP/WS handlers
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct GatewayState {
    registry: Arc<RunnerRegistry>,
    store: CredentialStore,
}

// ---------------------------------------------------------------------------
// HTTP handlers
// ---------------------------------------------------------------------------

async fn handle_health() -> impl IntoResponse {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    let start = START.get_or_init(std::time::Instant::now);

    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": start.elapsed().as_secs(),
    }))
}

/// POST /start-task — launch a supervised conversation, returns the id and
/// the WebSocket path to observe it on.
async fn handle_start_task(
    State(state): State<GatewayState>,
    Json(spec): Json<TaskSpec>,
) -> Response {
    match state.registry.start(spec).await {
        Ok(started) => Json(serde_json::json!({
            "task_id": started.task_id,
            "ws": started.ws_path,
        }))
        .into_response(),
        Err(Error::TaskActive(task_id)) => (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": format!("task {} is already active", task_id) })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": format!("{}", e) })),
        )
            .into_response(),
    }
}

#[derive(Deserialize)]
struct CredentialSetRequest {
    user_id: String,
    provider: String,
    value: String,
}

/// POST /credentials — store a secret; wakes every task parked on it.
async fn handle_credentials_set(
    State(state): State<GatewayState>,
    Json(req): Json<CredentialSetRequest>,
) -> Response {
    match state.store.put(&req.user_id, &req.provider, &req.value).await {
        Ok(()) => {
            info!(user_id = %req.user_id, provider = %req.provider, "Credential stored via API");
            Json(serde_json::json!({ "status": "ok" })).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": format!("{}", e) })),
        )
            .into_response(),
    }
}

/// GET /credentials/:user_id — provider names only, never values.
async fn handle_credentials_list(
    State(state): State<GatewayState>,
    AxumPath(user_id): AxumPath<String>,
) -> impl IntoResponse {
    let providers: Vec<serde_json::Value> = state
        .store
        .list(&user_id)
        .await
        .into_iter()
        .map(|provider| serde_json::json!({ "provider": provider }))
        .collect();

    Json(serde_json::json!({
        "user_id": user_id,
        "providers": providers,
    }))
}

/// GET /tasks — status counts across the registry.
async fn handle_tasks(State(state): State<GatewayState>) -> impl IntoResponse {
    let summary = state.registry.summary().await;
    Json(serde_json::json!({
        "created": summary.created,
        "running": summary.running,
        "paused": summary.paused,
        "finished": summary.finished,
        "error": summary.error,
    }))
}

// ---------------------------------------------------------------------------
// WebSocket observer channel
// ---------------------------------------------------------------------------

async fn handle_ws_upgrade(
    ws: WebSocketUpgrade,
    AxumPath(task_id): AxumPath<String>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, task_id))
}

async fn send_error_frame(socket: &mut WebSocket, msg: &str) {
    let frame = serde_json::json!({ "kind": "error", "payload": { "msg": msg } });
    let _ = socket.send(WsMessage::Text(frame.to_string())).await;
}

async fn send_event(socket: &mut WebSocket, event: &Event) -> Result<(), axum::Error> {
    let frame = serde_json::to_string(event).unwrap_or_default();
    socket.send(WsMessage::Text(frame)).await
}

/// One event object per frame, strictly in emission order. The observer
/// disconnecting does not cancel the task; the stream is released so a
/// reconnect resumes the buffered sequence.
async fn handle_ws_connection(mut socket: WebSocket, state: GatewayState, task_id: String) {
    let Some(runner) = state.registry.get(&task_id).await else {
        send_error_frame(&mut socket, "task not found").await;
        let _ = socket.send(WsMessage::Close(None)).await;
        return;
    };

    let bus = runner.bus();
    let Some(mut feed) = bus.subscribe().await else {
        send_error_frame(&mut socket, "task already has an observer").await;
        let _ = socket.send(WsMessage::Close(None)).await;
        return;
    };
    info!(task_id = %task_id, "Observer connected");

    let mut task_over = false;
    'conn: loop {
        tokio::select! {
            event = feed.next() => {
                let Some(event) = event else {
                    // Task ended and the buffer is drained.
                    task_over = true;
                    break 'conn;
                };
                if send_event(&mut socket, &event).await.is_err() {
                    break 'conn;
                }
                // Drain whatever else is already buffered before waiting
                // again; an empty queue is not an error, just quiet.
                loop {
                    match feed.try_next() {
                        Drained::Event(event) => {
                            if send_event(&mut socket, &event).await.is_err() {
                                break 'conn;
                            }
                        }
                        Drained::Empty => break,
                        Drained::Closed => {
                            task_over = true;
                            break 'conn;
                        }
                    }
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if let Err(msg) = handle_client_command(&state, &runner, &text).await {
                            send_error_frame(&mut socket, &msg).await;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break 'conn,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(task_id = %task_id, error = %e, "WebSocket receive error");
                        break 'conn;
                    }
                }
            }
        }
    }

    if task_over {
        let _ = socket.send(WsMessage::Close(None)).await;
    }
    bus.release(feed).await;
    info!(task_id = %task_id, "Observer disconnected");
}

/// Client → server commands: stop, credential_provided (acknowledgement
/// only; POST /credentials is canonical and wakes waiters), approve_action.
async fn handle_client_command(
    state: &GatewayState,
    runner: &Arc<TaskRunner>,
    text: &str,
) -> Result<(), String> {
    let parsed: serde_json::Value =
        serde_json::from_str(text).map_err(|_| "invalid websocket command".to_string())?;

    match parsed.get("cmd").and_then(|v| v.as_str()) {
        Some("stop") => {
            runner.stop();
            Ok(())
        }
        Some("credential_provided") => {
            let request_id = parsed.get("request_id").and_then(|v| v.as_str()).unwrap_or("");
            debug!(task_id = %runner.task_id, request_id, "Credential acknowledgement received");
            Ok(())
        }
        Some("approve_action") => {
            let action_id = parsed
                .get("action_id")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "approve_action requires action_id".to_string())?;
            let approve = parsed.get("approve").and_then(|v| v.as_bool()).unwrap_or(false);
            state
                .registry
                .approve_action(&runner.task_id, action_id, approve)
                .await
                .map_err(|e| e.to_string())
        }
        _ => Err("invalid websocket command".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run(cli_host: Option<String>, cli_port: Option<u16>) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;

    // Resolve host/port: CLI args override config values
    let host = cli_host.unwrap_or_else(|| config.gateway.host.clone());
    let port = cli_port.unwrap_or(config.gateway.port);

    let store = CredentialStore::new(config.credentials.master_key.as_deref())?;
    if config.credentials.master_key.is_none() {
        debug!("No credential master key configured; using a process-local key");
    }

    let registry = Arc::new(RunnerRegistry::new(config, store.clone()));
    registry.spawn_gc();

    let state = GatewayState { registry, store };

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/start-task", post(handle_start_task))
        .route("/credentials", post(handle_credentials_set))
        .route("/credentials/:user_id", get(handle_credentials_list))
        .route("/tasks", get(handle_tasks))
        .route("/ws/:task_id", get(handle_ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state);

    info!(host = %host, port, "Starting overseer gateway");
    let listener = tokio::net::TcpListener::bind(format!("{}:{}", host, port)).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

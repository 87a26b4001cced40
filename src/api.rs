use crate::broadcaster::ProcessEvent;
use crate::engine::ProcessEngine;
use crate::store::ArticleStore;
use crate::types::{FailedPage, ProcessStats, ProcessorError};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Everything the control surface needs, injected rather than ambient.
#[derive(Clone)]
pub struct AppState {
    pub engine: ProcessEngine,
    pub store: Arc<dyn ArticleStore>,
}

/// Error envelope: control errors are the caller's fault (409), anything
/// else is ours (500).
pub struct ApiError(ProcessorError);

impl From<ProcessorError> for ApiError {
    fn from(e: ProcessorError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_control_error() {
            StatusCode::CONFLICT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/process/stats", get(stats))
        .route("/api/process/progress", get(progress))
        .route("/api/process/start", post(start))
        .route("/api/process/pause", post(pause))
        .route("/api/process/resume", post(resume))
        .route("/api/process/stop", post(stop))
        .route("/api/process/retry", post(retry))
        .route("/api/process/failed", get(failed))
        .route("/api/process/ws", get(ws_endpoint))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn stats(State(state): State<AppState>) -> Result<Json<ProcessStats>, ApiError> {
    Ok(Json(state.store.count_by_status().await?))
}

async fn progress(State(state): State<AppState>) -> Json<Value> {
    let progress = state.engine.progress().await;
    Json(json!({
        "status": state.engine.lifecycle(),
        "total": progress.total,
        "completed": progress.completed,
        "failed": progress.failed,
        "current": progress.current,
        "stage": progress.stage,
        "started_at": progress.started_at,
    }))
}

async fn start(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let selected = state.engine.start().await?;
    Ok(Json(json!({ "status": "started", "selected": selected })))
}

async fn pause(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.engine.pause()?;
    Ok(Json(json!({ "status": "paused" })))
}

async fn resume(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.engine.resume()?;
    Ok(Json(json!({ "status": "running" })))
}

async fn stop(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.engine.stop()?;
    Ok(Json(json!({ "status": "stopping" })))
}

async fn retry(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let reset = state.engine.retry_failed().await?;
    Ok(Json(json!({ "reset": reset })))
}

#[derive(Debug, Deserialize)]
struct FailedQuery {
    page: Option<u32>,
    page_size: Option<u32>,
}

async fn failed(
    State(state): State<AppState>,
    Query(query): Query<FailedQuery>,
) -> Result<Json<FailedPage>, ApiError> {
    let page = state
        .store
        .list_failed(query.page.unwrap_or(1), query.page_size.unwrap_or(20))
        .await?;
    Ok(Json(page))
}

async fn ws_endpoint(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Relay the event stream to one observer. The connection first receives a
/// `connected` snapshot so a client attaching mid-run never renders an
/// empty state; "ping" text frames are answered with "pong".
async fn handle_socket(socket: WebSocket, state: AppState) {
    let broadcaster = state.engine.broadcaster();
    let (observer_id, mut events) = broadcaster.subscribe().await;
    let (mut sink, mut stream) = socket.split();

    let snapshot = state.engine.snapshot().await;
    if send_event(&mut sink, &snapshot).await.is_err() {
        broadcaster.unsubscribe(&observer_id).await;
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            message = next_client_message(&mut stream) => {
                match message {
                    ClientMessage::Ping => {
                        if sink.send(Message::Text("pong".to_string())).await.is_err() {
                            break;
                        }
                    }
                    ClientMessage::Other => {}
                    ClientMessage::Gone => break,
                }
            }
        }
    }

    broadcaster.unsubscribe(&observer_id).await;
    debug!("Progress observer {} disconnected", observer_id);
}

enum ClientMessage {
    Ping,
    Other,
    Gone,
}

async fn next_client_message(stream: &mut SplitStream<WebSocket>) -> ClientMessage {
    match stream.next().await {
        Some(Ok(Message::Text(text))) if text == "ping" => ClientMessage::Ping,
        Some(Ok(Message::Close(_))) | Some(Err(_)) | None => ClientMessage::Gone,
        Some(Ok(_)) => ClientMessage::Other,
    }
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &ProcessEvent,
) -> std::result::Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(text) => sink.send(Message::Text(text)).await,
        Err(e) => {
            warn!("Could not serialize progress event: {}", e);
            Ok(())
        }
    }
}

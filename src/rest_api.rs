//! Local HTTP/WebSocket API exposed to workloads on the node.
//!
//! An `axum::Router` built from a shared `State`, with JSON request/response
//! DTOs at the boundary converting into domain types. Exposes
//! `/v2/config/get`, `/v2/messages/{next,new,query}`, the two websocket
//! upgrades, the auxiliary endpoints, and `/health`. `ProtocolError`
//! (malformed request) maps to 400; `EndpointClosed` to 404; every other
//! [`AgentError`] to 500.

use crate::context::AgentContext;
use crate::domain::{ContentType, Message, MessageTag, WorkloadId};
use crate::error::AgentError;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;
use uuid::Uuid;

type AppState = Arc<AgentContext>;

/// Build the router. `context` is shared across every request and
/// websocket connection.
#[must_use]
pub fn create_app(context: AppState) -> Router {
    Router::new()
        .route("/v2/config/get", post(config_get))
        .route("/v2/messages/next", get(messages_next))
        .route("/v2/messages/new", post(messages_new))
        .route("/v2/messages/query", post(messages_query))
        .route("/v2/control/socket/{id}", get(control_socket))
        .route("/v2/message/socket/{id}", get(message_socket))
        .route("/v2/log", post(log_sink))
        .route("/v2/commandline", post(commandline))
        .route("/v2/restblue", post(restblue))
        .route("/health", get(health))
        .with_state(context)
}

fn error_response(err: AgentError) -> axum::response::Response {
    let status = match err {
        AgentError::ProtocolError(_) => StatusCode::BAD_REQUEST,
        AgentError::EndpointClosed { .. } => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(ErrorBody { error: err.to_string() })).into_response()
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct ConfigGetRequest {
    workload_uuid: Uuid,
}

#[derive(Debug, Serialize)]
struct ConfigGetResponse {
    uuid: Uuid,
    image: String,
    registry_id: u64,
    ip_address: Option<String>,
    updating: bool,
}

async fn config_get(
    State(context): State<AppState>,
    Json(request): Json<ConfigGetRequest>,
) -> axum::response::Response {
    let uuid = WorkloadId::from(request.workload_uuid);
    let Some(workload) = context.registry.find_latest_by_uuid(uuid) else {
        return error_response(AgentError::EndpointClosed { workload_uuid: uuid });
    };
    Json(ConfigGetResponse {
        uuid: request.workload_uuid,
        image: workload.image.to_string(),
        registry_id: workload.registry_id.0,
        ip_address: workload.ip_address,
        updating: workload.updating,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
struct MessagesNextQuery {
    workload_uuid: Uuid,
}

#[derive(Debug, Serialize)]
struct MessageDto {
    id: String,
    publisher: Uuid,
    timestamp_millis: u128,
    tag: String,
    content_type: String,
    content: Vec<u8>,
}

impl From<Message> for MessageDto {
    fn from(message: Message) -> Self {
        Self {
            id: message.id.to_string(),
            publisher: message.publisher.into(),
            timestamp_millis: message
                .timestamp
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
            tag: message.tag.as_ref().clone(),
            content_type: message.content_type.to_string(),
            content: message.content.to_vec(),
        }
    }
}

async fn messages_next(
    State(context): State<AppState>,
    Query(query): Query<MessagesNextQuery>,
) -> axum::response::Response {
    let uuid = WorkloadId::from(query.workload_uuid);
    match context.routing.next_messages(uuid).await {
        Ok(messages) => {
            let dtos: Vec<MessageDto> = messages.into_iter().map(MessageDto::from).collect();
            Json(dtos).into_response()
        }
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct NewMessageRequest {
    workload_uuid: Uuid,
    tag: String,
    content_type: Option<String>,
    content: Vec<u8>,
}

async fn messages_new(
    State(context): State<AppState>,
    Json(request): Json<NewMessageRequest>,
) -> axum::response::Response {
    let content_type = match request.content_type {
        Some(ct) => match ContentType::try_new(ct) {
            Ok(ct) => ct,
            Err(source) => {
                return error_response(AgentError::ProtocolError(source.to_string()));
            }
        },
        None => ContentType::default(),
    };

    let message = Message::new(
        WorkloadId::from(request.workload_uuid),
        MessageTag::new(request.tag),
        content_type,
        bytes::Bytes::from(request.content),
    );

    match context.routing.publish(message).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
struct MessagesQueryRequest {
    workload_uuid: Uuid,
    since_millis: u128,
    until_millis: u128,
}

async fn messages_query(
    State(context): State<AppState>,
    Json(request): Json<MessagesQueryRequest>,
) -> axum::response::Response {
    let uuid = WorkloadId::from(request.workload_uuid);
    match context.routing.peek_messages(uuid).await {
        Ok(messages) => {
            // No persisted message log is kept; this windows whatever is
            // still pending for the workload rather than historical traffic
            // already delivered.
            let dtos: Vec<MessageDto> = messages
                .into_iter()
                .filter(|message| {
                    let millis = message
                        .timestamp
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_millis();
                    millis >= request.since_millis && millis <= request.until_millis
                })
                .map(MessageDto::from)
                .collect();
            Json(dtos).into_response()
        }
        Err(err) => error_response(err),
    }
}

async fn control_socket(
    Path(id): Path<Uuid>,
    State(context): State<AppState>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| run_control_socket(socket, WorkloadId::from(id), context))
}

async fn run_control_socket(mut socket: WebSocket, uuid: WorkloadId, context: AppState) {
    let mut last_state = context.status.workload_state(uuid);
    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, %uuid, "control socket read failed");
                        break;
                    }
                }
            }
            () = tokio::time::sleep(Duration::from_millis(500)) => {
                let current = context.status.workload_state(uuid);
                if current != last_state {
                    last_state = current;
                    let payload = serde_json::json!({ "workload_uuid": uuid.to_string(), "state": current });
                    if socket
                        .send(WsMessage::Text(payload.to_string().into()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
    }
}

async fn message_socket(
    Path(id): Path<Uuid>,
    State(context): State<AppState>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| run_message_socket(socket, WorkloadId::from(id), context))
}

async fn run_message_socket(mut socket: WebSocket, uuid: WorkloadId, context: AppState) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    context.routing.register_realtime_sink(uuid, tx);

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(error = %err, %uuid, "message socket read failed");
                        break;
                    }
                }
            }
            message = rx.recv() => {
                let Some(message) = message else { break };
                let dto = MessageDto::from(message);
                let Ok(rendered) = serde_json::to_string(&dto) else { continue };
                if socket.send(WsMessage::Text(rendered.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    context.routing.unregister_realtime_sink(uuid);
}

async fn log_sink(Json(body): Json<serde_json::Value>) -> StatusCode {
    warn!(payload = %body, "workload-submitted log line");
    StatusCode::ACCEPTED
}

async fn commandline() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

async fn restblue() -> StatusCode {
    StatusCode::NOT_IMPLEMENTED
}

//! # Observer Server
//!
//! HTTP and WebSocket surface for the customer view, staff view and public
//! display.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        ObserverServer (Axum)                            │
//! │                                                                         │
//! │  GET  /queue/current    ──► QueueUpdate                                │
//! │  POST /queue/take       ──► { ticketNumber }                            │
//! │  POST /queue/call-next  ──► 204 | 409 EMPTY_QUEUE                       │
//! │  POST /queue/reset      ──► 204                                         │
//! │  GET  /health           ──► "OK"                                        │
//! │                                                                         │
//! │  GET  /ws ──▶ WebSocket upgrade                                        │
//! │                 │                                                       │
//! │                 ├── 1. snapshot frame                                   │
//! │                 └── 2. every LivePublisher broadcast                    │
//! │                        {"event":"queue_update","data":{...}}            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Writes go through [`QueueStateMachine`]; the resulting change notices
//! reach observers and the display peer through the publisher and bridge.

use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use ts_rs::TS;

use crate::config::ServerSettings;
use crate::error::{ErrorKind, SyncError, SyncResult};
use crate::machine::QueueStateMachine;
use crate::publisher::{LivePublisher, ObserverFrame, QueueUpdate};

/// Maximum inbound WebSocket message size. Observers only send control frames.
const MAX_MESSAGE_SIZE: usize = 64 * 1024;

// =============================================================================
// Payloads
// =============================================================================

/// Response of `POST /queue/take`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TakeResponse {
    pub ticket_number: i64,
}

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

// =============================================================================
// API Error
// =============================================================================

/// A [`SyncError`] on its way to an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self.0.kind() {
            ErrorKind::EmptyQueue => (StatusCode::CONFLICT, "EMPTY_QUEUE"),
            // Conflicts are retried inside the state machine; one that gets
            // here means the store stayed busy
            ErrorKind::Conflict | ErrorKind::TransientIo => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
            }
            ErrorKind::MalformedPeerMessage => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ErrorKind::Config | ErrorKind::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!(error = %self.0, code, "Request failed");
        } else {
            debug!(error = %self.0, code, "Request rejected");
        }
        let body = ErrorBody {
            code: code.to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// =============================================================================
// Server
// =============================================================================

#[derive(Clone)]
struct AppState {
    machine: QueueStateMachine,
    publisher: LivePublisher,
}

/// Builds the observer router.
pub fn router(publisher: LivePublisher) -> Router {
    let state = AppState {
        machine: publisher.machine().clone(),
        publisher,
    };

    Router::new()
        .route("/queue/current", get(current_handler))
        .route("/queue/take", post(take_handler))
        .route("/queue/call-next", post(call_next_handler))
        .route("/queue/reset", post(reset_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// The observer HTTP/WebSocket server.
pub struct ObserverServer {
    config: ServerSettings,
    publisher: LivePublisher,
}

/// Handle for controlling the observer server.
#[derive(Clone)]
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
}

impl ServerHandle {
    /// Address actually bound (useful with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shuts down the server.
    pub async fn shutdown(&self) -> SyncResult<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| SyncError::ChannelError("Server shutdown channel closed".into()))
    }
}

impl ObserverServer {
    pub fn new(config: ServerSettings, publisher: LivePublisher) -> Self {
        ObserverServer { config, publisher }
    }

    /// Binds and starts serving in the background.
    pub async fn start(self) -> SyncResult<ServerHandle> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let app = router(self.publisher);

        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            SyncError::TransportError(format!("Failed to bind to {}: {}", bind_addr, e))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| SyncError::TransportError(e.to_string()))?;

        info!(addr = %local_addr, "Observer server started");

        tokio::spawn(async move {
            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown_rx.recv().await;
                info!("Observer server shutting down");
            })
            .await;

            if let Err(e) = result {
                error!(error = %e, "Observer server failed");
            }
        });

        Ok(ServerHandle {
            local_addr,
            shutdown_tx,
        })
    }
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler() -> impl IntoResponse {
    "OK"
}

async fn current_handler(State(state): State<AppState>) -> ApiResult<Json<QueueUpdate>> {
    let status = state.machine.observe_status().await?;
    Ok(Json(QueueUpdate::from(&status)))
}

async fn take_handler(State(state): State<AppState>) -> ApiResult<Json<TakeResponse>> {
    let ticket_number = state.machine.take_number().await?;
    Ok(Json(TakeResponse { ticket_number }))
}

async fn call_next_handler(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.machine.call_next().await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reset_handler(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.machine.reset_queue().await?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// WebSocket Handler
// =============================================================================

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    info!(addr = %addr, "New observer connection");
    ws.max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_socket(socket, state.publisher, addr))
}

/// Serves one observer: snapshot first, then broadcasts until it leaves.
async fn handle_socket(socket: WebSocket, publisher: LivePublisher, addr: SocketAddr) {
    let (mut sender, mut receiver) = socket.split();

    let (snapshot, mut updates) = match publisher.observe().await {
        Ok(joined) => joined,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Cannot read queue for new observer");
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    if let Err(e) = send_update(&mut sender, snapshot).await {
        warn!(addr = %addr, error = %e, "Failed to send snapshot");
        return;
    }

    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Message>(64);

    // Outgoing message task
    let outgoing_handle = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            if sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    // Broadcast forwarding task
    let forward_tx = outgoing_tx.clone();
    let broadcast_handle = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => match ObserverFrame::QueueUpdate(update).to_json() {
                    Ok(json) => {
                        if forward_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to encode queue update"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(addr = %addr, skipped, "Observer lagged, skipping to newest");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    // Main receive loop
    loop {
        match receiver.next().await {
            Some(Ok(Message::Ping(data))) => {
                let _ = outgoing_tx.send(Message::Pong(data)).await;
            }
            Some(Ok(Message::Close(_))) => {
                info!(addr = %addr, "Observer requested close");
                break;
            }
            Some(Ok(_)) => {
                // Observers are read-only on this channel
            }
            Some(Err(e)) => {
                warn!(addr = %addr, error = %e, "WebSocket error");
                break;
            }
            None => {
                info!(addr = %addr, "Observer disconnected");
                break;
            }
        }
    }

    broadcast_handle.abort();
    outgoing_handle.abort();
}

async fn send_update(
    sender: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    update: QueueUpdate,
) -> SyncResult<()> {
    let json = ObserverFrame::QueueUpdate(update).to_json()?;
    sender
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| SyncError::TransportError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::DEFAULT_OBSERVER_CAPACITY;
    use smartqueue_db::{DbError, MemoryQueueStore};
    use std::sync::Arc;

    fn state() -> (AppState, MemoryQueueStore) {
        let store = MemoryQueueStore::new_seeded();
        let machine = QueueStateMachine::new(Arc::new(store.clone()));
        let publisher = LivePublisher::new(machine.clone(), DEFAULT_OBSERVER_CAPACITY);
        (AppState { machine, publisher }, store)
    }

    #[tokio::test]
    async fn test_take_then_current() {
        let (state, _) = state();

        let Json(taken) = take_handler(State(state.clone())).await.unwrap();
        assert_eq!(taken.ticket_number, 1);

        let Json(current) = current_handler(State(state)).await.unwrap();
        assert_eq!(current.next_numbers, vec![1]);
        assert_eq!(current.total_issued, 1);
    }

    #[tokio::test]
    async fn test_call_next_on_empty_queue_is_409() {
        let (state, _) = state();

        let err = call_next_handler(State(state)).await.unwrap_err();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_call_next_and_reset_are_204() {
        let (state, _) = state();
        take_handler(State(state.clone())).await.unwrap();

        assert_eq!(
            call_next_handler(State(state.clone())).await.unwrap(),
            StatusCode::NO_CONTENT
        );
        assert_eq!(
            reset_handler(State(state)).await.unwrap(),
            StatusCode::NO_CONTENT
        );
    }

    #[tokio::test]
    async fn test_store_outage_is_503() {
        let (state, store) = state();
        store.set_unavailable(true);

        let err = current_handler(State(state)).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(
            ApiError(SyncError::EmptyQueue).status_and_code(),
            (StatusCode::CONFLICT, "EMPTY_QUEUE")
        );
        assert_eq!(
            ApiError(SyncError::Internal("x".into())).status_and_code(),
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
        );
    }

    #[test]
    fn test_exhausted_conflicts_are_not_a_distinct_code() {
        let contended = ApiError(SyncError::Contended { attempts: 32 });
        assert_eq!(
            contended.status_and_code(),
            (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
        );

        let version = ApiError(SyncError::Store(DbError::VersionConflict {
            expected: 3,
            actual: 4,
        }));
        assert_eq!(
            version.status_and_code(),
            (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
        );
    }
}

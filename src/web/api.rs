//! Defines the Axum API routes and handlers.

use crate::board::{Board, BoardEvent};
use crate::print_job::{JobError, ReaderSource};
use crate::printer::PrinterStatus;
use crate::protocol::queue::EnqueueError;
use crate::web::models::{
    CommandAccepted, ErrorResponse, PrintQuery, PrinterStatusResponse, ResultResponse, SendQuery,
};
use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Clone)]
pub struct AppState {
    pub board: Arc<Board>,
    pub gcode_dir: Arc<PathBuf>,
}

/// Creates the Axum router with all the API endpoints.
pub fn create_router(board: Arc<Board>, gcode_dir: impl Into<PathBuf>) -> Router {
    let state = AppState {
        board,
        gcode_dir: Arc::new(gcode_dir.into()),
    };
    Router::new()
        .route("/printer/status", get(get_status))
        .route("/printer/send", get(send_command))
        .route("/printer/print", post(start_print))
        .route("/printer/stop", post(stop_print))
        .route("/ws", get(ws_handler))
        .layer(middleware::map_response(allow_any_origin))
        .with_state(state)
}

async fn allow_any_origin(mut response: Response) -> Response {
    response
        .headers_mut()
        .insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl ToString) -> Self {
        Self {
            status,
            message: message.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<EnqueueError> for ApiError {
    fn from(e: EnqueueError) -> Self {
        let status = match e {
            EnqueueError::Full => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError::new(status, e)
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        let status = match e {
            JobError::AlreadyActive | JobError::NoActiveJob => StatusCode::CONFLICT,
            JobError::Source(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError::new(status, e)
    }
}

/// Handler to get the current status of the printer.
async fn get_status(State(state): State<AppState>) -> Json<PrinterStatusResponse> {
    Json(state.board.snapshot().await.into())
}

/// Handler to queue a single G-code command. Refused while a job is printing.
async fn send_command(
    State(state): State<AppState>,
    Query(query): Query<SendQuery>,
) -> Result<Json<CommandAccepted>, ApiError> {
    if state.board.status().await == PrinterStatus::Printing {
        return Err(ApiError::new(StatusCode::CONFLICT, "printer is busy with a job"));
    }
    let id = state.board.send_command(&query.cmd).await?;
    tracing::debug!("Queued '{}' from HTTP as {}", query.cmd, id);
    Ok(Json(CommandAccepted {
        result: "ok".to_string(),
        cmd: id.get(),
    }))
}

/// Accept a bare file name only; anything that could leave the G-code directory is refused.
fn job_path(dir: &Path, file: &str) -> Option<PathBuf> {
    let plain = !file.is_empty() && !file.contains(['/', '\\']) && file != "." && file != "..";
    plain.then(|| dir.join(file))
}

async fn start_print(
    State(state): State<AppState>,
    Query(query): Query<PrintQuery>,
) -> Result<Json<ResultResponse>, ApiError> {
    let path = job_path(&state.gcode_dir, &query.file)
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "invalid file name"))?;
    let source = ReaderSource::open(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ApiError::new(StatusCode::NOT_FOUND, format!("no such file: {}", query.file))
        } else {
            tracing::error!("Opening {} failed: {}", path.display(), e);
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    })?;
    state.board.start_job(&query.file, Box::new(source)).await?;
    Ok(Json(ResultResponse {
        result: "ok".to_string(),
    }))
}

async fn stop_print(State(state): State<AppState>) -> Result<Json<ResultResponse>, ApiError> {
    state.board.stop_job().await?;
    Ok(Json(ResultResponse {
        result: "ok".to_string(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_events(socket, state.board))
}

/// Push the current snapshot, then every board event, until the client leaves.
async fn stream_events(socket: WebSocket, board: Arc<Board>) {
    let mut events = board.subscribe();
    let (mut sender, mut receiver) = socket.split();

    let first = BoardEvent::StatusChanged(board.snapshot().await);
    if send_event(&mut sender, &first).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => {
                    tracing::debug!("WebSocket client lagged, {} events skipped", missed);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    tracing::debug!("WebSocket client disconnected");
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &BoardEvent) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!("Could not encode event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(json.into())).await
}

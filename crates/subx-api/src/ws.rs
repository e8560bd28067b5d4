//! WebSocket job progress.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use subx_db::JobRow;
use subx_queue::ProgressEvent;

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::handlers::jobs::owned_job;
use crate::metrics;
use crate::state::AppState;

const ENDPOINT: &str = "jobs";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

static ACTIVE_CONNECTIONS: AtomicI64 = AtomicI64::new(0);

type Sender = SplitSink<WebSocket, Message>;

/// Progress event built from the job row.
fn snapshot(job: &JobRow) -> ProgressEvent {
    let event = ProgressEvent::new(&job.id, job.kind, job.status, job.progress);
    match &job.error_message {
        Some(message) => event.with_message(message.clone()),
        None => event,
    }
}

async fn send_event(sender: &mut Sender, event: &ProgressEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!("Could not serialize progress event: {}", e);
            return true;
        }
    };
    if sender.send(Message::Text(json)).await.is_err() {
        debug!(job_id = %event.job_id, "WebSocket client disconnected");
        return false;
    }
    metrics::record_ws_message_sent(ENDPOINT, event.status.as_str());
    true
}

/// `GET /api/ws/jobs/:id`: the token may come as `?access_token=`.
pub async fn job_progress(
    State(state): State<AppState>,
    user: AuthUser,
    Path(job_id): Path<String>,
    ws: WebSocketUpgrade,
) -> ApiResult<Response> {
    let job = owned_job(&state, &job_id, &user.id).await?;
    metrics::record_ws_connection(ENDPOINT);
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, job)))
}

async fn handle_socket(socket: WebSocket, state: AppState, job: JobRow) {
    let active = ACTIVE_CONNECTIONS.fetch_add(1, Ordering::Relaxed) + 1;
    metrics::set_ws_active_connections(active);
    info!(job_id = %job.id, user_id = %job.user_id, "WebSocket opened");

    forward_progress(socket, &state, &job).await;

    let active = ACTIVE_CONNECTIONS.fetch_sub(1, Ordering::Relaxed) - 1;
    metrics::set_ws_active_connections(active);
    info!(job_id = %job.id, "WebSocket closed");
}

async fn forward_progress(socket: WebSocket, state: &AppState, job: &JobRow) {
    let (mut sender, mut receiver) = socket.split();

    if job.status.is_terminal() {
        send_event(&mut sender, &snapshot(job)).await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    let Some(progress) = state.progress.as_ref() else {
        send_event(&mut sender, &snapshot(job)).await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    };

    let mut events = match progress.subscribe(&job.id).await {
        Ok(events) => events,
        Err(e) => {
            warn!(job_id = %job.id, "Could not subscribe to progress: {}", e);
            send_event(&mut sender, &snapshot(job)).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    // Current state first, so a client that connects late is not left blank
    if !send_event(&mut sender, &snapshot(job)).await {
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;
    let mut finished = false;

    loop {
        tokio::select! {
            event = events.next() => {
                let Some(event) = event else { break };
                if !send_event(&mut sender, &event).await {
                    return;
                }
                if event.is_final() {
                    finished = true;
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                    Some(Ok(_)) => {}
                }
            }
            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    return;
                }
            }
        }
    }

    // The stream ended without a terminal event; report whatever the row says
    if !finished {
        match state.store.get_job_for_user(&job.id, &job.user_id).await {
            Ok(Some(latest)) => {
                send_event(&mut sender, &snapshot(&latest)).await;
            }
            Ok(None) => {}
            Err(e) => warn!(job_id = %job.id, "Could not reload job: {}", e),
        }
    }
    let _ = sender.send(Message::Close(None)).await;
}

//! Live assignment event stream over WebSocket.
//!
//! The stream is read-only: connect, receive an `event_sync` snapshot of
//! the assignment's audit log, then an `event` frame for every new event
//! on that assignment. Clients that fall behind the broadcast are
//! re-synced with a fresh snapshot.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::Response;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::OnboardingError;
use crate::onboarding::model::Event;
use crate::store::Store;

use super::routes::{actor, ApiError, AppState};

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsFrame {
    EventSync { events: Vec<Event> },
    Event { event: Event },
}

/// `GET /ws/assignments/{id}` — upgrade to the live event stream.
pub(crate) async fn assignment_stream(
    ws: WebSocketUpgrade,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    actor(&state, &headers).await?;
    if state
        .store
        .get_assignment(id)
        .await
        .map_err(OnboardingError::from)?
        .is_none()
    {
        return Err(OnboardingError::NotFound {
            entity: "assignment",
            id: id.to_string(),
        }
        .into());
    }

    info!(assignment_id = %id, "WebSocket client connecting");
    let store = state.store.clone();
    let rx = state.events_tx.subscribe();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, store, rx, id)))
}

async fn handle_socket(
    mut socket: WebSocket,
    store: Arc<dyn Store>,
    mut rx: broadcast::Receiver<Event>,
    assignment_id: Uuid,
) {
    if !send_sync(&mut socket, store.as_ref(), assignment_id).await {
        return;
    }

    loop {
        tokio::select! {
            // Forward this assignment's events to the client
            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        if event.assignment_id != assignment_id {
                            continue;
                        }
                        let frame = WsFrame::Event { event };
                        if let Ok(json) = serde_json::to_string(&frame) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                debug!("Client went away mid-send");
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(missed = n, assignment_id = %assignment_id, "WS client lagged, re-syncing");
                        if !send_sync(&mut socket, store.as_ref(), assignment_id).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Event channel closed");
                        break;
                    }
                }
            }

            result = socket.recv() => {
                match result {
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(assignment_id = %assignment_id, "WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        // Read-only stream; clients have nothing to say.
                        debug!(text = %text, "Ignoring WS message from client");
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    info!(assignment_id = %assignment_id, "WebSocket connection closed");
}

/// Send the full event snapshot. Returns false when the client is gone or
/// the snapshot cannot be produced.
async fn send_sync(socket: &mut WebSocket, store: &dyn Store, assignment_id: Uuid) -> bool {
    let events = match store.list_events_for_assignment(assignment_id).await {
        Ok(events) => events,
        Err(e) => {
            warn!(error = %e, assignment_id = %assignment_id, "Failed to load events for sync");
            return false;
        }
    };
    let frame = WsFrame::EventSync { events };
    match serde_json::to_string(&frame) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize event sync");
            false
        }
    }
}

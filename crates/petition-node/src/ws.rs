//! WebSocket feed for the live signature list.
//!
//! Connect to `/api/v1/ws/feed`, optionally with `?session=<token>` to also
//! receive that visitor's notices. The server sends a `snapshot` first, then:
//!
//! - `signature_added` when a signature is appended
//! - `signatures_replaced` when a load replaces the list
//! - `notice` when a notification slot changes (`null` when it clears)
//! - `heartbeat` every 30 seconds
//!
//! A client that falls behind the store's event channel gets a fresh
//! snapshot instead of the missed events.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use petition_core::{now_millis, Notice, StoreEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::api::SignatureView;
use crate::client::ClientSession;
use crate::node::PetitionState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket message types for the live feed
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    /// Full list plus the current notice
    Snapshot {
        signatures: Vec<SignatureView>,
        notice: Option<Notice>,
    },
    /// A signature was appended
    SignatureAdded { signature: SignatureView },
    /// A load replaced the list
    SignaturesReplaced { signatures: Vec<SignatureView> },
    /// A notification slot changed
    Notice { notice: Option<Notice> },
    /// Heartbeat to keep connection alive
    Heartbeat { timestamp: u64 },
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedParams {
    pub session: Option<String>,
}

/// WebSocket handler for the live feed
pub async fn ws_feed_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<PetitionState>>,
    Query(params): Query<FeedParams>,
) -> impl IntoResponse {
    let client = params
        .session
        .as_deref()
        .and_then(|token| state.sessions.get(token));
    ws.on_upgrade(|socket| handle_feed_socket(socket, state, client))
}

fn current_notice(state: &PetitionState, client: Option<&ClientSession>) -> Option<Notice> {
    client
        .and_then(|c| c.notices.current())
        .or_else(|| state.notices.current())
}

async fn snapshot(state: &PetitionState, client: Option<&ClientSession>) -> FeedEvent {
    FeedEvent::Snapshot {
        signatures: SignatureView::list(state.store.records().await),
        notice: current_notice(state, client),
    }
}

/// Map a store change to the event sent to the client. `None` once the store
/// is gone.
pub async fn store_feed_event(
    state: &PetitionState,
    client: Option<&ClientSession>,
    change: Result<StoreEvent, RecvError>,
) -> Option<FeedEvent> {
    match change {
        Ok(StoreEvent::Appended(record)) => Some(FeedEvent::SignatureAdded {
            signature: SignatureView::at(record, now_millis()),
        }),
        Ok(StoreEvent::Replaced { .. }) => Some(FeedEvent::SignaturesReplaced {
            signatures: SignatureView::list(state.store.records().await),
        }),
        Err(RecvError::Lagged(skipped)) => {
            debug!(skipped, "feed client lagged, resending snapshot");
            Some(snapshot(state, client).await)
        }
        Err(RecvError::Closed) => None,
    }
}

async fn next_notice(rx: &mut Option<broadcast::Receiver<Option<Notice>>>) -> Result<Option<Notice>, RecvError> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Handle a WebSocket connection for feed updates
async fn handle_feed_socket(
    mut socket: WebSocket,
    state: Arc<PetitionState>,
    client: Option<Arc<ClientSession>>,
) {
    info!(session = client.is_some(), "WebSocket client connected to signature feed");

    // Subscribe before the snapshot so nothing between the two is lost.
    let mut store_rx = state.store.subscribe();
    let mut site_rx = state.notices.subscribe();
    let mut client_rx = client.as_ref().map(|c| c.notices.subscribe());

    if let Err(e) = send_event(&mut socket, snapshot(&state, client.as_deref()).await).await {
        warn!("Failed to send initial snapshot: {}", e);
        return;
    }

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await;

    loop {
        let event = tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        debug!("Received from client: {}", text);
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket client disconnected");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = socket.send(Message::Pong(data)).await {
                            warn!("Failed to send pong: {}", e);
                            break;
                        }
                        continue;
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => continue,
                }
            }
            change = store_rx.recv() => {
                match store_feed_event(&state, client.as_deref(), change).await {
                    Some(event) => event,
                    None => break,
                }
            }
            change = site_rx.recv() => match change {
                Ok(notice) => FeedEvent::Notice { notice },
                Err(RecvError::Lagged(_)) => FeedEvent::Notice {
                    notice: current_notice(&state, client.as_deref()),
                },
                Err(RecvError::Closed) => break,
            },
            change = next_notice(&mut client_rx) => match change {
                Ok(notice) => FeedEvent::Notice { notice },
                Err(RecvError::Lagged(_)) => FeedEvent::Notice {
                    notice: current_notice(&state, client.as_deref()),
                },
                Err(RecvError::Closed) => break,
            },
            _ = heartbeat.tick() => FeedEvent::Heartbeat {
                timestamp: now_millis(),
            },
        };

        if let Err(e) = send_event(&mut socket, event).await {
            warn!("Failed to send feed event: {}", e);
            break;
        }
    }
}

/// Send a feed event to the WebSocket client
async fn send_event(socket: &mut WebSocket, event: FeedEvent) -> Result<(), axum::Error> {
    let json = match serde_json::to_string(&event) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize feed event: {}", e);
            return Ok(());
        }
    };
    socket.send(Message::Text(json)).await
}

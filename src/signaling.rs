// src/signaling.rs
//
// WebSocket transport for the /one2many signaling protocol, plus the inbound
// webhook the media engine POSTs discovered candidates to.
//
// Each connection gets a uuid identity and an unbounded outbound channel
// drained by a writer task; the read loop parses frames and dispatches them
// against the registry. The socket closing, failing, or the client sending
// `stop` all funnel into `remove_participant`, which is idempotent.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::candidate::IceCandidate;
use crate::config::Config;
use crate::gateway::HttpMediaGateway;
use crate::protocol::{ClientMessage, OutboundTx, ServerMessage};
use crate::registry::SessionRegistry;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub config: Config,
    pub registry: Arc<SessionRegistry>,
    pub http_gateway: Arc<HttpMediaGateway>,
}

// ---------------------------------------------------------------------------
// WebSocket endpoint
// ---------------------------------------------------------------------------

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4().to_string();
    info!(peer_id = %connection_id, "connection established");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<ServerMessage>();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&message) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "outbound frame serialization failed");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(message) => {
                dispatch(&state.registry, &connection_id, &outbound, message).await;
            }
            Err(e) => {
                debug!(peer_id = %connection_id, error = %e, "unparseable frame");
                let _ = outbound.send(ServerMessage::Error {
                    message: format!("invalid message: {e}"),
                });
            }
        }
    }

    // The disconnect is the only cancellation signal; everything this
    // connection owns is torn down here, exactly once.
    state.registry.remove_participant(&connection_id).await;
    writer.abort();
    info!(peer_id = %connection_id, "connection closed");
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

async fn dispatch(
    registry: &Arc<SessionRegistry>,
    connection_id: &str,
    outbound: &OutboundTx,
    message: ClientMessage,
) {
    let gateway = registry.gateway().clone();

    match message {
        ClientMessage::Presenter { track, sdp_offer } => {
            let room = registry.get_or_create_room(connection_id, outbound.clone());
            let reply = match room.publish(&gateway, track, &sdp_offer).await {
                Ok(answer) => ServerMessage::accepted(track, answer),
                Err(e) => {
                    warn!(room_id = %connection_id, %track, error = %e, "publish rejected");
                    ServerMessage::rejected(track, e.code(), e.to_string())
                }
            };
            let _ = outbound.send(reply);
        }

        ClientMessage::Viewer { room_id, track, sdp_offer } => {
            let joined = registry
                .join_as_viewer(connection_id, &room_id, outbound.clone())
                .await;
            let result = match joined {
                Ok(room) => room.subscribe(&gateway, connection_id, track, &sdp_offer).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(answer) => {
                    let _ = outbound.send(ServerMessage::accepted(track, answer));
                }
                Err(e) => {
                    warn!(room_id = %room_id, peer_id = %connection_id, %track, error = %e, "subscribe rejected");
                    let teardown = matches!(e, crate::error::SessionError::NoPresenterTrack);
                    let _ = outbound.send(ServerMessage::rejected(track, e.code(), e.to_string()));
                    if teardown {
                        // A viewer rejected for a dead track keeps nothing in
                        // the room; a duplicate subscribe keeps what it had.
                        registry.remove_participant(connection_id).await;
                    }
                }
            }
        }

        ClientMessage::PresenterCandidate { room_id: _, track, candidate } => {
            // The presenter's room id is its own connection id; candidates
            // may precede the `presenter` frame, so the room (and its queue)
            // is created on first touch.
            let room = registry.get_or_create_room(connection_id, outbound.clone());
            if let Err(e) = room.presenter_candidate(&gateway, track, candidate).await {
                warn!(room_id = %connection_id, %track, error = %e, "presenter candidate dropped");
            }
        }

        ClientMessage::ViewerCandidate { room_id, track, candidate } => {
            // Also first-touch: an early candidate registers the viewer so
            // it queues against the viewer's own not-yet-negotiated session.
            match registry
                .join_as_viewer(connection_id, &room_id, outbound.clone())
                .await
            {
                Ok(room) => {
                    if let Err(e) = room
                        .viewer_candidate(&gateway, connection_id, track, candidate)
                        .await
                    {
                        warn!(room_id = %room_id, peer_id = %connection_id, %track, error = %e, "viewer candidate dropped");
                    }
                }
                Err(e) => {
                    debug!(room_id = %room_id, peer_id = %connection_id, error = %e, "candidate for unjoinable room dropped");
                }
            }
        }

        ClientMessage::RenameRoom { room_id, name } => {
            if let Some(room) = registry.find_room(&room_id) {
                room.rename(connection_id, &name);
            }
        }

        ClientMessage::ChatMessage { room_id, display_name, text } => {
            if let Some(room) = registry.find_room(&room_id) {
                room.broadcast_chat(connection_id, &display_name, &text);
            }
        }

        ClientMessage::Stop => {
            registry.remove_participant(connection_id).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate webhook
// ---------------------------------------------------------------------------

/// Body the media engine POSTs when it discovers a local candidate for one
/// of our endpoints.
#[derive(Debug, Deserialize)]
pub struct CandidateHook {
    #[serde(rename = "endpointId")]
    pub endpoint_id: String,
    pub candidate: IceCandidate,
}

pub async fn candidate_hook_handler(
    State(state): State<Arc<AppState>>,
    Json(hook): Json<CandidateHook>,
) -> impl IntoResponse {
    state
        .http_gateway
        .deliver_candidate(&hook.endpoint_id, hook.candidate);
    StatusCode::NO_CONTENT
}

// ---------------------------------------------------------------------------
// Health endpoint
// ---------------------------------------------------------------------------

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "rooms_active": state.registry.room_count(),
        "viewers_active": state.registry.viewer_count(),
        "max_viewers_per_room": state.config.max_viewers_per_room,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

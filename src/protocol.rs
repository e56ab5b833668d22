// src/protocol.rs
//
// Wire contract of the /one2many signaling socket.
//
// Every frame is a JSON object discriminated by its `id` field. Inbound
// frames come from browsers (presenter or viewer side); outbound frames are
// pushed through the connection's writer task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::candidate::IceCandidate;
use crate::session::TrackType;

/// Outbound half of one WebSocket connection. Unbounded so that signaling
/// fan-out (counts, chat, stop notifications) never blocks a room operation.
pub type OutboundTx = mpsc::UnboundedSender<ServerMessage>;

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Messages a connected participant may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "id", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Start publishing one track of the sender's own room.
    Presenter {
        #[serde(rename = "type")]
        track: TrackType,
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },

    /// Subscribe to one track of an existing room.
    Viewer {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "type")]
        track: TrackType,
        #[serde(rename = "sdpOffer")]
        sdp_offer: String,
    },

    /// Browser-discovered candidate for the sender's publishing session.
    PresenterCandidate {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "type")]
        track: TrackType,
        candidate: IceCandidate,
    },

    /// Browser-discovered candidate for the sender's subscribing session.
    ViewerCandidate {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "type")]
        track: TrackType,
        candidate: IceCandidate,
    },

    /// Change the room display name. Honored only from the presenter.
    RenameRoom {
        #[serde(rename = "roomId")]
        room_id: String,
        name: String,
    },

    /// Relay a chat line to everyone currently in the room.
    ChatMessage {
        #[serde(rename = "roomId")]
        room_id: String,
        #[serde(rename = "displayName")]
        display_name: String,
        text: String,
    },

    /// Tear down everything the sender owns in its room.
    Stop,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Messages the server pushes to a participant.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "id", rename_all = "camelCase")]
pub enum ServerMessage {
    /// Answer (or rejection) to a `presenter`/`viewer` offer.
    SdpResponse {
        #[serde(rename = "type")]
        track: TrackType,
        response: SdpVerdict,
        #[serde(rename = "sdpAnswer", skip_serializing_if = "Option::is_none")]
        sdp_answer: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Engine-discovered candidate for one of the recipient's sessions.
    IceCandidate {
        #[serde(rename = "type")]
        track: TrackType,
        candidate: IceCandidate,
    },

    /// The stream ended. A `type` scopes it to one track; absent means the
    /// whole room is gone.
    StreamStopped {
        #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
        track: Option<TrackType>,
    },

    /// Current viewer count, pushed on every join and leave.
    ViewersCount { count: usize },

    /// Chat relay.
    ChatMessage {
        #[serde(rename = "displayName")]
        display_name: String,
        text: String,
        #[serde(rename = "sentAt")]
        sent_at: DateTime<Utc>,
    },

    /// The presenter renamed the room.
    RoomRenamed { name: String },

    /// The inbound frame could not be understood.
    Error { message: String },
}

impl ServerMessage {
    pub fn accepted(track: TrackType, sdp_answer: String) -> Self {
        Self::SdpResponse {
            track,
            response: SdpVerdict::Accepted,
            sdp_answer: Some(sdp_answer),
            code: None,
            message: None,
        }
    }

    pub fn rejected(track: TrackType, code: &'static str, message: String) -> Self {
        Self::SdpResponse {
            track,
            response: SdpVerdict::Rejected,
            sdp_answer: None,
            code: Some(code),
            message: Some(message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpVerdict {
    Accepted,
    Rejected,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

// src/error.rs
//
// Session-level error taxonomy. Local precondition failures carry no remote
// effect; gateway failures are wrapped so callers can distinguish "the engine
// refused this negotiation" from "the engine is down".

use crate::gateway::GatewayError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A session for this (room, participant, track type) is already active
    /// or mid-negotiation. Pure local check; nothing was mutated.
    #[error("a session for this track already exists")]
    TrackAlreadyExists,

    /// The viewer asked for a track nobody is currently publishing.
    #[error("no active presenter session for this track")]
    NoPresenterTrack,

    /// The room id is not registered.
    #[error("room '{0}' does not exist")]
    RoomNotFound(String),

    /// The room reached its configured viewer limit.
    #[error("room '{0}' is full")]
    RoomFull(String),

    /// The session was torn down while its negotiation was still in flight.
    /// Everything created by the aborted attempt has been released.
    #[error("session was closed during negotiation")]
    SessionClosed,

    /// The media engine rejected or failed a negotiation step. Resources
    /// created earlier in the same attempt have been released.
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    /// The media engine could not be reached at all.
    #[error("media engine unavailable: {0}")]
    GatewayUnavailable(String),
}

impl SessionError {
    /// Stable code string carried in rejected `sdpResponse` frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::TrackAlreadyExists => "track_already_exists",
            Self::NoPresenterTrack => "no_presenter_track",
            Self::RoomNotFound(_) => "room_not_found",
            Self::RoomFull(_) => "room_full",
            Self::SessionClosed => "session_closed",
            Self::NegotiationFailed(_) => "negotiation_failed",
            Self::GatewayUnavailable(_) => "gateway_unavailable",
        }
    }
}

impl From<GatewayError> for SessionError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Unavailable(msg) => Self::GatewayUnavailable(msg),
            GatewayError::Rejected(msg) | GatewayError::Remote(msg) => {
                Self::NegotiationFailed(msg)
            }
        }
    }
}

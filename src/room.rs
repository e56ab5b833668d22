// src/room.rs
//
// One presenter's broadcast room.
//
// A `StreamRoom` aggregates the presenter's track sessions (one pipeline per
// track type, never shared across types) and the viewers subscribed to them.
// Per-track maps are `DashMap`s so operations on different tracks or
// different viewers never contend on a room-wide lock.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::candidate::IceCandidate;
use crate::error::SessionError;
use crate::gateway::MediaGateway;
use crate::protocol::{OutboundTx, ServerMessage};
use crate::session::{TrackSession, TrackType};

// ---------------------------------------------------------------------------
// Viewer
// ---------------------------------------------------------------------------

/// One subscribed participant. Viewer endpoints live inside the presenter's
/// pipelines; a viewer owns no pipeline of its own.
pub struct Viewer {
    viewer_id: String,
    outbound: OutboundTx,
    tracks: DashMap<TrackType, Arc<TrackSession>>,
}

impl Viewer {
    fn new(viewer_id: &str, outbound: OutboundTx) -> Arc<Self> {
        Arc::new(Self {
            viewer_id: viewer_id.to_string(),
            outbound,
            tracks: DashMap::new(),
        })
    }

    fn send(&self, message: ServerMessage) {
        let _ = self.outbound.send(message);
    }

    async fn release_all(&self, gateway: &dyn MediaGateway) {
        for track in TrackType::ALL {
            if let Some((_, session)) = self.tracks.remove(&track) {
                session.stop(gateway).await;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// StreamRoom
// ---------------------------------------------------------------------------

pub struct StreamRoom {
    room_id: String,
    name: RwLock<String>,
    created_at: DateTime<Utc>,
    max_viewers: usize,
    presenter_outbound: OutboundTx,
    presenter_tracks: DashMap<TrackType, Arc<TrackSession>>,
    viewers: DashMap<String, Arc<Viewer>>,
}

impl StreamRoom {
    pub fn new(room_id: &str, presenter_outbound: OutboundTx, max_viewers: usize) -> Arc<Self> {
        Arc::new(Self {
            room_id: room_id.to_string(),
            name: RwLock::new(room_id.to_string()),
            created_at: Utc::now(),
            max_viewers,
            presenter_outbound,
            presenter_tracks: DashMap::new(),
            viewers: DashMap::new(),
        })
    }

    pub fn name(&self) -> String {
        self.name.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of presenter tracks currently live.
    pub fn active_track_count(&self) -> usize {
        self.presenter_tracks
            .iter()
            .filter(|entry| entry.value().publish_target().is_some())
            .count()
    }

    // ── Presenter side ──────────────────────────────────────────────────

    /// Publish one track. At most one active or in-progress session per
    /// track type; a Released slot is replaced so the presenter can publish
    /// again after a stop.
    pub async fn publish(
        &self,
        gateway: &Arc<dyn MediaGateway>,
        track: TrackType,
        offer: &str,
    ) -> Result<String, SessionError> {
        let session = self.presenter_session(track, true);
        session
            .start_presenter(gateway, offer, &self.presenter_outbound)
            .await
    }

    pub async fn presenter_candidate(
        &self,
        gateway: &Arc<dyn MediaGateway>,
        track: TrackType,
        candidate: IceCandidate,
    ) -> Result<(), SessionError> {
        // No replacement of a Released slot here: a late candidate for a
        // stopped track must be discarded, not queued against a fresh session.
        let session = self.presenter_session(track, false);
        session.receive_candidate(gateway.as_ref(), candidate).await
    }

    /// Fetch or lazily create the presenter session for `track`. Candidates
    /// may arrive before `publish`, so the session (and its queue) must
    /// exist as soon as either touches it.
    fn presenter_session(&self, track: TrackType, replace_released: bool) -> Arc<TrackSession> {
        let mut entry = self
            .presenter_tracks
            .entry(track)
            .or_insert_with(|| TrackSession::new(&self.room_id, &self.room_id, track));
        if replace_released && entry.is_released() {
            *entry = TrackSession::new(&self.room_id, &self.room_id, track);
        }
        entry.clone()
    }

    // ── Viewer side ─────────────────────────────────────────────────────

    /// Register a viewer (idempotent). Fails when the room is at capacity.
    pub fn add_viewer(
        &self,
        viewer_id: &str,
        outbound: OutboundTx,
    ) -> Result<Arc<Viewer>, SessionError> {
        if let Some(existing) = self.viewers.get(viewer_id) {
            return Ok(existing.clone());
        }
        if self.viewers.len() >= self.max_viewers {
            return Err(SessionError::RoomFull(self.room_id.clone()));
        }
        let viewer = Viewer::new(viewer_id, outbound);
        self.viewers.insert(viewer_id.to_string(), viewer.clone());
        info!(room_id = %self.room_id, peer_id = %viewer_id, "viewer joined");
        self.broadcast_viewers_count();
        Ok(viewer)
    }

    /// Subscribe a registered viewer to one presenter track. Requires the
    /// presenter session for that track to be Active; the rejection makes no
    /// remote call and creates no endpoint.
    pub async fn subscribe(
        &self,
        gateway: &Arc<dyn MediaGateway>,
        viewer_id: &str,
        track: TrackType,
        offer: &str,
    ) -> Result<String, SessionError> {
        let viewer = self
            .viewers
            .get(viewer_id)
            .map(|v| v.clone())
            .ok_or_else(|| SessionError::RoomNotFound(self.room_id.clone()))?;

        let presenter = self
            .presenter_tracks
            .get(&track)
            .map(|s| s.clone())
            .ok_or(SessionError::NoPresenterTrack)?;

        let session = Self::viewer_session(&self.room_id, &viewer, track, true);
        session
            .start_viewer(gateway, presenter.as_ref(), offer, &viewer.outbound)
            .await
    }

    pub async fn viewer_candidate(
        &self,
        gateway: &Arc<dyn MediaGateway>,
        viewer_id: &str,
        track: TrackType,
        candidate: IceCandidate,
    ) -> Result<(), SessionError> {
        let viewer = self
            .viewers
            .get(viewer_id)
            .map(|v| v.clone())
            .ok_or_else(|| SessionError::RoomNotFound(self.room_id.clone()))?;
        // Candidates may precede `subscribe`; they queue against the
        // viewer's own not-yet-negotiated session.
        let session = Self::viewer_session(&self.room_id, &viewer, track, false);
        session.receive_candidate(gateway.as_ref(), candidate).await
    }

    fn viewer_session(
        room_id: &str,
        viewer: &Arc<Viewer>,
        track: TrackType,
        replace_released: bool,
    ) -> Arc<TrackSession> {
        let mut entry = viewer
            .tracks
            .entry(track)
            .or_insert_with(|| TrackSession::new(room_id, &viewer.viewer_id, track));
        if replace_released && entry.is_released() {
            *entry = TrackSession::new(room_id, &viewer.viewer_id, track);
        }
        entry.clone()
    }

    /// Release one viewer entirely (sessions, membership, count broadcast).
    pub async fn remove_viewer(&self, gateway: &dyn MediaGateway, viewer_id: &str) -> bool {
        let Some((_, viewer)) = self.viewers.remove(viewer_id) else {
            return false;
        };
        viewer.release_all(gateway).await;
        info!(room_id = %self.room_id, peer_id = %viewer_id, "viewer left");
        self.broadcast_viewers_count();
        true
    }

    // ── Teardown ────────────────────────────────────────────────────────

    /// Stop one presenter track: the publishing session goes away and every
    /// viewer session of that type is force-released, each affected viewer
    /// notified with a track-scoped stop.
    pub async fn stop_track(&self, gateway: &dyn MediaGateway, track: TrackType) {
        if let Some((_, session)) = self.presenter_tracks.remove(&track) {
            session.stop(gateway).await;
            debug!(room_id = %self.room_id, %track, "presenter track stopped");
        }
        let viewers: Vec<Arc<Viewer>> = self.viewers.iter().map(|v| v.clone()).collect();
        for viewer in viewers {
            if let Some((_, session)) = viewer.tracks.remove(&track) {
                session.stop(gateway).await;
                viewer.send(ServerMessage::StreamStopped { track: Some(track) });
            }
        }
    }

    /// Full room teardown. Returns the ids of the viewers that were removed
    /// so the registry can drop their room mappings.
    pub async fn shutdown(&self, gateway: &dyn MediaGateway) -> Vec<String> {
        for track in TrackType::ALL {
            if let Some((_, session)) = self.presenter_tracks.remove(&track) {
                session.stop(gateway).await;
            }
        }

        let mut removed = Vec::new();
        let viewer_ids: Vec<String> = self.viewers.iter().map(|v| v.key().clone()).collect();
        for viewer_id in viewer_ids {
            if let Some((_, viewer)) = self.viewers.remove(&viewer_id) {
                viewer.release_all(gateway).await;
                viewer.send(ServerMessage::StreamStopped { track: None });
                removed.push(viewer_id);
            }
        }
        let uptime_secs = (Utc::now() - self.created_at).num_seconds();
        info!(room_id = %self.room_id, viewers = removed.len(), uptime_secs, "room torn down");
        removed
    }

    // ── Room-scoped fan-out ─────────────────────────────────────────────

    /// Relay a chat line to everyone in the room. Lines from senders that
    /// are not the presenter or a registered viewer are silently dropped.
    pub fn broadcast_chat(&self, sender_id: &str, display_name: &str, text: &str) {
        let registered = sender_id == self.room_id || self.viewers.contains_key(sender_id);
        if !registered {
            warn!(room_id = %self.room_id, peer_id = %sender_id, "chat from unregistered sender dropped");
            return;
        }
        let message = ServerMessage::ChatMessage {
            display_name: display_name.to_string(),
            text: text.to_string(),
            sent_at: Utc::now(),
        };
        self.broadcast(message);
    }

    /// Rename the room. Only honored when requested by the presenter.
    pub fn rename(&self, requester_id: &str, name: &str) -> bool {
        if requester_id != self.room_id {
            warn!(room_id = %self.room_id, peer_id = %requester_id, "rename from non-presenter ignored");
            return false;
        }
        *self.name.write().unwrap_or_else(|e| e.into_inner()) = name.to_string();
        self.broadcast(ServerMessage::RoomRenamed { name: name.to_string() });
        true
    }

    fn broadcast_viewers_count(&self) {
        self.broadcast(ServerMessage::ViewersCount { count: self.viewers.len() });
    }

    fn broadcast(&self, message: ServerMessage) {
        let _ = self.presenter_outbound.send(message.clone());
        for viewer in self.viewers.iter() {
            viewer.send(message.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

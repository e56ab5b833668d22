// src/registry.rs
//
// Process-wide directory of live rooms.
//
// Two maps: room id → room, and viewer id → room id. Both are `DashMap`s so
// rooms operate in parallel; the only cross-room synchronization is the
// per-entry locking DashMap already provides. Removal from a map is the
// single entry point into teardown, which is what makes racing disconnect
// triggers (transport error plus close firing together) release each
// resource exactly once.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::SessionError;
use crate::gateway::MediaGateway;
use crate::protocol::OutboundTx;
use crate::room::StreamRoom;

pub struct SessionRegistry {
    gateway: Arc<dyn MediaGateway>,
    max_viewers_per_room: usize,
    rooms: DashMap<String, Arc<StreamRoom>>,
    viewer_rooms: DashMap<String, String>,
}

impl SessionRegistry {
    pub fn new(gateway: Arc<dyn MediaGateway>, max_viewers_per_room: usize) -> Arc<Self> {
        Arc::new(Self {
            gateway,
            max_viewers_per_room,
            rooms: DashMap::new(),
            viewer_rooms: DashMap::new(),
        })
    }

    pub fn gateway(&self) -> &Arc<dyn MediaGateway> {
        &self.gateway
    }

    /// Room owned by `participant_id`, created empty on first use. No remote
    /// calls happen here; pipelines are created lazily by the first publish.
    pub fn get_or_create_room(
        &self,
        participant_id: &str,
        outbound: OutboundTx,
    ) -> Arc<StreamRoom> {
        let entry = self
            .rooms
            .entry(participant_id.to_string())
            .or_insert_with(|| {
                info!(room_id = %participant_id, "room created");
                StreamRoom::new(participant_id, outbound, self.max_viewers_per_room)
            });
        entry.clone()
    }

    pub fn find_room(&self, room_id: &str) -> Option<Arc<StreamRoom>> {
        self.rooms.get(room_id).map(|r| r.clone())
    }

    /// Register a viewer in an existing room and record the viewer → room
    /// mapping. Idempotent for a viewer already in that room. A viewer
    /// switching rooms leaves nothing behind: its sessions in the previous
    /// room are released before the new mapping takes effect.
    pub async fn join_as_viewer(
        &self,
        viewer_id: &str,
        room_id: &str,
        outbound: OutboundTx,
    ) -> Result<Arc<StreamRoom>, SessionError> {
        let room = self
            .find_room(room_id)
            .ok_or_else(|| SessionError::RoomNotFound(room_id.to_string()))?;
        room.add_viewer(viewer_id, outbound)?;
        let previous = self
            .viewer_rooms
            .insert(viewer_id.to_string(), room_id.to_string());
        if let Some(previous_room_id) = previous.filter(|p| p != room_id) {
            info!(peer_id = %viewer_id, from = %previous_room_id, to = %room_id, "viewer switched rooms");
            if let Some(previous_room) = self.find_room(&previous_room_id) {
                previous_room
                    .remove_viewer(self.gateway.as_ref(), viewer_id)
                    .await;
            }
        }
        Ok(room)
    }

    /// Connection-driven teardown. A presenter takes its whole room down; a
    /// viewer only its own sessions. Safe to call repeatedly.
    pub async fn remove_participant(&self, participant_id: &str) {
        if let Some((_, room)) = self.rooms.remove(participant_id) {
            let removed_viewers = room.shutdown(self.gateway.as_ref()).await;
            for viewer_id in removed_viewers {
                self.viewer_rooms.remove(&viewer_id);
            }
            return;
        }

        if let Some((_, room_id)) = self.viewer_rooms.remove(participant_id) {
            if let Some(room) = self.find_room(&room_id) {
                room.remove_viewer(self.gateway.as_ref(), participant_id).await;
            }
            return;
        }

        debug!(peer_id = %participant_id, "participant already removed");
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn viewer_count(&self) -> usize {
        self.viewer_rooms.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

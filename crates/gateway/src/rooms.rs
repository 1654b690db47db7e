//! Room registry: named multicast groups over session ids.
//!
//! Rooms hold session ids only — never session memory — so the registry
//! cannot create reference cycles with the session store. A broadcast
//! serializes the envelope once, snapshots the membership, and enqueues
//! one individually QoS-tracked DATA frame per member; membership churn
//! during a broadcast is safe because iteration is over the snapshot.

use dashmap::{DashMap, DashSet};
use metrics::counter;
use serde_json::Value;
use tracing::{debug, warn};

use crate::qos::QosEngine;

pub struct RoomRegistry {
    rooms: DashMap<String, DashSet<String>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
        }
    }

    /// Room naming for market data subscriptions.
    pub fn market_room(symbol: &str) -> String {
        format!("market:{symbol}")
    }

    /// The system-wide alerts room.
    pub fn alerts_room() -> &'static str {
        "alerts:system"
    }

    /// Add a session to a room, creating the room on first join.
    pub fn join(&self, room: &str, session_id: &str) {
        self.rooms
            .entry(room.to_string())
            .or_default()
            .insert(session_id.to_string());
        debug!(room, session_id, "joined room");
    }

    /// Remove a session from a room; empty rooms are garbage-collected.
    pub fn leave(&self, room: &str, session_id: &str) {
        if let Some(members) = self.rooms.get(room) {
            members.remove(session_id);
        }
        self.rooms.remove_if(room, |_, members| members.is_empty());
    }

    /// Evict a session from every room it is in. Returns the rooms left.
    pub fn leave_all(&self, session_id: &str) -> Vec<String> {
        let occupied: Vec<String> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().contains(session_id))
            .map(|entry| entry.key().clone())
            .collect();
        for room in &occupied {
            self.leave(room, session_id);
        }
        occupied
    }

    /// Snapshot of a room's membership.
    pub fn members(&self, room: &str) -> Vec<String> {
        self.rooms
            .get(room)
            .map(|members| members.iter().map(|m| m.clone()).collect())
            .unwrap_or_default()
    }

    /// Rooms a session currently belongs to.
    pub fn rooms_of(&self, session_id: &str) -> Vec<String> {
        self.rooms
            .iter()
            .filter(|entry| entry.value().contains(session_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Broadcast a JSON payload to every member as `method` DATA frames.
    ///
    /// The payload is serialized once; each member gets its own frame
    /// with a fresh session-local message id. Returns the member count.
    pub fn broadcast(&self, qos: &QosEngine, room: &str, method: &str, payload: &Value) -> usize {
        let members = self.members(room);
        if members.is_empty() {
            return 0;
        }

        let json = payload.to_string();
        let envelope = match protocol::envelope::encode_envelope_bytes(method, json.as_bytes(), 0)
        {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(room, method, error = %e, "broadcast envelope encode failed");
                return 0;
            }
        };

        for session_id in &members {
            qos.send_data(session_id, method, &envelope);
        }

        counter!("gateway_broadcasts_total").increment(1);
        debug!(room, method, members = members.len(), "broadcast enqueued");
        members.len()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

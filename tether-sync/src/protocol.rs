//! Wire protocol shared by both transports.
//!
//! Payloads are JSON. A [`PartialUpdate`] carries only the fields that
//! changed; absent (or `null`) fields mean "do not touch". A [`Snapshot`]
//! is the pull result: member name → sparse status, the name implied by
//! the key.
//!
//! The persistent channel wraps payloads in a [`Frame`] envelope tagged by
//! `event`:
//!
//! ```text
//! client                                   server
//!   │ {"event":"connection-ack","room":..}   │   join, sent first
//!   │ ─────────────────────────────────────► │
//!   │ {"event":"ping","ack":7}               │
//!   │ ─────────────────────────────────────► │
//!   │ {"event":"ack","ack":7,"data":{..}}    │
//!   │ ◄───────────────────────────────────── │
//!   │ {"event":"broadcast","data":{..}}      │   unsolicited push
//!   │ ◄───────────────────────────────────── │
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// World number meaning "not logged in".
pub const OFFLINE_WORLD: i32 = 0;

/// Activity marker for a member who is simply in session.
pub const IN_SESSION_ACTIVITY: &str = "IN_SESSION";

/// Tile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub x: i32,
    pub y: i32,
    pub plane: i32,
}

impl Location {
    pub const fn new(x: i32, y: i32, plane: i32) -> Self {
        Self { x, y, plane }
    }

    /// Euclidean distance in tiles, ignoring the plane.
    pub fn distance_to(&self, other: &Location) -> f64 {
        let dx = f64::from(self.x - other.x);
        let dy = f64::from(self.y - other.y);
        (dx * dx + dy * dy).sqrt()
    }
}

/// A sparse member update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialUpdate {
    /// Empty for snapshot entries until filled from the map key.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hp: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hp: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prayer: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_prayer: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ghost_mode: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl PartialUpdate {
    /// An update for `name` with no fields set.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_ghost_mode(mut self, ghost_mode: bool) -> Self {
        self.ghost_mode = Some(ghost_mode);
        self
    }

    pub fn with_world(mut self, world: i32) -> Self {
        self.world = Some(world);
        self
    }

    pub fn with_hp(mut self, hp: i32, max_hp: i32) -> Self {
        self.hp = Some(hp);
        self.max_hp = Some(max_hp);
        self
    }

    pub fn with_prayer(mut self, prayer: i32, max_prayer: i32) -> Self {
        self.prayer = Some(prayer);
        self.max_prayer = Some(max_prayer);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    /// True when no field besides the name is present.
    pub fn is_empty(&self) -> bool {
        self.hp.is_none()
            && self.max_hp.is_none()
            && self.prayer.is_none()
            && self.max_prayer.is_none()
            && self.world.is_none()
            && self.custom_status.is_none()
            && self.ghost_mode.is_none()
            && self.location.is_none()
            && self.last_activity.is_none()
            && self.notes.is_none()
    }
}

/// Full server-side view of the group, keyed by member name.
pub type Snapshot = HashMap<String, PartialUpdate>;

/// Decode a pull response into a [`Snapshot`].
///
/// `null` (whole body or individual entries) decodes as "nothing known".
pub fn snapshot_from_value(value: serde_json::Value) -> Result<Snapshot, serde_json::Error> {
    if value.is_null() {
        return Ok(Snapshot::new());
    }
    let raw: HashMap<String, Option<PartialUpdate>> = serde_json::from_value(value)?;
    Ok(raw
        .into_iter()
        .filter_map(|(name, entry)| {
            entry.map(|mut update| {
                update.name = name.clone();
                (name, update)
            })
        })
        .collect())
}

// ───────────────────────────────────────────────────────────────────
// Persistent channel envelope
// ───────────────────────────────────────────────────────────────────

/// One text frame on the persistent channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Frame {
    /// Join handshake announcing the room/namespace.
    ConnectionAck { room: String },
    /// Snapshot request; answered by an [`Frame::Ack`] with the same id.
    Ping { ack: u64 },
    /// Outgoing update (with an ack id) or unsolicited push (without).
    Broadcast {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ack: Option<u64>,
        data: PartialUpdate,
    },
    /// Acknowledgement of a request frame.
    Ack {
        ack: u64,
        #[serde(default)]
        data: serde_json::Value,
    },
}

impl Frame {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_partial_update_omits_absent_fields() {
        let update = PartialUpdate::named("Alice").with_location(Location::new(100, 100, 0));
        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value, json!({"name": "Alice", "location": {"x": 100, "y": 100, "plane": 0}}));
    }

    #[test]
    fn test_partial_update_camel_case_and_nulls() {
        let update: PartialUpdate = serde_json::from_value(json!({
            "name": "Bob",
            "maxHp": 99,
            "ghostMode": true,
            "customStatus": null,
            "lastActivity": "FISHING"
        }))
        .unwrap();
        assert_eq!(update.max_hp, Some(99));
        assert_eq!(update.ghost_mode, Some(true));
        assert_eq!(update.custom_status, None);
        assert_eq!(update.last_activity.as_deref(), Some("FISHING"));
        assert!(update.hp.is_none());
        assert!(!update.is_empty());
        assert!(PartialUpdate::named("Bob").is_empty());
    }

    #[test]
    fn test_snapshot_fills_names_from_keys() {
        let snapshot = snapshot_from_value(json!({
            "Alice": {"hp": 10},
            "Bob": {"location": {"x": 1, "y": 2, "plane": 0}},
            "Carol": null
        }))
        .unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["Alice"].name, "Alice");
        assert_eq!(snapshot["Alice"].hp, Some(10));
        assert_eq!(snapshot["Bob"].location, Some(Location::new(1, 2, 0)));
    }

    #[test]
    fn test_snapshot_null_is_empty() {
        assert!(snapshot_from_value(serde_json::Value::Null).unwrap().is_empty());
        assert!(snapshot_from_value(json!([1, 2])).is_err());
    }

    #[test]
    fn test_frame_event_tags() {
        let join = Frame::ConnectionAck { room: "iron-squad".into() }.encode().unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&join).unwrap(),
            json!({"event": "connection-ack", "room": "iron-squad"})
        );

        let push = Frame::decode(r#"{"event":"broadcast","data":{"name":"Bob","hp":5}}"#).unwrap();
        assert_eq!(
            push,
            Frame::Broadcast { ack: None, data: PartialUpdate { hp: Some(5), ..PartialUpdate::named("Bob") } }
        );

        let ack = Frame::decode(r#"{"event":"ack","ack":3}"#).unwrap();
        assert_eq!(ack, Frame::Ack { ack: 3, data: serde_json::Value::Null });
    }

    #[test]
    fn test_frame_decode_rejects_unknown_event() {
        assert!(Frame::decode(r#"{"event":"teleport"}"#).is_err());
        assert!(Frame::decode("not json").is_err());
    }

    #[test]
    fn test_location_distance() {
        let a = Location::new(0, 0, 0);
        let b = Location::new(3, 4, 1);
        assert!((a.distance_to(&b) - 5.0).abs() < f64::EPSILON);
    }
}

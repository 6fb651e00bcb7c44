//! Types and wire format shared by the sync server and client.
//!
//! Everything that crosses the socket lives here: the 2D [`Transform`] a peer
//! reports every tick, the [`PeerRecord`] the server broadcasts for each
//! session, the JSON [`Registration`] sent once during the handshake, and the
//! binary [`codec`] that lays these out on the wire.

use serde::{Deserialize, Serialize};

pub mod codec;
pub mod error;

pub use error::CodecError;

/// Server-assigned session identifier. Positive, never reused by one server.
pub type SessionId = u32;

/// Fixed ASCII tag a client sends to open the handshake.
pub const HANDSHAKE_TAG: &[u8] = b"RoninEngineTCP:v001";
/// Single byte the server answers with when a handshake step succeeds.
pub const ACK_SUCCESS: u8 = 1;

/// Longest name, in bytes, carried by a wire record.
pub const MAX_NAME_LEN: usize = 200;
/// `id` + `nameLen` prefix of a wire record.
pub const RECORD_HEADER_LEN: usize = 8;
/// `x`, `y`, `angle` as three little-endian `f32`s.
pub const TRANSFORM_LEN: usize = 12;
/// Upper bound of one encoded record.
pub const MAX_RECORD_LEN: usize = RECORD_HEADER_LEN + MAX_NAME_LEN + TRANSFORM_LEN;
/// Success byte followed by a little-endian `u32` id.
pub const REGISTRATION_ACK_LEN: usize = 5;
/// Largest record count a reader accepts in one frame header.
pub const MAX_FRAME_RECORDS: usize = 1024;

pub const DEFAULT_PORT: u16 = 8888;

/// Last known 2D pose of a peer. `angle` is in degrees.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    pub angle: f32,
}

impl Transform {
    pub fn new(x: f32, y: f32, angle: f32) -> Self {
        Self { x, y, angle }
    }

    /// Moves a fraction `t` of the way towards `target`, turning along the
    /// shorter arc.
    pub fn lerp(&self, target: &Transform, t: f32) -> Transform {
        let t = t.clamp(0.0, 1.0);
        Transform {
            x: self.x + (target.x - self.x) * t,
            y: self.y + (target.y - self.y) * t,
            angle: lerp_angle(self.angle, target.angle, t),
        }
    }
}

/// Interpolates between two angles in degrees along the shortest arc.
pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    let mut delta = (to - from) % 360.0;
    if delta > 180.0 {
        delta -= 360.0;
    } else if delta < -180.0 {
        delta += 360.0;
    }
    from + delta * t.clamp(0.0, 1.0)
}

/// One session as it appears in a snapshot frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PeerRecord {
    pub id: SessionId,
    pub name: String,
    pub transform: Transform,
}

impl PeerRecord {
    pub fn new(id: SessionId, name: impl Into<String>, transform: Transform) -> Self {
        Self {
            id,
            name: name.into(),
            transform,
        }
    }
}

/// JSON body a client sends after the handshake tag is acknowledged.
///
/// Missing keys fall back to defaults so a sparse payload still registers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct Registration {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default, rename = "a")]
    pub angle: f32,
}

impl Registration {
    pub fn new(name: impl Into<String>, transform: Transform) -> Self {
        Self {
            name: name.into(),
            x: transform.x,
            y: transform.y,
            angle: transform.angle,
        }
    }

    pub fn transform(&self) -> Transform {
        Transform::new(self.x, self.y, self.angle)
    }
}

use serde::{Deserialize, Serialize};

use crate::scene::actor::ActorId;
use crate::scene::effect::EffectId;
use crate::scene::Timestamp;
use crate::util::vec2::Vec2;

/// Messages from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Client finished loading the scene and is ready for deltas
    EnterScene,
    /// Batched input frames plus the newest delta the client has applied
    Input {
        acknowledge: Timestamp,
        ping: u32,
        frames: Vec<InputFrame>,
    },
    /// Point the camera at another actor (or nothing)
    SetTarget { actor: Option<ActorId> },
}

/// One frame of client input, stamped with the scene time it was sampled for
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InputFrame {
    pub timestamp: Timestamp,
    /// Movement direction (normalized, -1 to 1 on each axis)
    pub thrust: Vec2,
    /// Facing in radians
    pub aim: f32,
    /// Button bitmask
    pub buttons: u32,
}

impl InputFrame {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }
}

/// Full state of an actor as a client sees it
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActorSnapshot {
    pub id: ActorId,
    /// Actor config name, so the client knows what to instantiate
    pub config: String,
    pub translation: Vec2,
    pub rotation: f32,
    pub velocity: Vec2,
    /// Behavior-specific state word (animation state, flags)
    pub state: u32,
    /// Behavior-specific opaque data
    pub payload: Vec<u8>,
}

/// Changed fields of an actor relative to a reference snapshot
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ActorDelta {
    pub id: ActorId,
    pub translation: Option<Vec2>,
    pub rotation: Option<f32>,
    pub velocity: Option<Vec2>,
    pub state: Option<u32>,
    pub payload: Option<Vec<u8>>,
}

/// A fired effect as a client sees it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EffectSnapshot {
    pub id: EffectId,
    pub config: String,
    /// Scene time the effect fired at
    pub timestamp: Timestamp,
    pub expiry: Timestamp,
    pub translation: Vec2,
    pub rotation: f32,
    pub target: Option<ActorId>,
}

/// Per-client, per-tick scene update
///
/// Applying `added`, `updated` and `removed` on top of the client's state at
/// `reference` yields the authoritative view at `timestamp`. Empty arrays are
/// sent as `None`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SceneDelta {
    /// Timestamp of the newest input frame the server has processed
    pub last_input: Timestamp,
    /// Smoothed round-trip estimate in milliseconds
    pub ping: u16,
    /// Timestamp of the client state this delta applies to
    pub reference: Timestamp,
    pub timestamp: Timestamp,
    /// Milliseconds since the previous tick
    pub elapsed: u16,
    pub added: Option<Vec<ActorSnapshot>>,
    pub updated: Option<Vec<ActorDelta>>,
    pub removed: Option<Vec<ActorId>>,
    pub effects: Option<Vec<EffectSnapshot>>,
}

impl SceneDelta {
    /// True when the delta carries no actor or effect changes
    pub fn is_empty(&self) -> bool {
        self.added.is_none() && self.updated.is_none() && self.removed.is_none() && self.effects.is_none()
    }
}

/// Encode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, EncodeError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| EncodeError(e.to_string()))
}

/// Decode a message using bincode
/// Uses legacy config for fixed-size integers
pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, DecodeError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| DecodeError(e.to_string()))
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("Encode error: {0}")]
pub struct EncodeError(String);

#[derive(Debug, Clone, thiserror::Error)]
#[error("Decode error: {0}")]
pub struct DecodeError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_input_message() {
        let msg = ClientMessage::Input {
            acknowledge: 1200,
            ping: 48,
            frames: vec![InputFrame {
                timestamp: 1210,
                thrust: Vec2::new(0.5, -0.3),
                aim: 1.25,
                buttons: 0b101,
            }],
        };
        let encoded = encode(&msg).unwrap();
        let decoded: ClientMessage = decode(&encoded).unwrap();
        match decoded {
            ClientMessage::Input { acknowledge, ping, frames } => {
                assert_eq!(acknowledge, 1200);
                assert_eq!(ping, 48);
                assert_eq!(frames.len(), 1);
                assert_eq!(frames[0].buttons, 0b101);
            }
            _ => panic!("Wrong message type"),
        }
    }

    #[test]
    fn test_scene_delta_keeps_null_arrays() {
        let delta = SceneDelta {
            last_input: 90,
            ping: 35,
            reference: 0,
            timestamp: 100,
            elapsed: 50,
            added: Some(vec![ActorSnapshot {
                id: 7,
                config: "drone".to_string(),
                translation: Vec2::new(3.0, 4.0),
                ..Default::default()
            }]),
            updated: None,
            removed: None,
            effects: None,
        };
        let decoded: SceneDelta = decode(&encode(&delta).unwrap()).unwrap();
        assert_eq!(decoded, delta);
        assert!(decoded.updated.is_none());
        assert!(!decoded.is_empty());
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<SceneDelta, _> = decode(&[1, 2, 3]);
        assert!(result.is_err());
    }
}

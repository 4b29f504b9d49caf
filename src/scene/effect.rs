use serde::{Deserialize, Serialize};

use crate::net::protocol::EffectSnapshot;
use crate::scene::actor::ActorId;
use crate::scene::Timestamp;
use crate::util::rect::Rect;
use crate::util::vec2::Vec2;

pub type EffectId = u32;

/// Which viewers an effect is reported to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Everyone,
    Only(ActorId),
    Except(ActorId),
}

impl Audience {
    pub fn admits(&self, viewer: Option<ActorId>) -> bool {
        match *self {
            Audience::Everyone => true,
            Audience::Only(id) => viewer == Some(id),
            Audience::Except(id) => viewer != Some(id),
        }
    }
}

/// Config-level audience, resolved against the effect's target when fired
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudienceRule {
    #[default]
    Everyone,
    TargetOnly,
    ExceptTarget,
}

impl AudienceRule {
    pub fn resolve(&self, target: Option<ActorId>) -> Audience {
        match (self, target) {
            (AudienceRule::TargetOnly, Some(id)) => Audience::Only(id),
            (AudienceRule::ExceptTarget, Some(id)) => Audience::Except(id),
            _ => Audience::Everyone,
        }
    }
}

/// An immutable fired event
#[derive(Debug, Clone)]
pub struct Effect {
    pub id: EffectId,
    pub config: String,
    pub fired: Timestamp,
    pub expiry: Timestamp,
    pub translation: Vec2,
    pub rotation: f32,
    /// Shape relative to the translation
    pub shape: Rect,
    pub flags: u32,
    pub audience: Audience,
    pub target: Option<ActorId>,
}

impl Effect {
    pub fn world_shape(&self) -> Rect {
        self.shape.transformed(self.translation, self.rotation)
    }

    #[inline]
    pub fn is_expired_at(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.expiry
    }

    pub fn is_visible_to(&self, viewer: Option<ActorId>) -> bool {
        self.audience.admits(viewer)
    }

    pub fn snapshot(&self) -> EffectSnapshot {
        EffectSnapshot {
            id: self.id,
            config: self.config.clone(),
            timestamp: self.fired,
            expiry: self.expiry,
            translation: self.translation,
            rotation: self.rotation,
            target: self.target,
        }
    }
}

//! Actors: the simulation entities owned by the registry
//!
//! An actor is plain state (snapshot, shape, flags, lifetime). Its behavior
//! lives in a separate [`ActorLogic`] object that the registry stores next to
//! it and ticks with an [`ActorContext`]; logic refers to actors by id only.

use crate::net::delta;
use crate::net::protocol::{ActorDelta, ActorSnapshot, InputFrame};
use crate::scene::catalog::ActorConfig;
use crate::scene::registry::Registry;
use crate::scene::{SceneError, Timestamp};
use crate::util::rect::Rect;
use crate::util::vec2::Vec2;

/// Actor identifier, assigned monotonically and never reused
pub type ActorId = u32;

/// Destroyed-timestamp sentinel for actors that are not scheduled for destruction
pub const NOT_DESTROYED: Timestamp = Timestamp::MAX;

#[derive(Debug, Clone)]
pub struct Actor {
    snapshot: ActorSnapshot,
    /// State as of the end of the previous tick (last reported to clients)
    previous: ActorSnapshot,
    spawned: Timestamp,
    destroyed: Timestamp,
    is_static: bool,
    /// Shape relative to the actor's translation
    shape: Rect,
    collision_flags: u32,
}

impl Actor {
    pub fn new(id: ActorId, config: &ActorConfig, translation: Vec2, rotation: f32) -> Self {
        let snapshot = ActorSnapshot {
            id,
            config: config.name.clone(),
            translation,
            rotation,
            velocity: Vec2::ZERO,
            state: 0,
            payload: Vec::new(),
        };
        Self {
            previous: snapshot.clone(),
            snapshot,
            spawned: 0,
            destroyed: NOT_DESTROYED,
            is_static: config.is_static,
            shape: config.shape,
            collision_flags: config.collision_flags,
        }
    }

    #[inline]
    pub fn id(&self) -> ActorId {
        self.snapshot.id
    }

    pub fn config(&self) -> &str {
        &self.snapshot.config
    }

    #[inline]
    pub fn snapshot(&self) -> &ActorSnapshot {
        &self.snapshot
    }

    /// Mutable state; the registry resyncs the spatial index after each tick
    #[inline]
    pub fn snapshot_mut(&mut self) -> &mut ActorSnapshot {
        &mut self.snapshot
    }

    #[inline]
    pub fn translation(&self) -> Vec2 {
        self.snapshot.translation
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.is_static
    }

    #[inline]
    pub fn collision_flags(&self) -> u32 {
        self.collision_flags
    }

    /// Scene time the actor was spawned at
    #[inline]
    pub fn spawned(&self) -> Timestamp {
        self.spawned
    }

    pub(crate) fn set_spawned(&mut self, timestamp: Timestamp) {
        self.spawned = timestamp;
    }

    #[inline]
    pub fn destroyed(&self) -> Timestamp {
        self.destroyed
    }

    /// Schedule destruction; an earlier schedule is kept
    pub fn destroy_at(&mut self, timestamp: Timestamp) {
        self.destroyed = self.destroyed.min(timestamp);
    }

    #[inline]
    pub fn is_alive_at(&self, timestamp: Timestamp) -> bool {
        timestamp < self.destroyed
    }

    /// Shape in world space
    pub fn world_shape(&self) -> Rect {
        self.shape
            .transformed(self.snapshot.translation, self.snapshot.rotation)
    }

    /// Change since the end of the previous tick, if any
    pub fn pending_delta(&self) -> Option<ActorDelta> {
        delta::diff(&self.previous, &self.snapshot)
    }

    /// Mark a delta as reported, so sub-epsilon drift keeps accumulating
    pub(crate) fn commit_delta(&mut self, delta: &ActorDelta) {
        delta.apply(&mut self.previous);
    }
}

/// What a logic object sees while it ticks
pub struct ActorContext<'a> {
    pub id: ActorId,
    pub timestamp: Timestamp,
    /// Milliseconds since the previous tick
    pub elapsed: u64,
    pub registry: &'a mut Registry,
}

impl ActorContext<'_> {
    pub fn actor(&self) -> Option<&Actor> {
        self.registry.actor(self.id)
    }

    pub fn actor_mut(&mut self) -> Option<&mut Actor> {
        self.registry.actor_mut(self.id)
    }

    #[inline]
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed as f32 / 1000.0
    }

    /// Destroy this actor at the current tick
    pub fn destroy(&mut self) {
        let timestamp = self.timestamp;
        if let Some(actor) = self.actor_mut() {
            actor.destroy_at(timestamp);
        }
    }
}

/// Per-type actor behavior
pub trait ActorLogic: Send {
    /// Advance the actor by one tick
    fn tick(&mut self, ctx: &mut ActorContext<'_>) -> Result<(), SceneError>;

    /// Whether the actor should be reported to a client viewing from `viewer`
    fn is_visible_to(&self, _viewer: Option<ActorId>) -> bool {
        true
    }

    /// Pawns accept client input and can be targeted by a client camera
    fn is_pawn(&self) -> bool {
        false
    }

    /// Queue an input frame for the next tick (pawns only)
    fn enqueue_input(&mut self, _frame: InputFrame) {}
}

//! Actor and effect registry
//!
//! Owns every actor (state and logic, stored side by side and keyed by id),
//! the spatial index, and the per-tick bookkeeping the reconciliation step
//! reads: per-actor deltas, the static added/updated/removed sets, and the
//! effects fired this tick.

use std::collections::{BTreeMap, BTreeSet};

use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::net::protocol::{ActorDelta, ActorSnapshot, InputFrame};
use crate::scene::actor::{Actor, ActorContext, ActorId, ActorLogic};
use crate::scene::catalog::Catalog;
use crate::scene::effect::{Effect, EffectId};
use crate::scene::spatial::{SpatialGrid, SpatialIndex};
use crate::scene::{contain, SceneError, Timestamp};
use crate::util::rect::Rect;
use crate::util::vec2::Vec2;

pub struct Registry {
    catalog: Catalog,
    actors: FxHashMap<ActorId, Actor>,
    /// Logic objects, taken out while they tick
    logics: FxHashMap<ActorId, Box<dyn ActorLogic>>,
    spatial: Box<dyn SpatialIndex>,
    next_actor_id: ActorId,
    next_effect_id: EffectId,
    timestamp: Timestamp,
    previous_timestamp: Timestamp,

    /// Every live static actor
    statics: BTreeSet<ActorId>,
    statics_added: BTreeSet<ActorId>,
    statics_updated: BTreeSet<ActorId>,
    /// Statics removed this tick, with their last snapshot
    statics_removed: BTreeMap<ActorId, ActorSnapshot>,

    /// Changes made this tick, computed by `finish_simulation`
    tick_deltas: FxHashMap<ActorId, ActorDelta>,
    effects_fired: Vec<Effect>,
    shut_down: bool,
}

impl Registry {
    pub fn new(catalog: Catalog) -> Self {
        Self::with_spatial_index(catalog, Box::new(SpatialGrid::default()))
    }

    pub fn with_spatial_index(catalog: Catalog, spatial: Box<dyn SpatialIndex>) -> Self {
        Self {
            catalog,
            actors: FxHashMap::default(),
            logics: FxHashMap::default(),
            spatial,
            next_actor_id: 1,
            next_effect_id: 1,
            timestamp: 0,
            previous_timestamp: 0,
            statics: BTreeSet::new(),
            statics_added: BTreeSet::new(),
            statics_updated: BTreeSet::new(),
            statics_removed: BTreeMap::new(),
            tick_deltas: FxHashMap::default(),
            effects_fired: Vec::new(),
            shut_down: false,
        }
    }

    // ========================================================================
    // Spawning and removal
    // ========================================================================

    /// Spawn an actor from a named config.
    ///
    /// A `prebuilt` actor keeps its own id and state; this is how actors are
    /// resurrected when a scene is loaded. Its id must not be live.
    ///
    /// # Returns
    /// The new actor's id, or an error (already logged) if the config is
    /// unknown, the id is taken, or the scene has shut down
    pub fn spawn_actor(
        &mut self,
        timestamp: Timestamp,
        translation: Vec2,
        rotation: f32,
        config: &str,
        prebuilt: Option<Actor>,
    ) -> Result<ActorId, SceneError> {
        let result = self.try_spawn(timestamp, translation, rotation, config, prebuilt);
        if let Err(e) = &result {
            warn!(config, error = %e, "spawn failed");
        }
        result
    }

    fn try_spawn(
        &mut self,
        timestamp: Timestamp,
        translation: Vec2,
        rotation: f32,
        config: &str,
        prebuilt: Option<Actor>,
    ) -> Result<ActorId, SceneError> {
        if self.shut_down {
            return Err(SceneError::ShutDown);
        }
        let resolved = self
            .catalog
            .actor(config)
            .ok_or_else(|| SceneError::UnknownActorConfig(config.to_string()))?;

        let mut actor = match prebuilt {
            Some(actor) => {
                if self.actors.contains_key(&actor.id()) {
                    return Err(SceneError::DuplicateActor(actor.id()));
                }
                self.next_actor_id = self.next_actor_id.max(actor.id() + 1);
                actor
            }
            None => {
                let id = self.next_actor_id;
                self.next_actor_id += 1;
                Actor::new(id, &resolved.config, translation, rotation)
            }
        };
        actor.set_spawned(timestamp);

        let id = actor.id();
        let logic = resolved.create_logic();
        self.spatial.insert(id, actor.world_shape());
        if actor.is_static() {
            self.statics.insert(id);
            self.statics_added.insert(id);
        }
        self.actors.insert(id, actor);
        self.logics.insert(id, logic);

        debug!(id, config, timestamp, "actor spawned");
        Ok(id)
    }

    /// Schedule an actor's destruction; it is removed once the scene reaches
    /// `timestamp`
    pub fn destroy_actor(&mut self, id: ActorId, timestamp: Timestamp) -> Result<(), SceneError> {
        let actor = self
            .actors
            .get_mut(&id)
            .ok_or(SceneError::ActorNotFound(id))?;
        actor.destroy_at(timestamp);
        Ok(())
    }

    /// Remove an actor and its logic immediately
    pub fn remove_actor(&mut self, id: ActorId) -> Result<(), SceneError> {
        let Some(actor) = self.actors.remove(&id) else {
            warn!(id, "remove requested for missing actor");
            return Err(SceneError::ActorNotFound(id));
        };
        self.logics.remove(&id);
        self.spatial.remove(id);
        self.tick_deltas.remove(&id);

        if actor.is_static() {
            self.statics.remove(&id);
            // Added and removed before any client saw it: nothing to report
            if !self.statics_added.remove(&id) {
                self.statics_updated.remove(&id);
                self.statics_removed.insert(id, actor.snapshot().clone());
            }
        }
        debug!(id, "actor removed");
        Ok(())
    }

    /// Teleport an actor, keeping the spatial index current
    pub fn move_actor(&mut self, id: ActorId, translation: Vec2) -> Result<(), SceneError> {
        let actor = self
            .actors
            .get_mut(&id)
            .ok_or(SceneError::ActorNotFound(id))?;
        actor.snapshot_mut().translation = translation;
        self.spatial.update(id, actor.world_shape());
        Ok(())
    }

    // ========================================================================
    // Effects
    // ========================================================================

    /// Fire an effect, optionally attached to a target actor.
    ///
    /// # Arguments
    /// * `timestamp` - Clamped to after the previous tick, so an effect is
    ///   never reported as already expired
    /// * `translation_offset`, `rotation_offset` - Relative to the target's
    ///   placement when there is one, otherwise world values
    pub fn fire_effect(
        &mut self,
        timestamp: Timestamp,
        target: Option<ActorId>,
        translation_offset: Vec2,
        rotation_offset: f32,
        config: &str,
    ) -> Result<EffectId, SceneError> {
        let result = self.try_fire(timestamp, target, translation_offset, rotation_offset, config);
        if let Err(e) = &result {
            warn!(config, error = %e, "effect failed to fire");
        }
        result
    }

    fn try_fire(
        &mut self,
        timestamp: Timestamp,
        target: Option<ActorId>,
        translation_offset: Vec2,
        rotation_offset: f32,
        config: &str,
    ) -> Result<EffectId, SceneError> {
        if self.shut_down {
            return Err(SceneError::ShutDown);
        }
        let effect_config = self
            .catalog
            .effect(config)
            .ok_or_else(|| SceneError::UnknownEffectConfig(config.to_string()))?;

        let (translation, rotation) = match target {
            Some(target_id) => {
                let actor = self
                    .actors
                    .get(&target_id)
                    .ok_or(SceneError::ActorNotFound(target_id))?;
                let snapshot = actor.snapshot();
                (
                    snapshot.translation + translation_offset.rotate(snapshot.rotation),
                    snapshot.rotation + rotation_offset,
                )
            }
            None => (translation_offset, rotation_offset),
        };

        let fired = timestamp.max(self.previous_timestamp + 1);
        let id = self.next_effect_id;
        self.next_effect_id = self.next_effect_id.wrapping_add(1);
        self.effects_fired.push(Effect {
            id,
            config: effect_config.name.clone(),
            fired,
            expiry: fired + effect_config.lifespan_ms,
            translation,
            rotation,
            shape: effect_config.shape,
            flags: effect_config.flags,
            audience: effect_config.audience.resolve(target),
            target,
        });
        debug!(id, config, fired, "effect fired");
        Ok(id)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Ids of non-static actors overlapping `rect` that are visible to
    /// `viewer`, written to `out` in ascending order
    pub fn visible_actors(&self, rect: &Rect, viewer: Option<ActorId>, out: &mut Vec<ActorId>) {
        out.clear();
        self.spatial.overlapping(rect, out);
        out.retain(|id| {
            let Some(actor) = self.actors.get(id) else {
                return false;
            };
            !actor.is_static()
                && self
                    .logics
                    .get(id)
                    .map_or(true, |logic| logic.is_visible_to(viewer))
        });
    }

    /// Live actors at `timestamp` whose shapes overlap `shape` and whose
    /// collision flags share a bit with `mask`
    pub fn intersecting(&self, timestamp: Timestamp, shape: &Rect, mask: u32) -> Vec<ActorId> {
        let mut hits = Vec::new();
        self.spatial.overlapping(shape, &mut hits);
        hits.retain(|id| {
            self.actors.get(id).is_some_and(|actor| {
                actor.is_alive_at(timestamp)
                    && actor.collision_flags() & mask != 0
                    && actor.world_shape().intersects(shape)
            })
        });
        hits
    }

    pub fn collides(&self, timestamp: Timestamp, shape: &Rect, mask: u32) -> bool {
        !self.intersecting(timestamp, shape, mask).is_empty()
    }

    /// Largest translation needed to push `shape` out of any colliding actor
    pub fn penetration(&self, timestamp: Timestamp, shape: &Rect, mask: u32) -> Option<Vec2> {
        self.intersecting(timestamp, shape, mask)
            .into_iter()
            .filter_map(|id| {
                let actor = self.actors.get(&id)?;
                shape.penetration(&actor.world_shape())
            })
            .max_by(|a, b| a.length_sq().total_cmp(&b.length_sq()))
    }

    #[inline]
    pub fn actor(&self, id: ActorId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    #[inline]
    pub fn actor_mut(&mut self, id: ActorId) -> Option<&mut Actor> {
        self.actors.get_mut(&id)
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    /// Whether the actor exists and its logic accepts input
    pub fn is_pawn(&self, id: ActorId) -> bool {
        self.logics.get(&id).is_some_and(|logic| logic.is_pawn())
    }

    /// Hand an input frame to a pawn's logic
    pub fn deliver_input(&mut self, id: ActorId, frame: InputFrame) -> Result<(), SceneError> {
        let logic = self
            .logics
            .get_mut(&id)
            .ok_or(SceneError::ActorNotFound(id))?;
        if !logic.is_pawn() {
            return Err(SceneError::NotAPawn(id));
        }
        logic.enqueue_input(frame);
        Ok(())
    }

    // ========================================================================
    // Tick lifecycle
    // ========================================================================

    /// Advance the tick window. Effects fired between ticks are moved into
    /// the new window so they stay newer than what clients already hold.
    pub fn begin_tick(&mut self, previous_timestamp: Timestamp, timestamp: Timestamp) {
        self.previous_timestamp = previous_timestamp;
        self.timestamp = timestamp;

        let floor = previous_timestamp + 1;
        for effect in &mut self.effects_fired {
            if effect.fired < floor {
                effect.expiry += floor - effect.fired;
                effect.fired = floor;
            }
        }
    }

    /// Tick every live actor's logic in id order, each in isolation.
    ///
    /// Actors spawned during this pass first tick on the next one.
    ///
    /// # Returns
    /// Number of actors whose logic failed or panicked
    pub fn tick_actors(&mut self, elapsed: u64) -> usize {
        let timestamp = self.timestamp;
        let mut ids: Vec<ActorId> = self
            .actors
            .values()
            .filter(|actor| actor.is_alive_at(timestamp))
            .map(Actor::id)
            .collect();
        ids.sort_unstable();

        let mut failures = 0;
        for id in ids {
            // Removed by an earlier actor this pass
            let Some(mut logic) = self.logics.remove(&id) else {
                continue;
            };
            let mut ctx = ActorContext {
                id,
                timestamp,
                elapsed,
                registry: &mut *self,
            };
            if contain(format_args!("actor {}", id), || logic.tick(&mut ctx)).is_err() {
                failures += 1;
            }

            if let Some(actor) = self.actors.get(&id) {
                self.spatial.update(id, actor.world_shape());
                self.logics.insert(id, logic);
            }
        }
        failures
    }

    /// Remove every actor whose destruction time has been reached
    pub fn reap_destroyed(&mut self) -> usize {
        let timestamp = self.timestamp;
        let doomed: Vec<ActorId> = self
            .actors
            .values()
            .filter(|actor| !actor.is_alive_at(timestamp))
            .map(Actor::id)
            .collect();
        for &id in &doomed {
            // Present by construction
            let _ = self.remove_actor(id);
        }
        doomed.len()
    }

    /// Compute this tick's per-actor deltas and static updates.
    ///
    /// Runs once simulation is done and before any client reconciles.
    pub fn finish_simulation(&mut self) {
        self.tick_deltas.clear();
        for (&id, actor) in &self.actors {
            if let Some(delta) = actor.pending_delta() {
                // Covers participants that moved actors without the registry
                self.spatial.update(id, actor.world_shape());
                if actor.is_static() && !self.statics_added.contains(&id) {
                    self.statics_updated.insert(id);
                }
                self.tick_deltas.insert(id, delta);
            }
        }
    }

    /// Commit this tick's deltas and clear the per-tick sets
    pub fn end_tick(&mut self) {
        for (id, delta) in self.tick_deltas.drain() {
            if let Some(actor) = self.actors.get_mut(&id) {
                actor.commit_delta(&delta);
            }
        }
        self.statics_added.clear();
        self.statics_updated.clear();
        self.statics_removed.clear();
        self.effects_fired.clear();
    }

    /// Stop accepting spawns and effects
    pub fn shutdown(&mut self) {
        if !self.shut_down {
            self.shut_down = true;
            info!(actors = self.actors.len(), "registry shut down");
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // ========================================================================
    // Per-tick views for reconciliation
    // ========================================================================

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[inline]
    pub fn previous_timestamp(&self) -> Timestamp {
        self.previous_timestamp
    }

    /// This tick's change to an actor, if it changed
    #[inline]
    pub fn tick_delta(&self, id: ActorId) -> Option<&ActorDelta> {
        self.tick_deltas.get(&id)
    }

    /// Every live static actor, in id order
    pub fn static_actors(&self) -> impl Iterator<Item = &Actor> + '_ {
        self.statics.iter().filter_map(|id| self.actors.get(id))
    }

    pub fn statics_added(&self) -> impl Iterator<Item = &Actor> + '_ {
        self.statics_added.iter().filter_map(|id| self.actors.get(id))
    }

    pub fn statics_updated(&self) -> impl Iterator<Item = &ActorDelta> + '_ {
        self.statics_updated
            .iter()
            .filter_map(|id| self.tick_deltas.get(id))
    }

    pub fn statics_removed(&self) -> impl Iterator<Item = &ActorSnapshot> + '_ {
        self.statics_removed.values()
    }

    /// Effects fired since the last `end_tick`
    pub fn fired_effects(&self) -> &[Effect] {
        &self.effects_fired
    }
}

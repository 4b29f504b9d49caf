//! Actor and effect configs, with logic kinds resolved to factories up front
//!
//! A config names its logic kind by tag. The tag is looked up when the config
//! is added, so spawning never has to resolve behavior by name.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::scene::actor::ActorLogic;
use crate::scene::effect::AudienceRule;
use crate::scene::logic;
use crate::scene::SceneError;
use crate::util::rect::Rect;

/// Builds a fresh logic object for a spawned actor
pub type LogicFactory = fn(&ActorConfig) -> Box<dyn ActorLogic>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    pub name: String,
    /// Logic kind tag, e.g. "prop", "drifter", "pawn"
    pub logic: String,
    #[serde(default)]
    pub is_static: bool,
    pub shape: Rect,
    #[serde(default)]
    pub collision_flags: u32,
    /// Movement speed in units/second for moving logic kinds
    #[serde(default)]
    pub speed: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectConfig {
    pub name: String,
    pub shape: Rect,
    /// Milliseconds between firing and expiry
    pub lifespan_ms: u64,
    #[serde(default)]
    pub flags: u32,
    #[serde(default)]
    pub audience: AudienceRule,
}

/// An actor config whose logic kind has been resolved
#[derive(Clone)]
pub struct ResolvedActorConfig {
    pub config: ActorConfig,
    factory: LogicFactory,
}

impl ResolvedActorConfig {
    pub fn create_logic(&self) -> Box<dyn ActorLogic> {
        (self.factory)(&self.config)
    }
}

#[derive(Default)]
pub struct Catalog {
    factories: HashMap<String, LogicFactory>,
    actors: HashMap<String, ResolvedActorConfig>,
    effects: HashMap<String, EffectConfig>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with the built-in logic kinds registered
    pub fn with_builtin_logic() -> Self {
        let mut catalog = Self::new();
        catalog.register_logic(logic::PROP, logic::Prop::create);
        catalog.register_logic(logic::DRIFTER, logic::Drifter::create);
        catalog.register_logic(logic::PAWN, logic::Pawn::create);
        catalog
    }

    pub fn register_logic(&mut self, kind: &str, factory: LogicFactory) {
        self.factories.insert(kind.to_string(), factory);
    }

    /// Add an actor config, resolving its logic kind now
    pub fn add_actor(&mut self, config: ActorConfig) -> Result<(), SceneError> {
        let factory = *self
            .factories
            .get(&config.logic)
            .ok_or_else(|| SceneError::UnknownLogicKind {
                config: config.name.clone(),
                kind: config.logic.clone(),
            })?;
        self.actors
            .insert(config.name.clone(), ResolvedActorConfig { config, factory });
        Ok(())
    }

    pub fn add_effect(&mut self, config: EffectConfig) {
        self.effects.insert(config.name.clone(), config);
    }

    pub fn actor(&self, name: &str) -> Option<&ResolvedActorConfig> {
        self.actors.get(name)
    }

    pub fn effect(&self, name: &str) -> Option<&EffectConfig> {
        self.effects.get(name)
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }
}

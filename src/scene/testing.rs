//! Shared fixtures for scene and reconciliation tests

use crate::scene::actor::ActorId;
use crate::scene::catalog::{ActorConfig, Catalog, EffectConfig};
use crate::scene::effect::AudienceRule;
use crate::scene::logic;
use crate::scene::registry::Registry;
use crate::scene::Timestamp;
use crate::util::rect::Rect;
use crate::util::vec2::Vec2;

/// "crate": static prop, "drone": drifter, "pilot": pawn, "spark": effect
/// hidden from its target
pub fn catalog() -> Catalog {
    let mut catalog = Catalog::with_builtin_logic();
    let actors = [
        ("crate", logic::PROP, true, 2.0, 0b01, 0.0),
        ("drone", logic::DRIFTER, false, 1.0, 0b10, 10.0),
        ("pilot", logic::PAWN, false, 1.0, 0b10, 20.0),
    ];
    for (name, kind, is_static, size, collision_flags, speed) in actors {
        catalog
            .add_actor(ActorConfig {
                name: name.to_string(),
                logic: kind.to_string(),
                is_static,
                shape: Rect::centered(size, size),
                collision_flags,
                speed,
            })
            .unwrap();
    }
    catalog.add_effect(EffectConfig {
        name: "spark".to_string(),
        shape: Rect::centered(1.0, 1.0),
        lifespan_ms: 200,
        flags: 0,
        audience: AudienceRule::ExceptTarget,
    });
    catalog
}

pub fn registry() -> Registry {
    Registry::new(catalog())
}

pub fn spawn(registry: &mut Registry, config: &str, x: f32, y: f32) -> ActorId {
    registry
        .spawn_actor(registry.timestamp(), Vec2::new(x, y), 0.0, config, None)
        .unwrap()
}

/// Run the simulation half of a tick; reconciliation and `end_tick` are
/// left to the caller
pub fn simulate(registry: &mut Registry, previous: Timestamp, timestamp: Timestamp) {
    registry.begin_tick(previous, timestamp);
    registry.tick_actors(timestamp - previous);
    registry.reap_destroyed();
    registry.finish_simulation();
}

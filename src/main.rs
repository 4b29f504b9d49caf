mod config;
mod metrics;
mod net;
mod scene;
mod util;

use std::sync::Arc;
use std::time::Instant;

use rand::Rng;
use tokio::sync::Notify;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::config::SceneConfig;
use crate::metrics::SceneMetrics;
use crate::net::protocol::ClientMessage;
use crate::net::transport::{outbound_channel, ChannelTransport};
use crate::scene::catalog::{ActorConfig, Catalog, EffectConfig};
use crate::scene::driver::{Scene, TickParticipant};
use crate::scene::effect::AudienceRule;
use crate::scene::logic;
use crate::scene::registry::Registry;
use crate::scene::runtime::run_scene;
use crate::scene::SceneError;
use crate::util::rect::Rect;
use crate::util::vec2::Vec2;

/// Half-extent of the area the demo populates
const ARENA: f32 = 600.0;
const DRONES: usize = 40;
const CRATES: usize = 12;

fn demo_catalog() -> anyhow::Result<Catalog> {
    let mut catalog = Catalog::with_builtin_logic();
    catalog.add_actor(ActorConfig {
        name: "crate".to_string(),
        logic: logic::PROP.to_string(),
        is_static: true,
        shape: Rect::centered(24.0, 24.0),
        collision_flags: 0b01,
        speed: 0.0,
    })?;
    catalog.add_actor(ActorConfig {
        name: "drone".to_string(),
        logic: logic::DRIFTER.to_string(),
        is_static: false,
        shape: Rect::centered(12.0, 12.0),
        collision_flags: 0b10,
        speed: 40.0,
    })?;
    catalog.add_actor(ActorConfig {
        name: "pilot".to_string(),
        logic: logic::PAWN.to_string(),
        is_static: false,
        shape: Rect::centered(16.0, 16.0),
        collision_flags: 0b10,
        speed: 120.0,
    })?;
    catalog.add_effect(EffectConfig {
        name: "spark".to_string(),
        shape: Rect::centered(8.0, 8.0),
        lifespan_ms: 250,
        flags: 0,
        audience: AudienceRule::Everyone,
    });
    Ok(catalog)
}

fn random_point(rng: &mut impl Rng) -> Vec2 {
    Vec2::new(rng.gen_range(-ARENA..ARENA), rng.gen_range(-ARENA..ARENA))
}

/// Fires a spark on a random live actor every `every_ms`
struct SparkEmitter {
    every_ms: u64,
    next: u64,
}

impl TickParticipant for SparkEmitter {
    fn tick(&mut self, registry: &mut Registry) -> Result<(), SceneError> {
        let now = registry.timestamp();
        if now < self.next {
            return Ok(());
        }
        self.next = now + self.every_ms;

        let mut rng = rand::thread_rng();
        let mut candidates = Vec::new();
        registry.visible_actors(&Rect::centered(ARENA * 2.0, ARENA * 2.0), None, &mut candidates);
        if candidates.is_empty() {
            return Ok(());
        }
        let target = candidates[rng.gen_range(0..candidates.len())];
        registry.fire_effect(now, Some(target), Vec2::ZERO, 0.0, "spark")?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    info!("Scene Sync Server v{}", env!("CARGO_PKG_VERSION"));

    let config = SceneConfig::load_or_default();
    config.validate().map_err(anyhow::Error::msg)?;
    info!(
        "Configuration loaded: tick={}ms, idle_grace={}ms, interest={}x{}, profiling={}",
        config.tick_interval_ms,
        config.idle_grace_ms,
        config.interest_width,
        config.interest_height,
        config.profiling_enabled()
    );

    let metrics = Arc::new(SceneMetrics::new());
    let metrics_clone = metrics.clone();
    let metrics_port = config.metrics_port;
    tokio::spawn(async move {
        if let Err(e) = metrics::start_metrics_server(metrics_clone, metrics_port).await {
            error!("Metrics server error: {}", e);
        }
    });

    let mut scene = Scene::new(&config, demo_catalog()?, Instant::now()).with_metrics(metrics.clone());
    let mut rng = rand::thread_rng();
    for _ in 0..CRATES {
        scene.registry_mut().spawn_actor(0, random_point(&mut rng), 0.0, "crate", None)?;
    }
    for _ in 0..DRONES {
        let rotation = rng.gen_range(0.0..std::f32::consts::TAU);
        scene.registry_mut().spawn_actor(0, random_point(&mut rng), rotation, "drone", None)?;
    }
    let pilot = scene.registry_mut().spawn_actor(0, Vec2::ZERO, 0.0, "pilot", None)?;
    scene.add_participant("sparks", Box::new(SparkEmitter { every_ms: 500, next: 0 }));

    // Loopback client: every event is "delivered" as soon as it is drained
    let (sender, receiver) = outbound_channel();
    std::thread::spawn(move || {
        for event in receiver {
            debug!(client = %event.client, mode = ?event.mode, bytes = event.payload.len(), "event out");
            event.delivered();
        }
    });

    let handle = scene.handle();
    let client = Uuid::new_v4();
    let transport = Arc::new(ChannelTransport::new(client, sender, true).with_metrics(metrics.clone()));
    handle.connect(client, transport, Some(pilot))?;
    handle.client_message(client, ClientMessage::EnterScene)?;

    let shutdown = Arc::new(Notify::new());
    let scene_task = tokio::spawn(run_scene(scene, config.tick_interval(), shutdown.clone()));

    info!("Scene running, {} actors; Ctrl+C to stop", CRATES + DRONES + 1);
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    shutdown.notify_one();
    let scene = scene_task.await?;
    info!("Scene stopped after {} ticks", scene.tick_count());

    Ok(())
}

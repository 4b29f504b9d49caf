//! Fixed-tick scene driver
//!
//! One call to [`Scene::tick`] runs a whole tick on the scene thread:
//! 1. Drain queued commands (connects, input, scheduled runnables)
//! 2. Advance the authoritative timestamp by the wall-clock time elapsed
//! 3. Tick actors, then every registered participant
//! 4. Reap destroyed actors and compute this tick's deltas
//! 5. Reconcile every client, in client-id order
//! 6. Profiling, metrics and end-of-tick reset
//!
//! Every actor, participant, runnable and client is isolated: a failure or
//! panic skips that unit for this tick and the rest of the tick proceeds.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::config::SceneConfig;
use crate::metrics::SceneMetrics;
use crate::net::aoi::AreaOfInterest;
use crate::net::input::InputReport;
use crate::net::liaison::Liaison;
use crate::net::protocol::InputFrame;
use crate::net::transport::ClientTransport;
use crate::scene::actor::ActorId;
use crate::scene::catalog::Catalog;
use crate::scene::command_queue::{CommandQueue, SceneCommand};
use crate::scene::profiler::TickProfiler;
use crate::scene::registry::Registry;
use crate::scene::runtime::SceneHandle;
use crate::scene::spatial::SpatialGrid;
use crate::scene::{contain, ClientId, SceneError, Timestamp};

/// How often periodic stats are logged
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// A simulation system ticked after the actors, in registration order
pub trait TickParticipant: Send {
    fn tick(&mut self, registry: &mut Registry) -> Result<(), SceneError>;
}

/// Whether the scheduler should keep ticking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Active,
    /// No clients for longer than the idle grace; stop until one connects
    Idle,
}

pub struct Scene {
    registry: Registry,
    participants: Vec<(String, Box<dyn TickParticipant>)>,
    /// Keyed by client id so every tick reconciles in the same order
    liaisons: BTreeMap<ClientId, Liaison>,
    commands: CommandQueue,
    profiler: TickProfiler,
    metrics: Option<Arc<SceneMetrics>>,

    timestamp: Timestamp,
    previous_timestamp: Timestamp,
    last_tick_wall_clock: Instant,
    /// When the scene last became empty
    idle_since: Option<Instant>,
    idle_grace: Duration,

    interest: AreaOfInterest,
    ping_window: usize,
    wake: Arc<Notify>,
    tick_count: u64,
    stats_every: u64,
}

impl Scene {
    pub fn new(config: &SceneConfig, catalog: Catalog, now: Instant) -> Self {
        let spatial = Box::new(SpatialGrid::new(config.grid_cell_size));
        let stats_every = (STATS_INTERVAL.as_millis() as u64 / config.tick_interval_ms.max(1)).max(1);
        Self {
            registry: Registry::with_spatial_index(catalog, spatial),
            participants: Vec::new(),
            liaisons: BTreeMap::new(),
            commands: CommandQueue::new(config.command_capacity),
            profiler: TickProfiler::new(config.tick_interval(), config.profiling_enabled()),
            metrics: None,
            timestamp: 0,
            previous_timestamp: 0,
            last_tick_wall_clock: now,
            idle_since: Some(now),
            idle_grace: config.idle_grace(),
            interest: config.interest(),
            ping_window: config.ping_window,
            wake: Arc::new(Notify::new()),
            tick_count: 0,
            stats_every,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<SceneMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cross-thread handle for sessions and other subsystems
    pub fn handle(&self) -> SceneHandle {
        SceneHandle::new(self.commands.sender(), self.wake.clone())
    }

    pub(crate) fn wake_signal(&self) -> Arc<Notify> {
        self.wake.clone()
    }

    pub fn add_participant(&mut self, name: &str, participant: Box<dyn TickParticipant>) {
        info!(participant = name, "participant registered");
        self.participants.push((name.to_string(), participant));
    }

    // ========================================================================
    // Clients
    // ========================================================================

    /// Attach a client. A client that is already attached starts over with
    /// an empty window.
    pub fn connect(
        &mut self,
        client: ClientId,
        transport: Arc<dyn ClientTransport>,
        controlled: Option<ActorId>,
    ) {
        let controlled = controlled.filter(|&id| {
            let is_pawn = self.registry.is_pawn(id);
            if !is_pawn {
                warn!(%client, id, "client cannot control a non-pawn actor");
            }
            is_pawn
        });

        match self.liaisons.get_mut(&client) {
            Some(liaison) => {
                liaison.reset(transport, controlled);
                info!(%client, "client reconnected");
            }
            None => {
                let liaison = Liaison::new(client, transport, controlled, self.interest, self.ping_window);
                self.liaisons.insert(client, liaison);
                info!(%client, ?controlled, clients = self.liaisons.len(), "client connected");
            }
        }
        self.idle_since = None;
    }

    /// Tear down a client's reconciliation state
    pub fn disconnect(&mut self, client: ClientId) -> Result<(), SceneError> {
        if self.liaisons.remove(&client).is_none() {
            warn!(%client, "disconnect for unknown client");
            return Err(SceneError::ClientNotFound(client));
        }
        info!(%client, clients = self.liaisons.len(), "client disconnected");
        Ok(())
    }

    /// The client finished loading and is ready for deltas
    pub fn enter_scene(&mut self, client: ClientId) -> Result<(), SceneError> {
        let liaison = self.liaison_mut(client)?;
        liaison.mark_receiving();
        debug!(%client, "client entered scene");
        Ok(())
    }

    pub fn set_target(&mut self, client: ClientId, actor: Option<ActorId>) -> Result<(), SceneError> {
        let liaison = self
            .liaisons
            .get_mut(&client)
            .ok_or(SceneError::ClientNotFound(client))?;
        liaison.set_target(&self.registry, actor)
    }

    pub fn enqueue_input(
        &mut self,
        client: ClientId,
        acknowledge: Timestamp,
        ping: u32,
        frames: Vec<InputFrame>,
    ) -> Result<InputReport, SceneError> {
        let liaison = self
            .liaisons
            .get_mut(&client)
            .ok_or(SceneError::ClientNotFound(client))?;
        if let Some(metrics) = &self.metrics {
            metrics.inputs_received_total.fetch_add(1, Ordering::Relaxed);
        }
        Ok(liaison.enqueue_input(&mut self.registry, acknowledge, ping, frames))
    }

    fn liaison_mut(&mut self, client: ClientId) -> Result<&mut Liaison, SceneError> {
        self.liaisons.get_mut(&client).ok_or_else(|| {
            warn!(%client, "request for unknown client");
            SceneError::ClientNotFound(client)
        })
    }

    /// Run `work` on the scene thread at the start of the next tick
    pub fn schedule(&self, work: impl FnOnce(&mut Scene) + Send + 'static) {
        if let Err(e) = self.commands.sender().try_send(SceneCommand::Run(Box::new(work))) {
            warn!(error = %e, "could not schedule work");
        }
    }

    // ========================================================================
    // Tick
    // ========================================================================

    /// Run one tick at wall-clock time `now`
    pub fn tick(&mut self, now: Instant) -> TickStatus {
        let tick_started = Instant::now();
        self.profiler.tick_start();
        self.tick_count += 1;

        let mut failures = self.apply_commands();

        // Advance by at least 1ms: timestamp 0 belongs to the seed record
        let elapsed = (now.saturating_duration_since(self.last_tick_wall_clock).as_millis() as u64).max(1);
        self.previous_timestamp = self.timestamp;
        self.timestamp += elapsed;
        self.last_tick_wall_clock = now;
        self.registry.begin_tick(self.previous_timestamp, self.timestamp);

        let started = Instant::now();
        failures += self.registry.tick_actors(elapsed);
        self.profiler.record("actors", started.elapsed());

        for (name, participant) in self.participants.iter_mut() {
            let started = Instant::now();
            let registry = &mut self.registry;
            if contain(name.as_str(), || participant.tick(registry)).is_err() {
                failures += 1;
            }
            self.profiler.record(name.as_str(), started.elapsed());
        }

        let reaped = self.registry.reap_destroyed();
        self.registry.finish_simulation();

        let started = Instant::now();
        let registry = &self.registry;
        for (client, liaison) in self.liaisons.iter_mut() {
            if contain(format_args!("client {}", client), || liaison.reconcile(registry)).is_err() {
                failures += 1;
            }
        }
        self.profiler.record("reconcile", started.elapsed());

        let fired = self.registry.fired_effects().len();
        self.registry.end_tick();
        self.profiler.tick_end(self.registry.actor_count());
        self.record_metrics(tick_started.elapsed(), fired, failures);

        if reaped > 0 {
            debug!(reaped, timestamp = self.timestamp, "destroyed actors reaped");
        }
        if self.tick_count % self.stats_every == 0 {
            self.log_stats();
        }

        self.idle_status(now)
    }

    fn apply_commands(&mut self) -> usize {
        let mut failures = 0;
        for command in self.commands.drain() {
            match command {
                SceneCommand::Connect {
                    client,
                    transport,
                    controlled,
                } => self.connect(client, transport, controlled),
                SceneCommand::Disconnect { client } => {
                    let _ = self.disconnect(client);
                }
                SceneCommand::EnterScene { client } => {
                    let _ = self.enter_scene(client);
                }
                SceneCommand::Input {
                    client,
                    acknowledge,
                    ping,
                    frames,
                } => match self.enqueue_input(client, acknowledge, ping, frames) {
                    Ok(report) if report.ignored => {
                        debug!(%client, "input before scene entry ignored");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(%client, error = %e, "input dropped"),
                },
                SceneCommand::SetTarget { client, actor } => {
                    if let Err(e) = self.set_target(client, actor) {
                        debug!(%client, error = %e, "target change rejected");
                    }
                }
                SceneCommand::Run(work) => {
                    let result = contain("scheduled work", || {
                        work(self);
                        Ok(())
                    });
                    if result.is_err() {
                        failures += 1;
                    }
                }
            }
        }
        failures
    }

    fn idle_status(&mut self, now: Instant) -> TickStatus {
        if !self.liaisons.is_empty() {
            self.idle_since = None;
            return TickStatus::Active;
        }
        let since = *self.idle_since.get_or_insert(now);
        if now.saturating_duration_since(since) < self.idle_grace {
            return TickStatus::Active;
        }
        if let Some(metrics) = &self.metrics {
            metrics.idle.store(1, Ordering::Relaxed);
        }
        TickStatus::Idle
    }

    fn record_metrics(&self, duration: Duration, fired: usize, failures: usize) {
        let Some(metrics) = &self.metrics else {
            return;
        };
        metrics.record_tick_time(duration);
        metrics.clients.store(self.liaisons.len() as u64, Ordering::Relaxed);
        metrics.actors.store(self.registry.actor_count() as u64, Ordering::Relaxed);
        metrics.effects_fired_total.fetch_add(fired as u64, Ordering::Relaxed);
        metrics.record_failures(failures);
        if self.profiler.is_enabled() {
            metrics.record_status(self.profiler.status(), self.profiler.budget_usage_percent());
        }
    }

    fn log_stats(&self) {
        info!(
            "Scene: tick {}, t={}ms, {} clients, {} actors",
            self.tick_count,
            self.timestamp,
            self.liaisons.len(),
            self.registry.actor_count()
        );
        if self.profiler.is_enabled() {
            info!("Perf: {}", self.profiler.status_message());
            for entry in self.profiler.report().iter().take(5) {
                debug!(
                    "  {}: avg {:?}, max {:?} over {} samples",
                    entry.name, entry.average, entry.max, entry.samples
                );
            }
        }
    }

    /// Restart wall-clock bookkeeping after the scheduler was parked; the
    /// timestamp carries on from where it stopped
    pub fn resume(&mut self, now: Instant) {
        self.last_tick_wall_clock = now;
        self.idle_since = Some(now);
        if let Some(metrics) = &self.metrics {
            metrics.idle.store(0, Ordering::Relaxed);
        }
        info!(timestamp = self.timestamp, "scene resumed");
    }

    /// Drop every client and stop accepting spawns and effects
    pub fn shutdown(&mut self) {
        self.liaisons.clear();
        self.registry.shutdown();
        info!(ticks = self.tick_count, "scene shut down");
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    pub fn liaison(&self, client: ClientId) -> Option<&Liaison> {
        self.liaisons.get(&client)
    }

    pub fn client_count(&self) -> usize {
        self.liaisons.len()
    }

    #[inline]
    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    #[inline]
    pub fn previous_timestamp(&self) -> Timestamp {
        self.previous_timestamp
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn profiler(&self) -> &TickProfiler {
        &self.profiler
    }

    pub fn profiler_mut(&mut self) -> &mut TickProfiler {
        &mut self.profiler
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::net::protocol::{ClientMessage, SceneDelta};
    use crate::net::transport::testing::RecordingTransport;
    use crate::net::transport::{DeliveryMode, DeliveryReceipt, TransportError};
    use crate::scene::testing::catalog;
    use crate::util::vec2::Vec2;
    use uuid::Uuid;

    fn config() -> SceneConfig {
        SceneConfig {
            idle_grace_ms: 1000,
            interest_width: 100.0,
            interest_height: 100.0,
            profiling: true,
            ..Default::default()
        }
    }

    fn at(start: Instant, ms: u64) -> Instant {
        start + Duration::from_millis(ms)
    }

    struct Counter(Arc<AtomicUsize>);

    impl TickParticipant for Counter {
        fn tick(&mut self, _registry: &mut Registry) -> Result<(), SceneError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct Failing;

    impl TickParticipant for Failing {
        fn tick(&mut self, _registry: &mut Registry) -> Result<(), SceneError> {
            Err(SceneError::Logic("out of fuel".to_string()))
        }
    }

    struct Panicking;

    impl TickParticipant for Panicking {
        fn tick(&mut self, _registry: &mut Registry) -> Result<(), SceneError> {
            panic!("participant blew up");
        }
    }

    struct BrokenTransport;

    impl ClientTransport for BrokenTransport {
        fn post_event(
            &self,
            _delta: &SceneDelta,
            _mode: DeliveryMode,
        ) -> Result<DeliveryReceipt, TransportError> {
            panic!("socket gone");
        }

        fn transmit_datagrams(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_tick_advances_timestamp() {
        let start = Instant::now();
        let mut scene = Scene::new(&config(), catalog(), start);

        scene.tick(at(start, 50));
        assert_eq!((scene.previous_timestamp(), scene.timestamp()), (0, 50));
        scene.tick(at(start, 120));
        assert_eq!((scene.previous_timestamp(), scene.timestamp()), (50, 120));
        assert_eq!(scene.registry().timestamp(), 120);
    }

    #[test]
    fn test_zero_elapsed_still_advances() {
        let start = Instant::now();
        let mut scene = Scene::new(&config(), catalog(), start);
        scene.tick(start);
        assert_eq!(scene.timestamp(), 1);
    }

    #[test]
    fn test_failing_participants_are_isolated() {
        let start = Instant::now();
        let mut scene = Scene::new(&config(), catalog(), start);
        let count = Arc::new(AtomicUsize::new(0));
        scene.add_participant("failing", Box::new(Failing));
        scene.add_participant("panicking", Box::new(Panicking));
        scene.add_participant("counter", Box::new(Counter(count.clone())));

        scene.tick(at(start, 50));
        scene.tick(at(start, 100));
        assert_eq!(count.load(Ordering::Relaxed), 2);

        let names: Vec<String> = scene.profiler().report().into_iter().map(|e| e.name).collect();
        assert!(names.contains(&"counter".to_string()));
        assert!(names.contains(&"reconcile".to_string()));
    }

    #[test]
    fn test_failing_client_is_isolated() {
        let start = Instant::now();
        let metrics = Arc::new(SceneMetrics::new());
        let mut scene = Scene::new(&config(), catalog(), start).with_metrics(metrics.clone());
        let healthy = RecordingTransport::new(true);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        scene.connect(a, Arc::new(BrokenTransport), None);
        scene.connect(b, healthy.clone(), None);
        scene.enter_scene(a).unwrap();
        scene.enter_scene(b).unwrap();

        scene.tick(at(start, 50));
        scene.tick(at(start, 100));
        assert_eq!(healthy.count(), 2);
        assert_eq!(metrics.failures_total.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_commands_applied_at_tick_start() {
        let start = Instant::now();
        let mut scene = Scene::new(&config(), catalog(), start);
        let handle = scene.handle();
        let transport = RecordingTransport::new(true);
        let client = Uuid::new_v4();

        handle.connect(client, transport.clone(), None).unwrap();
        handle
            .client_message(client, ClientMessage::EnterScene)
            .unwrap();
        assert_eq!(scene.client_count(), 0);

        scene.tick(at(start, 50));
        assert_eq!(scene.client_count(), 1);
        assert!(scene.liaison(client).unwrap().is_receiving());
        // Reconciled in the same tick
        assert_eq!(transport.count(), 1);
    }

    #[test]
    fn test_scheduled_work_runs_next_tick() {
        let start = Instant::now();
        let mut scene = Scene::new(&config(), catalog(), start);
        scene.schedule(|scene| {
            let timestamp = scene.registry().timestamp();
            scene
                .registry_mut()
                .spawn_actor(timestamp, Vec2::ZERO, 0.0, "drone", None)
                .unwrap();
        });
        scene.schedule(|_| panic!("bad work"));
        assert_eq!(scene.registry().actor_count(), 0);

        scene.tick(at(start, 50));
        assert_eq!(scene.registry().actor_count(), 1);
    }

    #[test]
    fn test_effect_from_scheduled_work_reaches_clients() {
        let start = Instant::now();
        let mut scene = Scene::new(&config(), catalog(), start);
        let transport = RecordingTransport::new(true);
        let client = Uuid::new_v4();
        scene.connect(client, transport.clone(), None);
        scene.enter_scene(client).unwrap();
        scene.tick(at(start, 50));
        scene.tick(at(start, 100));

        scene.schedule(|scene| {
            let timestamp = scene.registry().timestamp();
            scene
                .registry_mut()
                .fire_effect(timestamp, None, Vec2::ZERO, 0.0, "spark")
                .unwrap();
        });
        scene.tick(at(start, 300));

        let effects = transport.last().unwrap().effects.unwrap();
        assert_eq!(effects.len(), 1);
        assert_eq!(effects[0].timestamp, 101);
        assert_eq!(effects[0].expiry, 301);
    }

    #[test]
    fn test_input_routed_to_controlled_pawn() {
        let start = Instant::now();
        let mut scene = Scene::new(&config(), catalog(), start);
        let pilot = scene
            .registry_mut()
            .spawn_actor(0, Vec2::ZERO, 0.0, "pilot", None)
            .unwrap();
        let client = Uuid::new_v4();
        scene.connect(client, RecordingTransport::new(true), Some(pilot));
        scene.enter_scene(client).unwrap();
        scene.tick(at(start, 100));

        let mut frame = InputFrame::new(100);
        frame.thrust = Vec2::new(1.0, 0.0);
        let report = scene.enqueue_input(client, 100, 20, vec![frame]).unwrap();
        assert_eq!(report.delivered, 1);

        scene.tick(at(start, 200));
        assert!(scene.registry().actor(pilot).unwrap().translation().x > 0.0);
    }

    #[test]
    fn test_non_pawn_cannot_be_controlled() {
        let start = Instant::now();
        let mut scene = Scene::new(&config(), catalog(), start);
        let drone = scene
            .registry_mut()
            .spawn_actor(0, Vec2::ZERO, 0.0, "drone", None)
            .unwrap();
        let client = Uuid::new_v4();
        scene.connect(client, RecordingTransport::new(true), Some(drone));
        assert_eq!(scene.liaison(client).unwrap().controlled(), None);
    }

    #[test]
    fn test_reconnect_resets_window() {
        let start = Instant::now();
        let mut scene = Scene::new(&config(), catalog(), start);
        let transport = RecordingTransport::new(true);
        let client = Uuid::new_v4();
        scene.connect(client, transport.clone(), None);
        scene.enter_scene(client).unwrap();
        scene.tick(at(start, 50));
        scene.tick(at(start, 100));
        assert_eq!(scene.liaison(client).unwrap().window_len(), 3);

        scene.connect(client, transport, None);
        let liaison = scene.liaison(client).unwrap();
        assert_eq!(liaison.window_len(), 1);
        assert!(!liaison.is_receiving());
        assert_eq!(scene.client_count(), 1);
    }

    #[test]
    fn test_unknown_client_requests() {
        let start = Instant::now();
        let mut scene = Scene::new(&config(), catalog(), start);
        let ghost = Uuid::new_v4();
        assert!(matches!(scene.disconnect(ghost), Err(SceneError::ClientNotFound(_))));
        assert!(matches!(scene.enter_scene(ghost), Err(SceneError::ClientNotFound(_))));
        assert!(matches!(
            scene.enqueue_input(ghost, 0, 0, Vec::new()),
            Err(SceneError::ClientNotFound(_))
        ));
    }

    #[test]
    fn test_idle_after_grace_and_resume() {
        let start = Instant::now();
        let mut scene = Scene::new(&config(), catalog(), start);

        assert_eq!(scene.tick(at(start, 500)), TickStatus::Active);
        assert_eq!(scene.tick(at(start, 1000)), TickStatus::Idle);

        // Parked for a minute, then a client shows up
        scene.resume(at(start, 61_000));
        let client = Uuid::new_v4();
        scene.connect(client, RecordingTransport::new(true), None);
        assert_eq!(scene.tick(at(start, 61_050)), TickStatus::Active);
        // Time did not jump by the parked minute
        assert_eq!(scene.timestamp(), 1050);

        scene.disconnect(client).unwrap();
        assert_eq!(scene.tick(at(start, 61_100)), TickStatus::Active);
        assert_eq!(scene.tick(at(start, 62_100)), TickStatus::Idle);
    }

    #[test]
    fn test_spawn_and_destroy_scenario() {
        let start = Instant::now();
        let mut scene = Scene::new(&config(), catalog(), start);
        let transport = RecordingTransport::new(true);
        let client = Uuid::new_v4();
        scene.connect(client, transport.clone(), None);
        scene.enter_scene(client).unwrap();

        scene.schedule(|scene| {
            let registry = scene.registry_mut();
            registry
                .spawn_actor(100, Vec2::new(10.0, 0.0), 0.0, "crate", None)
                .unwrap();
            let drone = registry
                .spawn_actor(100, Vec2::ZERO, 0.0, "drone", None)
                .unwrap();
            registry.destroy_actor(drone, 200).unwrap();
        });
        scene.tick(at(start, 100));
        let first = transport.last().unwrap();
        assert_eq!(first.added.map(|a| a.len()), Some(2));
        assert!(first.updated.is_none() && first.removed.is_none());

        scene.tick(at(start, 200));
        let second = transport.last().unwrap();
        let added = second.added.unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].config, "crate");
        assert!(second.updated.is_none() && second.removed.is_none());
        assert_eq!(second.reference, 0);
    }

    #[test]
    fn test_shutdown_stops_spawns() {
        let start = Instant::now();
        let mut scene = Scene::new(&config(), catalog(), start);
        scene.connect(Uuid::new_v4(), RecordingTransport::new(true), None);
        scene.shutdown();

        assert_eq!(scene.client_count(), 0);
        let result = scene
            .registry_mut()
            .spawn_actor(0, Vec2::ZERO, 0.0, "drone", None);
        assert!(matches!(result, Err(SceneError::ShutDown)));
    }
}

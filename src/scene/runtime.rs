//! Async scheduler for a scene
//!
//! Ticks the scene on a tokio interval and parks it while it is idle. Other
//! tasks reach the scene only through a [`SceneHandle`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::info;

use crate::net::protocol::ClientMessage;
use crate::net::transport::ClientTransport;
use crate::scene::actor::ActorId;
use crate::scene::command_queue::{CommandQueueError, CommandSender, SceneCommand};
use crate::scene::driver::{Scene, TickStatus};
use crate::scene::ClientId;

/// Cloneable handle for submitting work to a running scene
#[derive(Clone)]
pub struct SceneHandle {
    commands: CommandSender,
    wake: Arc<Notify>,
}

impl SceneHandle {
    pub(crate) fn new(commands: CommandSender, wake: Arc<Notify>) -> Self {
        Self { commands, wake }
    }

    /// Attach a client; wakes the scene if it is parked
    pub fn connect(
        &self,
        client: ClientId,
        transport: Arc<dyn ClientTransport>,
        controlled: Option<ActorId>,
    ) -> Result<(), CommandQueueError> {
        self.commands.try_send(SceneCommand::Connect {
            client,
            transport,
            controlled,
        })?;
        self.wake.notify_one();
        Ok(())
    }

    pub fn disconnect(&self, client: ClientId) -> Result<(), CommandQueueError> {
        self.commands.try_send(SceneCommand::Disconnect { client })
    }

    /// Forward a decoded client message
    pub fn client_message(&self, client: ClientId, message: ClientMessage) -> Result<(), CommandQueueError> {
        self.commands
            .try_send(SceneCommand::from_client_message(client, message))
    }

    /// Run `work` on the scene thread at the start of the next tick; wakes
    /// the scene if it is parked
    pub fn schedule(&self, work: impl FnOnce(&mut Scene) + Send + 'static) -> Result<(), CommandQueueError> {
        self.commands.try_send(SceneCommand::Run(Box::new(work)))?;
        self.wake.notify_one();
        Ok(())
    }

    pub fn send(&self, command: SceneCommand) -> Result<(), CommandQueueError> {
        self.commands.try_send(command)
    }
}

/// Drive `scene` until `shutdown` is notified (use `notify_one`), then shut
/// it down and hand it back
pub async fn run_scene(mut scene: Scene, tick_interval: Duration, shutdown: Arc<Notify>) -> Scene {
    let wake = scene.wake_signal();
    let mut ticker = interval(tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("Scene loop started ({:?} ticks)", tick_interval);
    scene.resume(Instant::now().into_std());

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            instant = ticker.tick() => {
                if scene.tick(instant.into_std()) == TickStatus::Active {
                    continue;
                }
                info!("Scene idle, parking until a client connects");
                tokio::select! {
                    _ = shutdown.notified() => break,
                    _ = wake.notified() => {}
                }
                scene.resume(Instant::now().into_std());
                ticker.reset();
            }
        }
    }

    scene.shutdown();
    scene
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::config::SceneConfig;
    use crate::metrics::SceneMetrics;
    use crate::net::transport::testing::RecordingTransport;
    use crate::scene::testing::catalog;
    use tokio::sync::oneshot;
    use uuid::Uuid;

    fn config() -> SceneConfig {
        SceneConfig {
            tick_interval_ms: 5,
            idle_grace_ms: 30,
            ..Default::default()
        }
    }

    async fn client_count(handle: &SceneHandle) -> usize {
        let (tx, rx) = oneshot::channel();
        handle
            .schedule(move |scene| {
                let _ = tx.send(scene.client_count());
            })
            .unwrap();
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let config = config();
        let scene = Scene::new(&config, catalog(), std::time::Instant::now());
        let handle = scene.handle();
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run_scene(scene, config.tick_interval(), shutdown.clone()));

        let transport = RecordingTransport::new(true);
        let client = Uuid::new_v4();
        handle.connect(client, transport.clone(), None).unwrap();
        handle.client_message(client, ClientMessage::EnterScene).unwrap();
        assert_eq!(client_count(&handle).await, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(transport.count() > 0);

        shutdown.notify_one();
        let scene = task.await.unwrap();
        assert!(scene.registry().is_shut_down());
        assert!(scene.tick_count() > 0);
    }

    #[tokio::test]
    async fn test_parks_when_idle_and_wakes_on_connect() {
        let config = config();
        let metrics = Arc::new(SceneMetrics::new());
        let scene = Scene::new(&config, catalog(), std::time::Instant::now()).with_metrics(metrics.clone());
        let handle = scene.handle();
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run_scene(scene, config.tick_interval(), shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(metrics.idle.load(Ordering::Relaxed), 1);

        handle
            .connect(Uuid::new_v4(), RecordingTransport::new(true), None)
            .unwrap();
        assert_eq!(client_count(&handle).await, 1);
        assert_eq!(metrics.idle.load(Ordering::Relaxed), 0);

        shutdown.notify_one();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_scheduled_work_wakes_parked_scene() {
        let config = config();
        let metrics = Arc::new(SceneMetrics::new());
        let scene = Scene::new(&config, catalog(), std::time::Instant::now()).with_metrics(metrics.clone());
        let handle = scene.handle();
        let shutdown = Arc::new(Notify::new());
        let task = tokio::spawn(run_scene(scene, config.tick_interval(), shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(metrics.idle.load(Ordering::Relaxed), 1);

        let count = tokio::time::timeout(Duration::from_secs(1), client_count(&handle)).await;
        assert_eq!(count, Ok(0));

        shutdown.notify_one();
        task.await.unwrap();
    }

    #[test]
    fn test_handle_fails_after_scene_dropped() {
        let config = config();
        let scene = Scene::new(&config, catalog(), std::time::Instant::now());
        let handle = scene.handle();
        tokio_test::assert_ok!(handle.disconnect(Uuid::new_v4()));
        drop(scene);

        let result = handle.disconnect(Uuid::new_v4());
        assert_eq!(result, Err(CommandQueueError::Disconnected));
    }
}

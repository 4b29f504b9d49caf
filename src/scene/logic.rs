//! Built-in actor logic kinds

use std::collections::VecDeque;

use crate::net::protocol::InputFrame;
use crate::scene::actor::{ActorContext, ActorLogic};
use crate::scene::catalog::ActorConfig;
use crate::scene::SceneError;
use crate::util::vec2::Vec2;

pub const PROP: &str = "prop";
pub const DRIFTER: &str = "drifter";
pub const PAWN: &str = "pawn";

/// Inert scenery
pub struct Prop;

impl Prop {
    pub fn create(_config: &ActorConfig) -> Box<dyn ActorLogic> {
        Box::new(Prop)
    }
}

impl ActorLogic for Prop {
    fn tick(&mut self, _ctx: &mut ActorContext<'_>) -> Result<(), SceneError> {
        Ok(())
    }
}

/// Moves in a straight line along its initial rotation
pub struct Drifter {
    speed: f32,
}

impl Drifter {
    pub fn create(config: &ActorConfig) -> Box<dyn ActorLogic> {
        Box::new(Drifter { speed: config.speed })
    }
}

impl ActorLogic for Drifter {
    fn tick(&mut self, ctx: &mut ActorContext<'_>) -> Result<(), SceneError> {
        let dt = ctx.elapsed_secs();
        let speed = self.speed;
        let id = ctx.id;
        let actor = ctx.actor_mut().ok_or(SceneError::ActorNotFound(id))?;
        let snapshot = actor.snapshot_mut();
        snapshot.velocity = Vec2::from_angle(snapshot.rotation) * speed;
        snapshot.translation += snapshot.velocity * dt;
        Ok(())
    }
}

/// Client-controlled actor driven by input frames
pub struct Pawn {
    speed: f32,
    queued: VecDeque<InputFrame>,
    current: InputFrame,
}

impl Pawn {
    pub fn create(config: &ActorConfig) -> Box<dyn ActorLogic> {
        Box::new(Pawn {
            speed: config.speed,
            queued: VecDeque::new(),
            current: InputFrame::default(),
        })
    }
}

impl ActorLogic for Pawn {
    fn tick(&mut self, ctx: &mut ActorContext<'_>) -> Result<(), SceneError> {
        // Latest frame wins; earlier ones only mattered for their buttons
        let mut buttons = 0;
        while let Some(frame) = self.queued.pop_front() {
            buttons |= frame.buttons;
            self.current = frame;
        }
        let dt = ctx.elapsed_secs();
        let velocity = self.current.thrust.clamp_length(1.0) * self.speed;
        let aim = self.current.aim;
        let state = self.current.buttons | buttons;

        let id = ctx.id;
        let actor = ctx.actor_mut().ok_or(SceneError::ActorNotFound(id))?;
        let snapshot = actor.snapshot_mut();
        snapshot.velocity = velocity;
        snapshot.translation += velocity * dt;
        snapshot.rotation = aim;
        snapshot.state = state;
        Ok(())
    }

    fn is_pawn(&self) -> bool {
        true
    }

    fn enqueue_input(&mut self, frame: InputFrame) {
        self.queued.push_back(frame);
    }
}

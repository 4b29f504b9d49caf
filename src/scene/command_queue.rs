//! Lock-free command queue into the scene thread
//!
//! Session and I/O tasks never touch scene state directly. They push commands
//! through crossbeam-channel senders and the scene drains everything pending
//! at the start of each tick.

use std::fmt;
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use crate::net::protocol::{ClientMessage, InputFrame};
use crate::net::transport::ClientTransport;
use crate::scene::actor::ActorId;
use crate::scene::driver::Scene;
use crate::scene::{ClientId, Timestamp};

/// Work scheduled to run on the scene thread at the start of the next tick
pub type Runnable = Box<dyn FnOnce(&mut Scene) + Send>;

pub enum SceneCommand {
    Connect {
        client: ClientId,
        transport: Arc<dyn ClientTransport>,
        controlled: Option<ActorId>,
    },
    Disconnect {
        client: ClientId,
    },
    EnterScene {
        client: ClientId,
    },
    Input {
        client: ClientId,
        acknowledge: Timestamp,
        ping: u32,
        frames: Vec<InputFrame>,
    },
    SetTarget {
        client: ClientId,
        actor: Option<ActorId>,
    },
    Run(Runnable),
}

impl SceneCommand {
    /// Wrap a decoded client message
    pub fn from_client_message(client: ClientId, message: ClientMessage) -> Self {
        match message {
            ClientMessage::EnterScene => SceneCommand::EnterScene { client },
            ClientMessage::Input {
                acknowledge,
                ping,
                frames,
            } => SceneCommand::Input {
                client,
                acknowledge,
                ping,
                frames,
            },
            ClientMessage::SetTarget { actor } => SceneCommand::SetTarget { client, actor },
        }
    }
}

impl fmt::Debug for SceneCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SceneCommand::Connect { client, controlled, .. } => f
                .debug_struct("Connect")
                .field("client", client)
                .field("controlled", controlled)
                .finish(),
            SceneCommand::Disconnect { client } => {
                f.debug_struct("Disconnect").field("client", client).finish()
            }
            SceneCommand::EnterScene { client } => {
                f.debug_struct("EnterScene").field("client", client).finish()
            }
            SceneCommand::Input {
                client,
                acknowledge,
                frames,
                ..
            } => f
                .debug_struct("Input")
                .field("client", client)
                .field("acknowledge", acknowledge)
                .field("frames", &frames.len())
                .finish(),
            SceneCommand::SetTarget { client, actor } => f
                .debug_struct("SetTarget")
                .field("client", client)
                .field("actor", actor)
                .finish(),
            SceneCommand::Run(_) => f.write_str("Run"),
        }
    }
}

/// Bounded command queue owned by the scene
pub struct CommandQueue {
    /// Sender side - cloned into every handle
    sender: Sender<SceneCommand>,
    /// Receiver side - drained by the scene
    receiver: Receiver<SceneCommand>,
    capacity: usize,
}

impl CommandQueue {
    /// Capacity should cover a burst of input between ticks
    /// (e.g. 1000 for 100 clients sending at 10 Hz)
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Create a new sender handle
    pub fn sender(&self) -> CommandSender {
        CommandSender {
            sender: self.sender.clone(),
        }
    }

    /// Take every pending command, in submission order
    pub fn drain(&self) -> Vec<SceneCommand> {
        self.receiver.try_iter().collect()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for CommandQueue {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Clonable sender handle for session tasks
#[derive(Clone)]
pub struct CommandSender {
    sender: Sender<SceneCommand>,
}

impl CommandSender {
    /// Submit a command without blocking
    #[inline]
    pub fn try_send(&self, command: SceneCommand) -> Result<(), CommandQueueError> {
        self.sender.try_send(command).map_err(|e| match e {
            TrySendError::Full(_) => CommandQueueError::Full,
            TrySendError::Disconnected(_) => CommandQueueError::Disconnected,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandQueueError {
    /// Queue is full (backpressure)
    #[error("scene command queue is full")]
    Full,
    /// Scene has stopped
    #[error("scene is no longer running")]
    Disconnected,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn input(client: ClientId, acknowledge: Timestamp) -> SceneCommand {
        SceneCommand::Input {
            client,
            acknowledge,
            ping: 30,
            frames: vec![InputFrame::new(acknowledge + 10)],
        }
    }

    #[test]
    fn test_drain_preserves_order() {
        let queue = CommandQueue::new(10);
        let sender = queue.sender();
        let client = Uuid::new_v4();

        sender.try_send(SceneCommand::EnterScene { client }).unwrap();
        sender.try_send(input(client, 100)).unwrap();
        sender.try_send(SceneCommand::Disconnect { client }).unwrap();
        assert_eq!(queue.pending_count(), 3);

        let commands = queue.drain();
        assert!(matches!(commands[0], SceneCommand::EnterScene { .. }));
        assert!(matches!(commands[1], SceneCommand::Input { acknowledge: 100, .. }));
        assert!(matches!(commands[2], SceneCommand::Disconnect { .. }));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_backpressure() {
        let queue = CommandQueue::new(2);
        let sender = queue.sender();
        let client = Uuid::new_v4();

        sender.try_send(input(client, 1)).unwrap();
        sender.try_send(input(client, 2)).unwrap();
        assert_eq!(sender.try_send(input(client, 3)), Err(CommandQueueError::Full));

        queue.drain();
        assert!(sender.try_send(input(client, 3)).is_ok());
    }

    #[test]
    fn test_disconnected_after_queue_dropped() {
        let queue = CommandQueue::new(2);
        let sender = queue.sender();
        drop(queue);

        let result = sender.try_send(SceneCommand::Disconnect { client: Uuid::new_v4() });
        assert_eq!(result, Err(CommandQueueError::Disconnected));
    }

    #[test]
    fn test_from_client_message() {
        let client = Uuid::new_v4();
        let command = SceneCommand::from_client_message(
            client,
            ClientMessage::SetTarget { actor: Some(4) },
        );
        match command {
            SceneCommand::SetTarget { client: c, actor } => {
                assert_eq!(c, client);
                assert_eq!(actor, Some(4));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_default_capacity() {
        assert_eq!(CommandQueue::default().capacity(), 1000);
    }
}

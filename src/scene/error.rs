use crate::net::transport::TransportError;
use crate::scene::actor::ActorId;
use crate::scene::ClientId;

/// Errors raised by scene operations
///
/// None of these are fatal: the tick driver logs them and skips the unit of
/// work that produced them.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SceneError {
    #[error("Unknown actor config: {0}")]
    UnknownActorConfig(String),
    #[error("Unknown effect config: {0}")]
    UnknownEffectConfig(String),
    #[error("Unknown logic kind '{kind}' in actor config {config}")]
    UnknownLogicKind { config: String, kind: String },
    #[error("Scene has shut down")]
    ShutDown,
    #[error("Actor not found: {0}")]
    ActorNotFound(ActorId),
    #[error("Actor id already in use: {0}")]
    DuplicateActor(ActorId),
    #[error("Actor {0} is not a pawn")]
    NotAPawn(ActorId),
    #[error("Client not found: {0}")]
    ClientNotFound(ClientId),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Logic error: {0}")]
    Logic(String),
    #[error("Panicked: {0}")]
    Panicked(String),
}

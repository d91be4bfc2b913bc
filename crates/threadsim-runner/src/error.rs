//! Facade-level error type.

use thiserror::Error;
use threadsim_common::{ConfigError, NodeId};
use threadsim_dispatcher::DispatcherError;
use threadsim_node::NodeError;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Dispatcher(#[from] DispatcherError),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error("node {0} already exists")]
    NodeExists(NodeId),

    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    #[error("simulation is shutting down")]
    ShuttingDown,
}

impl SimError {
    /// Numeric code used by the operator CLI's `Error N:` responses.
    pub fn code(&self) -> u32 {
        match self {
            SimError::Config(_) => 2,
            SimError::Dispatcher(_) => 3,
            SimError::Node(NodeError::CommandTimeout(_)) => 6,
            SimError::Node(NodeError::Command { code, .. }) => *code,
            SimError::Node(_) => 4,
            SimError::NodeExists(_) => 5,
            SimError::NodeNotFound(_) => 5,
            SimError::ShuttingDown => 9,
        }
    }
}

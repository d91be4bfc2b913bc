//! Dispatcher error taxonomy.

use thiserror::Error;
use threadsim_common::NodeId;

/// Errors surfaced by dispatcher operations. Node-scoped errors leave the
/// rest of the simulation running; socket setup failures are fatal for the
/// whole simulation.
#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Binding or reading the shared event socket failed.
    #[error("event socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// A node id was already registered.
    #[error("node {0} already exists")]
    DuplicateNode(NodeId),

    /// Operation addressed a node the dispatcher does not know.
    #[error("node {0} not found")]
    NodeNotFound(NodeId),

    /// A node did not connect and boot within the startup window.
    #[error("node {0} did not connect within the startup window")]
    NodeStartupTimeout(NodeId),

    /// A node violated the event protocol; it has been terminated.
    #[error("node {node} protocol error: {reason}")]
    Protocol { node: NodeId, reason: String },

    /// The selected radio model name is unknown.
    #[error("unknown radio model '{0}'")]
    UnknownRadioModel(String),

    /// An internal invariant was violated; the simulation must shut down.
    #[error("dispatcher invariant violated: {0}")]
    Invariant(String),
}

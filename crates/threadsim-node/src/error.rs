//! Supervisor error type.

use thiserror::Error;
use threadsim_common::ConfigError;

/// Errors from node supervision and the command API. Command errors and
/// timeouts are recoverable: the node keeps running.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Spawning the node executable failed.
    #[error("failed to spawn node process: {0}")]
    Spawn(#[source] std::io::Error),

    /// The node executable could not be located.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Filesystem work (flash/log files) failed.
    #[error("node file handling failed: {0}")]
    Io(#[from] std::io::Error),

    /// The node's CLI returned `Error N: ...` for a command.
    #[error("command failed: Error {code}: {message}")]
    Command { code: u32, message: String },

    /// No terminator line arrived within the timeout window.
    #[error("command '{0}' timed out")]
    CommandTimeout(String),

    /// The command produced output of an unexpected shape.
    #[error("unexpected command output: {0}")]
    UnexpectedOutput(String),

    /// The node process exited or was deleted mid-command.
    #[error("node is gone")]
    NodeGone,
}

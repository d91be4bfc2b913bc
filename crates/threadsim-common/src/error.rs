//! Error type shared by configuration and startup code.

use thiserror::Error;

/// Errors raised while building or validating simulation configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An executable could not be located in any search path.
    #[error("executable '{0}' not found in search paths or $PATH")]
    ExecutableNotFound(String),

    /// The simulation id maps to an invalid port base.
    #[error("invalid simulation id {0}: port base must be a multiple of ten >= 9000")]
    InvalidSimulationId(u32),

    /// A node configuration field is out of range.
    #[error("invalid node config: {0}")]
    InvalidNodeConfig(String),

    /// Filesystem preparation (tmp dir, stale files) failed.
    #[error("tmp directory setup failed: {0}")]
    TmpDir(#[from] std::io::Error),
}

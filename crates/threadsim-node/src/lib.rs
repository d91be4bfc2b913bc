//! Node process supervision.
//!
//! Each simulated node runs an unmodified Thread stack binary as a child
//! process. The supervisor owns that process, translates between the
//! dispatcher's event model and the node's two I/O surfaces (the virtual
//! UART carrying CLI bytes, and stdout/stderr), and provides the building
//! blocks for the synchronous text command API offered by the controller.

mod command;
mod error;
mod logger;
mod supervisor;
mod uart;

pub use command::*;
pub use error::*;
pub use logger::*;
pub use supervisor::*;
pub use uart::*;

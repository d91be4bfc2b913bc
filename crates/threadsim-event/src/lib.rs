//! Wire codec for the event protocol spoken between the dispatcher and node
//! processes.
//!
//! # Protocol Overview
//!
//! Each message is a fixed 11-byte little-endian header followed by a
//! variable payload:
//!
//! | Offset | Size | Field |
//! |--------|------|----------------------------------------|
//! | 0      | 8    | delay (µs, relative to node's clock)   |
//! | 8      | 1    | event kind                             |
//! | 9      | 2    | payload length                         |
//!
//! The absolute delivery timestamp is never transmitted; each side derives it
//! from its own virtual clock plus the delay. Radio events carry a typed
//! prefix inside the payload (channel, power, error, duration), followed for
//! frame-carrying kinds by a repeated channel byte and the raw PSDU.

mod error;
mod frame;
mod types;

pub use error::*;
pub use frame::*;
pub use types::*;

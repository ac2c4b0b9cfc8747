//! Data Relay Module
//!
//! Bounded bidirectional relay between an accepted connection and its
//! forward target.

pub mod buffer;
pub mod engine;
pub mod launcher;
pub mod session;

pub use buffer::{Buffer, Progress, TryIo};
pub use engine::RelayEngine;
pub use launcher::{SessionLauncher, SessionOutcome};
pub use session::{RelayEnd, RelayReport, RelaySession, Side};

//! Configuration Module
//!
//! Handles configuration loading, validation, and command-line operands.

pub mod manager;
pub mod types;

pub use manager::ConfigManager;
pub use types::*;

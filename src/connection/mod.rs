//! Connection Management Module
//!
//! Handles listener setup, connection acceptance, and session dispatch.

pub mod listener;
pub mod manager;

pub use listener::Listeners;
pub use manager::{ConnectionManager, ConnectionStats};

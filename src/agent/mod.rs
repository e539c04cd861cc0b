//! Plugin execution agent.
//!
//! This module runs plugin batches against cached analysis contexts and
//! tracks their liveness for the watchdog.

pub mod heartbeat;
pub mod runner;

pub use heartbeat::{watch, Heartbeat, SpinnerProgress};
pub use runner::{PluginRunner, RunnerConfig, DEFAULT_PROFILE};

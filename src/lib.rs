//! memrelay - memory-analysis plugin runner
//!
//! Runs analysis plugins against memory images on behalf of a remote
//! controller. Each plugin's output is captured as a sectioned result
//! document of wire-safe values; analysis contexts are cached per target
//! so repeated requests skip the expensive setup.

pub mod agent;
pub mod cli;
pub mod coerce;
pub mod config;
pub mod engine;
pub mod models;
pub mod render;
pub mod report;
pub mod session;

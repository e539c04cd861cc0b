//! Result rendering for plugin output.
//!
//! This module provides the builder plugins write their tables and
//! text into.

pub mod builder;

pub use builder::{BuilderState, ResultBuilder, SectionMode};

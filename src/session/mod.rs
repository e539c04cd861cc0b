//! Analysis contexts and their process-wide cache.

pub mod cache;
pub mod context;

pub use cache::{ContextCache, SharedContext, DEFAULT_CAPACITY};
pub use context::AnalysisContext;

use thiserror::Error;

/// Failures obtaining an analysis context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("failed to open {target}: {reason}")]
    Open { target: String, reason: String },

    #[error("failed to build analysis context for {target}: {reason}")]
    Construction { target: String, reason: String },

    #[error("no cached analysis context for {0}")]
    NotCached(String),
}

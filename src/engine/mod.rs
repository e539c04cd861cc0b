//! Interfaces to the external analysis engine.
//!
//! The runner only needs four things from the outside world: a way to
//! open a target image, a plugin registry, an optional profile guesser and
//! a heartbeat sink it can hand down into plugin calls.

pub mod raw;

use crate::models::DeviceDescriptor;
use crate::render::ResultBuilder;
use crate::session::AnalysisContext;
use std::fmt;
use std::io;
use thiserror::Error;

/// Errors raised by engine collaborators.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{0} is not supported by this engine")]
    Unsupported(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid attribute {name}: {reason}")]
    InvalidAttribute { name: String, reason: String },

    #[error("{0}")]
    Other(String),
}

/// Liveness signal forwarded to the supervising watchdog.
///
/// Implementations must return quickly and never block: plugins call this
/// from deep inside long-running work.
pub trait ProgressSink: Send + Sync {
    fn report(&self, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn report(&self, message: &str) {
        self(message)
    }
}

/// Sink that drops every heartbeat.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _message: &str) {}
}

/// An opened target image.
pub trait ImageHandle: fmt::Debug + Send {
    /// Size of the image in bytes.
    fn size(&self) -> u64;

    /// Read into `buf` at `offset`, returning the number of bytes read.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Page-table base (DTB/CR3) reported by the acquisition driver.
    fn base_pointer(&self) -> Option<u64> {
        None
    }
}

/// Opens target devices. Stands in for the agent's virtual filesystem.
pub trait ImageOpener: Send + Sync {
    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn ImageHandle>, EngineError>;
}

/// One named analysis routine.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    /// Run the plugin against `context`, writing results into `out`.
    fn render(
        &self,
        context: &mut AnalysisContext,
        out: &mut ResultBuilder,
        progress: &dyn ProgressSink,
    ) -> Result<(), EngineError>;
}

/// The analysis engine as seen by the runner.
pub trait AnalysisEngine: Send + Sync {
    /// Resolve a plugin by name.
    fn plugin(&self, name: &str) -> Option<&dyn Plugin>;

    /// Names of every plugin this engine provides.
    fn plugin_names(&self) -> Vec<&str>;

    /// Guess the profile of an opened image. `Ok(None)` means no guess.
    fn guess_profile(
        &self,
        _image: &dyn ImageHandle,
        _progress: &dyn ProgressSink,
    ) -> Result<Option<String>, EngineError> {
        Err(EngineError::Unsupported("profile detection"))
    }
}

/// Name-indexed plugin table engines can build on.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin, replacing any previous one with the same name.
    pub fn register(&mut self, plugin: Box<dyn Plugin>) {
        self.plugins.retain(|p| p.name() != plugin.name());
        self.plugins.push(plugin);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Plugin> {
        self.plugins
            .iter()
            .find(|p| p.name() == name)
            .map(|p| &**p)
    }

    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn Plugin> {
        self.plugins.iter().map(|p| &**p)
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str, &'static str);

    impl Plugin for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn description(&self) -> &str {
            self.1
        }

        fn render(
            &self,
            _context: &mut AnalysisContext,
            out: &mut ResultBuilder,
            _progress: &dyn ProgressSink,
        ) -> Result<(), EngineError> {
            out.write(self.1);
            Ok(())
        }
    }

    #[test]
    fn test_registry_lookup() {
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(Named("pslist", "processes")));
        registry.register(Box::new(Named("modules", "drivers")));

        assert_eq!(registry.names(), vec!["pslist", "modules"]);
        assert_eq!(registry.get("modules").unwrap().description(), "drivers");
        assert!(registry.get("psxview").is_none());
    }

    #[test]
    fn test_registry_replaces_same_name() {
        let mut registry = PluginRegistry::new();
        registry.register(Box::new(Named("pslist", "old")));
        registry.register(Box::new(Named("pslist", "new")));

        assert_eq!(registry.names(), vec!["pslist"]);
        assert_eq!(registry.get("pslist").unwrap().description(), "new");
    }

    #[test]
    fn test_closure_progress_sink() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let count = AtomicUsize::new(0);
        let sink = |_: &str| {
            count.fetch_add(1, Ordering::SeqCst);
        };
        sink.report("one");
        sink.report("two");
        NoProgress.report("ignored");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_error_messages() {
        let err = EngineError::InvalidAttribute {
            name: "length".to_string(),
            reason: "must be positive".to_string(),
        };
        assert_eq!(err.to_string(), "invalid attribute length: must be positive");
        assert_eq!(
            EngineError::Unsupported("profile detection").to_string(),
            "profile detection is not supported by this engine"
        );
    }
}

//! Plugin batch runner.
//!
//! For one request the runner:
//! - gets or builds the target's analysis context through the cache,
//! - applies the controller's attributes to it,
//! - runs every requested plugin in order, each into a fresh builder,
//! - turns every plugin failure (error or panic) into data on that
//!   plugin's document so the rest of the batch still runs.

use crate::config::Config;
use crate::engine::{AnalysisEngine, EngineError, ImageHandle, ImageOpener, ProgressSink};
use crate::models::{DeviceDescriptor, PluginRequest, ResultDocument};
use crate::render::ResultBuilder;
use crate::session::{AnalysisContext, ContextCache, ContextError};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError};
use tracing::{debug, info, warn};

/// Profile used when auto-detection is off or comes up empty.
pub const DEFAULT_PROFILE: &str = "Win7SP1x64";

/// Settings for the runner.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub default_profile: String,
    /// Ask the engine to guess the profile when building a context.
    pub detect_profile: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_profile: DEFAULT_PROFILE.to_string(),
            detect_profile: true,
        }
    }
}

impl From<&Config> for RunnerConfig {
    fn from(config: &Config) -> Self {
        Self {
            default_profile: config.profile.default.clone(),
            detect_profile: config.profile.auto_detect,
        }
    }
}

/// Runs plugin batches against cached analysis contexts.
pub struct PluginRunner {
    config: RunnerConfig,
    cache: Arc<ContextCache>,
    opener: Arc<dyn ImageOpener>,
    engine: Arc<dyn AnalysisEngine>,
}

impl PluginRunner {
    pub fn new(
        config: RunnerConfig,
        cache: Arc<ContextCache>,
        opener: Arc<dyn ImageOpener>,
        engine: Arc<dyn AnalysisEngine>,
    ) -> Self {
        Self {
            config,
            cache,
            opener,
            engine,
        }
    }

    pub fn cache(&self) -> &ContextCache {
        &self.cache
    }

    /// Run the batch and collect one document per requested plugin, in
    /// request order.
    pub fn run(
        &self,
        request: &PluginRequest,
        progress: &dyn ProgressSink,
    ) -> Result<Vec<ResultDocument>, ContextError> {
        let mut documents = Vec::with_capacity(request.plugins.len());
        self.run_streaming(request, progress, |document| documents.push(document))?;
        Ok(documents)
    }

    /// Run the batch, handing each document to `reply` as soon as it is
    /// finalized. Returns the number of documents sent.
    ///
    /// Only a failure to obtain the context is returned as an error;
    /// plugin failures are recorded on their documents.
    pub fn run_streaming<F>(
        &self,
        request: &PluginRequest,
        progress: &dyn ProgressSink,
        mut reply: F,
    ) -> Result<usize, ContextError>
    where
        F: FnMut(ResultDocument),
    {
        let device = &request.device;
        let shared = self
            .cache
            .get_or_create(&device.path, || self.build_context(device, progress))?;

        // Runs on the same target serialize here; other targets are unaffected.
        let mut context = shared.lock().unwrap_or_else(PoisonError::into_inner);
        context.set_attributes(request.attributes.clone());

        info!(
            "Running {} plugin(s) against {} (profile {})",
            request.plugins.len(),
            device.path,
            context.profile()
        );

        for name in &request.plugins {
            progress.report(&format!("Running plugin {}", name));
            let document = self.run_plugin(name, &mut context, progress);
            reply(document);
        }

        // Contexts skipped by eviction while held can go now.
        drop(context);
        drop(shared);
        self.cache.evict_if_over_capacity();

        Ok(request.plugins.len())
    }

    fn build_context(
        &self,
        device: &DeviceDescriptor,
        progress: &dyn ProgressSink,
    ) -> Result<AnalysisContext, ContextError> {
        info!("Building analysis context for {}", device.path);

        let image = self.opener.open(device).map_err(|e| ContextError::Open {
            target: device.path.clone(),
            reason: e.to_string(),
        })?;

        if let Some(base_pointer) = image.base_pointer() {
            debug!("Image reports base pointer {:#x}", base_pointer);
        }

        let profile = self
            .detect_profile(image.as_ref(), progress)
            .unwrap_or_else(|| self.config.default_profile.clone());
        info!("Using profile {} for {}", profile, device.path);

        Ok(AnalysisContext::new(device.path.as_str(), image, profile))
    }

    /// Ask the engine for a profile. Any failure means "no guess".
    fn detect_profile(&self, image: &dyn ImageHandle, progress: &dyn ProgressSink) -> Option<String> {
        if !self.config.detect_profile {
            return None;
        }

        let guessed = panic::catch_unwind(AssertUnwindSafe(|| {
            self.engine.guess_profile(image, progress)
        }));

        match guessed {
            Ok(Ok(Some(profile))) if !profile.is_empty() => Some(profile),
            Ok(Ok(_)) => {
                debug!("Profile detection returned no guess");
                None
            }
            Ok(Err(EngineError::Unsupported(what))) => {
                debug!("Skipping profile detection: {} unsupported", what);
                None
            }
            Ok(Err(err)) => {
                debug!("Profile detection failed: {}", err);
                None
            }
            Err(payload) => {
                debug!("Profile detection panicked: {}", panic_message(payload.as_ref()));
                None
            }
        }
    }

    fn run_plugin(
        &self,
        name: &str,
        context: &mut AnalysisContext,
        progress: &dyn ProgressSink,
    ) -> ResultDocument {
        let mut builder = ResultBuilder::new();
        builder.set_plugin_label(name);

        let error = match self.engine.plugin(name) {
            None => Some(format!("unknown plugin: {}", name)),
            Some(plugin) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    plugin.render(context, &mut builder, progress)
                }));
                match outcome {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err.to_string()),
                    Err(payload) => Some(format!(
                        "plugin panicked: {}",
                        panic_message(payload.as_ref())
                    )),
                }
            }
        };

        let mut document = builder.finalize();
        if let Some(error) = error {
            let error = if error.is_empty() {
                format!("plugin {} failed without a message", name)
            } else {
                error
            };
            warn!("Plugin {} failed: {}", name, error);
            document.error = Some(error);
        } else {
            debug!(
                "Plugin {} produced {} section(s)",
                name,
                document.sections.len()
            );
        }
        document
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "no message available".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coerce::{AnalysisObject, SourceValue};
    use crate::engine::{NoProgress, Plugin, PluginRegistry};
    use crate::models::{AttributeValue, ColumnHeader, Value};
    use crate::session::context::tests::MemoryImage;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{mpsc, Mutex};
    use std::thread;
    use std::time::Duration;

    struct FakeOpener {
        opens: AtomicUsize,
        failures_left: AtomicUsize,
        base_pointer: Option<u64>,
    }

    impl FakeOpener {
        fn new() -> Self {
            Self {
                opens: AtomicUsize::new(0),
                failures_left: AtomicUsize::new(0),
                base_pointer: Some(0x187000),
            }
        }

        fn failing(times: usize) -> Self {
            let opener = Self::new();
            opener.failures_left.store(times, Ordering::SeqCst);
            opener
        }
    }

    impl ImageOpener for FakeOpener {
        fn open(&self, _device: &DeviceDescriptor) -> Result<Box<dyn ImageHandle>, EngineError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(EngineError::Other("device busy".to_string()));
            }
            Ok(Box::new(MemoryImage {
                data: vec![0; 64],
                base_pointer: self.base_pointer,
            }))
        }
    }

    #[derive(Debug)]
    struct ProcessRef {
        offset: u64,
        pid: u32,
    }

    impl AnalysisObject for ProcessRef {
        fn type_name(&self) -> &str {
            "_EPROCESS"
        }

        fn object_name(&self) -> &str {
            "process"
        }

        fn offset(&self) -> u64 {
            self.offset
        }

        fn address_space(&self) -> String {
            "AMD64PagedMemory".to_string()
        }

        fn to_integer(&self) -> Option<i128> {
            Some(i128::from(self.offset))
        }

        fn render(&self) -> Option<String> {
            Some(format!("{:#x}", self.pid))
        }
    }

    impl SourceValue for ProcessRef {
        fn as_object(&self) -> Option<&dyn AnalysisObject> {
            Some(self)
        }
    }

    fn pslist_columns() -> Vec<ColumnHeader> {
        vec![
            ColumnHeader::new("Offset(V)", "offset_v", "[addrpad]"),
            ColumnHeader::new("Name", "file_name", "20s"),
            ColumnHeader::new("PID", "pid", ">6"),
        ]
    }

    struct PsList;

    impl Plugin for PsList {
        fn name(&self) -> &str {
            "pslist"
        }

        fn render(
            &self,
            _context: &mut AnalysisContext,
            out: &mut ResultBuilder,
            progress: &dyn ProgressSink,
        ) -> Result<(), EngineError> {
            out.set_table_header(pslist_columns());
            for (offset, name, pid) in [(0xfa80_0000u64, "System", 4u32), (0xfa80_1000, "smss.exe", 256)] {
                progress.report("walking process list");
                out.add_row(&[&ProcessRef { offset, pid }, &name, &pid]);
            }
            Ok(())
        }
    }

    struct Failing;

    impl Plugin for Failing {
        fn name(&self) -> &str {
            "A"
        }

        fn render(
            &self,
            _context: &mut AnalysisContext,
            out: &mut ResultBuilder,
            _progress: &dyn ProgressSink,
        ) -> Result<(), EngineError> {
            out.write("partial output");
            Err(EngineError::Other("invalid DTB".to_string()))
        }
    }

    struct Panicking;

    impl Plugin for Panicking {
        fn name(&self) -> &str {
            "boom"
        }

        fn render(
            &self,
            _context: &mut AnalysisContext,
            _out: &mut ResultBuilder,
            _progress: &dyn ProgressSink,
        ) -> Result<(), EngineError> {
            panic!("index out of range");
        }
    }

    struct Silent;

    impl Plugin for Silent {
        fn name(&self) -> &str {
            "silent"
        }

        fn render(
            &self,
            _context: &mut AnalysisContext,
            _out: &mut ResultBuilder,
            _progress: &dyn ProgressSink,
        ) -> Result<(), EngineError> {
            Err(EngineError::Other(String::new()))
        }
    }

    struct Banner;

    impl Plugin for Banner {
        fn name(&self) -> &str {
            "B"
        }

        fn render(
            &self,
            context: &mut AnalysisContext,
            out: &mut ResultBuilder,
            _progress: &dyn ProgressSink,
        ) -> Result<(), EngineError> {
            out.write_text("Profile: {0}", &[&context.profile()]);
            out.write_text("Base: {0}", &[&context.base_pointer()]);
            out.write_text("pid: {0}", &[&context.attribute("pid")]);
            context.set_attribute("runs", AttributeValue::Integer(1));
            Ok(())
        }
    }

    enum Guess {
        Unsupported,
        Fixed(&'static str),
        Fail,
        Panic,
    }

    struct FakeEngine {
        registry: PluginRegistry,
        guess: Guess,
    }

    impl FakeEngine {
        fn new(guess: Guess) -> Self {
            let mut registry = PluginRegistry::new();
            registry.register(Box::new(PsList));
            registry.register(Box::new(Failing));
            registry.register(Box::new(Panicking));
            registry.register(Box::new(Silent));
            registry.register(Box::new(Banner));
            Self { registry, guess }
        }

        fn with_plugin(mut self, plugin: Box<dyn Plugin>) -> Self {
            self.registry.register(plugin);
            self
        }
    }

    /// Signals that it started, then waits to be released.
    struct Hold {
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl Plugin for Hold {
        fn name(&self) -> &str {
            "hold"
        }

        fn render(
            &self,
            _context: &mut AnalysisContext,
            out: &mut ResultBuilder,
            _progress: &dyn ProgressSink,
        ) -> Result<(), EngineError> {
            let _ = self.started.lock().unwrap().send(());
            self.release
                .lock()
                .unwrap()
                .recv_timeout(Duration::from_secs(5))
                .map_err(|_| EngineError::Other("never released".to_string()))?;
            out.write("released");
            Ok(())
        }
    }

    impl AnalysisEngine for FakeEngine {
        fn plugin(&self, name: &str) -> Option<&dyn Plugin> {
            self.registry.get(name)
        }

        fn plugin_names(&self) -> Vec<&str> {
            self.registry.names()
        }

        fn guess_profile(
            &self,
            _image: &dyn ImageHandle,
            progress: &dyn ProgressSink,
        ) -> Result<Option<String>, EngineError> {
            progress.report("guessing profile");
            match self.guess {
                Guess::Unsupported => Err(EngineError::Unsupported("profile detection")),
                Guess::Fixed(profile) => Ok(Some(profile.to_string())),
                Guess::Fail => Err(EngineError::Other("no KDBG found".to_string())),
                Guess::Panic => panic!("scanner crashed"),
            }
        }
    }

    fn runner_with(opener: Arc<FakeOpener>, guess: Guess) -> PluginRunner {
        PluginRunner::new(
            RunnerConfig::default(),
            Arc::new(ContextCache::new(4)),
            opener,
            Arc::new(FakeEngine::new(guess)),
        )
    }

    fn request(target: &str, plugins: &[&str]) -> PluginRequest {
        PluginRequest {
            device: DeviceDescriptor::new(target),
            plugins: plugins.iter().map(|p| p.to_string()).collect(),
            attributes: BTreeMap::new(),
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl ProgressSink) {
        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let messages = messages.clone();
            move |message: &str| messages.lock().unwrap().push(message.to_string())
        };
        (messages, sink)
    }

    #[test]
    fn test_end_to_end_pslist() {
        let opener = Arc::new(FakeOpener::new());
        let runner = runner_with(opener.clone(), Guess::Unsupported);

        let documents = runner.run(&request("img1", &["pslist"]), &NoProgress).unwrap();

        assert_eq!(opener.opens.load(Ordering::SeqCst), 1);
        assert!(runner.cache().contains("img1"));
        assert_eq!(documents.len(), 1);

        let document = &documents[0];
        assert_eq!(document.plugin_name.as_deref(), Some("pslist"));
        assert!(document.error.is_none());

        let table = document.tables().next().expect("pslist emits a table");
        assert_eq!(table.headers, pslist_columns());
        assert_eq!(table.rows.len(), 2);
        assert!(matches!(table.rows[0][0], Value::TypedObject { .. }));
        assert_eq!(table.rows[0][0].string_value(), Some("0x4"));
        assert_eq!(table.rows[0][1].string_value(), Some("System"));
        assert_eq!(table.rows[0][2], Value::Integer { integer_value: 4 });
    }

    #[test]
    fn test_failure_does_not_stop_batch() {
        let runner = runner_with(Arc::new(FakeOpener::new()), Guess::Unsupported);

        let documents = runner.run(&request("img1", &["A", "B"]), &NoProgress).unwrap();

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].plugin_name.as_deref(), Some("A"));
        assert_eq!(documents[0].error.as_deref(), Some("invalid DTB"));
        // Output written before the failure is kept.
        assert_eq!(documents[0].sections.len(), 1);
        assert_eq!(documents[1].plugin_name.as_deref(), Some("B"));
        assert!(documents[1].error.is_none());
    }

    #[test]
    fn test_panicking_plugin_is_isolated() {
        let runner = runner_with(Arc::new(FakeOpener::new()), Guess::Unsupported);

        let documents = runner
            .run(&request("img1", &["boom", "pslist"]), &NoProgress)
            .unwrap();

        let error = documents[0].error.as_deref().unwrap();
        assert!(error.contains("index out of range"), "got: {}", error);
        assert!(documents[1].is_ok());

        // The context survives the panic and stays usable.
        let again = runner.run(&request("img1", &["pslist"]), &NoProgress).unwrap();
        assert!(again[0].is_ok());
    }

    #[test]
    fn test_unknown_plugin_recorded_as_error() {
        let runner = runner_with(Arc::new(FakeOpener::new()), Guess::Unsupported);

        let documents = runner
            .run(&request("img1", &["psxview", "pslist"]), &NoProgress)
            .unwrap();

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].plugin_name.as_deref(), Some("psxview"));
        assert!(documents[0].error.as_deref().unwrap().contains("psxview"));
        assert!(documents[0].sections.is_empty());
        assert!(documents[1].is_ok());
    }

    #[test]
    fn test_empty_error_message_is_replaced() {
        let runner = runner_with(Arc::new(FakeOpener::new()), Guess::Unsupported);

        let documents = runner.run(&request("img1", &["silent"]), &NoProgress).unwrap();
        let error = documents[0].error.as_deref().unwrap();
        assert!(!error.is_empty());
        assert!(!documents[0].is_ok());
    }

    #[test]
    fn test_heartbeat_before_every_plugin() {
        let runner = runner_with(Arc::new(FakeOpener::new()), Guess::Unsupported);
        let (messages, sink) = recorder();

        runner
            .run(&request("img1", &["A", "boom", "psxview", "B"]), &sink)
            .unwrap();

        let messages = messages.lock().unwrap();
        let plugin_beats: Vec<_> = messages
            .iter()
            .filter(|m| m.starts_with("Running plugin "))
            .cloned()
            .collect();
        assert_eq!(
            plugin_beats,
            vec![
                "Running plugin A",
                "Running plugin boom",
                "Running plugin psxview",
                "Running plugin B"
            ]
        );
    }

    #[test]
    fn test_heartbeat_reaches_plugin_internals() {
        let runner = runner_with(Arc::new(FakeOpener::new()), Guess::Unsupported);
        let (messages, sink) = recorder();

        runner.run(&request("img1", &["pslist"]), &sink).unwrap();

        let messages = messages.lock().unwrap();
        assert_eq!(
            messages.iter().filter(|m| *m == "walking process list").count(),
            2
        );
    }

    #[test]
    fn test_context_reused_across_runs() {
        let opener = Arc::new(FakeOpener::new());
        let runner = runner_with(opener.clone(), Guess::Unsupported);

        runner.run(&request("img1", &["B"]), &NoProgress).unwrap();
        runner.run(&request("img1", &["B"]), &NoProgress).unwrap();
        runner.run(&request("img2", &["B"]), &NoProgress).unwrap();

        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
        assert_eq!(runner.cache().len(), 2);
    }

    #[test]
    fn test_attributes_applied_and_persisted() {
        let runner = runner_with(Arc::new(FakeOpener::new()), Guess::Unsupported);

        let mut with_pid = request("img1", &["B"]);
        with_pid
            .attributes
            .insert("pid".to_string(), AttributeValue::Integer(4));
        let documents = runner.run(&with_pid, &NoProgress).unwrap();

        let entries = &documents[0].sections[0].as_text().unwrap().entries;
        assert_eq!(entries[2].args, vec![Value::Integer { integer_value: 4 }]);

        // A later request without attributes still sees them.
        let documents = runner.run(&request("img1", &["B"]), &NoProgress).unwrap();
        let entries = &documents[0].sections[0].as_text().unwrap().entries;
        assert_eq!(entries[2].args, vec![Value::Integer { integer_value: 4 }]);
    }

    #[test]
    fn test_context_construction_failure_is_surfaced_and_retried() {
        let opener = Arc::new(FakeOpener::failing(1));
        let runner = runner_with(opener.clone(), Guess::Unsupported);

        let first = runner.run(&request("img1", &["pslist"]), &NoProgress);
        match first {
            Err(ContextError::Open { target, reason }) => {
                assert_eq!(target, "img1");
                assert!(reason.contains("device busy"));
            }
            other => panic!("expected open failure, got {:?}", other),
        }
        assert!(!runner.cache().contains("img1"));

        let second = runner.run(&request("img1", &["pslist"]), &NoProgress).unwrap();
        assert!(second[0].is_ok());
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
    }

    fn profile_after(guess: Guess, detect: bool) -> String {
        let runner = PluginRunner::new(
            RunnerConfig {
                default_profile: "WinXPSP2x86".to_string(),
                detect_profile: detect,
            },
            Arc::new(ContextCache::new(1)),
            Arc::new(FakeOpener::new()),
            Arc::new(FakeEngine::new(guess)),
        );
        let documents = runner.run(&request("img1", &["B"]), &NoProgress).unwrap();
        let entries = &documents[0].sections[0].as_text().unwrap().entries;
        entries[0].args[0].string_value().unwrap().to_string()
    }

    #[test]
    fn test_profile_detection_and_fallback() {
        assert_eq!(profile_after(Guess::Fixed("Win10x64"), true), "Win10x64");
        assert_eq!(profile_after(Guess::Fixed("Win10x64"), false), "WinXPSP2x86");
        assert_eq!(profile_after(Guess::Unsupported, true), "WinXPSP2x86");
        assert_eq!(profile_after(Guess::Fail, true), "WinXPSP2x86");
        assert_eq!(profile_after(Guess::Panic, true), "WinXPSP2x86");
        assert_eq!(profile_after(Guess::Fixed(""), true), "WinXPSP2x86");
    }

    #[test]
    fn test_base_pointer_recorded() {
        let runner = runner_with(Arc::new(FakeOpener::new()), Guess::Unsupported);
        let documents = runner.run(&request("img1", &["B"]), &NoProgress).unwrap();

        let entries = &documents[0].sections[0].as_text().unwrap().entries;
        assert_eq!(
            entries[1].args,
            vec![Value::Integer {
                integer_value: 0x187000
            }]
        );
    }

    #[test]
    fn test_streaming_emits_in_order() {
        let runner = runner_with(Arc::new(FakeOpener::new()), Guess::Unsupported);
        let mut names = Vec::new();

        let sent = runner
            .run_streaming(&request("img1", &["B", "A", "pslist"]), &NoProgress, |d| {
                names.push(d.plugin_name.unwrap_or_default())
            })
            .unwrap();

        assert_eq!(sent, 3);
        assert_eq!(names, vec!["B", "A", "pslist"]);
    }

    #[test]
    fn test_batch_on_one_target_does_not_block_another() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let engine = FakeEngine::new(Guess::Unsupported).with_plugin(Box::new(Hold {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        }));
        let runner = Arc::new(PluginRunner::new(
            RunnerConfig::default(),
            Arc::new(ContextCache::new(4)),
            Arc::new(FakeOpener::new()),
            Arc::new(engine),
        ));

        let held = {
            let runner = runner.clone();
            thread::spawn(move || runner.run(&request("imgA", &["hold"]), &NoProgress))
        };

        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        // imgA's context is locked by the running batch; imgB must still run.
        let other = runner.run(&request("imgB", &["pslist"]), &NoProgress).unwrap();
        assert!(other[0].is_ok());

        release_tx.send(()).unwrap();
        let held = held.join().unwrap().unwrap();
        assert!(held[0].is_ok(), "hold plugin timed out: {:?}", held[0].error);
    }

    #[test]
    fn test_eviction_waits_for_batch_to_release_context() {
        let opener = Arc::new(FakeOpener::new());
        let runner = PluginRunner::new(
            RunnerConfig::default(),
            Arc::new(ContextCache::new(1)),
            opener.clone(),
            Arc::new(FakeEngine::new(Guess::Unsupported)),
        );

        runner.run(&request("img1", &["B"]), &NoProgress).unwrap();
        runner.run(&request("img2", &["B"]), &NoProgress).unwrap();

        assert_eq!(runner.cache().len(), 1);
        assert!(runner.cache().contains("img2"));
        assert_eq!(opener.opens.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panic_message_payloads() {
        let from_str: Box<dyn Any + Send> = Box::new("static message");
        let from_string: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        let other: Box<dyn Any + Send> = Box::new(42u8);

        assert_eq!(panic_message(from_str.as_ref()), "static message");
        assert_eq!(panic_message(from_string.as_ref()), "owned message");
        assert_eq!(panic_message(other.as_ref()), "no message available");
    }
}

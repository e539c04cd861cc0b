//! memrelay - memory-analysis plugin runner
//!
//! Runs a batch of analysis plugins against one target image and writes
//! one structured result document per plugin.
//!
//! Exit codes:
//!   0 - Success (or plugin errors without --strict)
//!   1 - Runtime error (bad arguments, config, unreadable target, etc.)
//!   2 - At least one plugin reported an error and --strict was set
//!   3 - The watchdog aborted a batch that stopped reporting progress

use anyhow::{bail, Context, Result};
use memrelay::agent::{self, Heartbeat, PluginRunner, RunnerConfig, SpinnerProgress};
use memrelay::cli::{Args, OutputFormat};
use memrelay::config::{Config, CONFIG_FILE};
use memrelay::engine::raw::{FileImageOpener, RawImageEngine};
use memrelay::models::{DeviceDescriptor, PluginRequest, ReportMetadata, ResultDocument};
use memrelay::report;
use memrelay::session::ContextCache;
use std::collections::BTreeMap;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle standalone actions early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }
    if args.list_plugins {
        handle_list_plugins();
        return Ok(());
    }

    // Configuration decides the default verbosity, so load it first and
    // report where it came from once logging is up.
    let (mut config, origin) = match load_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    init_logging(&args, &config);

    info!("memrelay v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    origin.log();

    match run_request(&args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .memrelay.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize cache size, profile and watchdog.");
    Ok(())
}

/// Handle --list-plugins: print the built-in engine's plugins.
fn handle_list_plugins() {
    let engine = RawImageEngine::new();
    for plugin in engine.plugins() {
        println!("{:<12} {}", plugin.name(), plugin.description());
    }
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args, config: &Config) {
    let level = if config.general.verbose && !args.quiet {
        tracing::Level::DEBUG
    } else {
        args.log_level()
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Where the configuration came from.
enum ConfigOrigin {
    File(PathBuf),
    Defaults,
    BrokenDefault(anyhow::Error),
}

impl ConfigOrigin {
    fn log(&self) {
        match self {
            ConfigOrigin::File(path) => info!("Loaded config from {}", path.display()),
            ConfigOrigin::Defaults => debug!("No config file found, using defaults"),
            ConfigOrigin::BrokenDefault(e) => warn!("Failed to load config: {:#}", e),
        }
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, ConfigOrigin)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, ConfigOrigin::File(config_path.clone())));
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok((config, ConfigOrigin::File(PathBuf::from(CONFIG_FILE)))),
        Ok(None) => Ok((Config::default(), ConfigOrigin::Defaults)),
        Err(e) => Ok((Config::default(), ConfigOrigin::BrokenDefault(e))),
    }
}

/// Assemble the request from --request and/or the command line.
///
/// Plugins and attributes given on the command line are appended to those
/// of the request file.
fn build_request(args: &Args) -> Result<PluginRequest> {
    let mut request = match args.request {
        Some(ref path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read request file: {}", path.display()))?;
            serde_json::from_str::<PluginRequest>(&content)
                .with_context(|| format!("Failed to parse request file: {}", path.display()))?
        }
        None => PluginRequest {
            device: DeviceDescriptor::new(args.device.clone().unwrap_or_default()),
            plugins: Vec::new(),
            attributes: BTreeMap::new(),
        },
    };

    request.plugins.extend(args.plugins.iter().cloned());
    request.attributes.extend(args.attributes());

    if request.device.path.trim().is_empty() {
        bail!("Request has no device path");
    }
    if request.plugins.is_empty() {
        bail!("Request names no plugins");
    }

    Ok(request)
}

/// Open the output destination; "-" is stdout.
fn open_output(output: &str) -> Result<Box<dyn Write + Send>> {
    if output == "-" {
        return Ok(Box::new(io::stdout()));
    }
    let file = std::fs::File::create(output)
        .with_context(|| format!("Failed to create output file: {}", output))?;
    Ok(Box::new(BufWriter::new(file)))
}

fn write_json_line(out: &mut dyn Write, document: &ResultDocument) -> Result<()> {
    let line = report::generate_json_document(document)?;
    writeln!(out, "{}", line)?;
    out.flush()?;
    Ok(())
}

/// Render the whole batch for formats written after the run.
///
/// Streamed JSON lines have already been written, so `Json` yields nothing.
fn render_report(
    format: OutputFormat,
    metadata: &ReportMetadata,
    documents: &[ResultDocument],
) -> Result<Option<String>> {
    match format {
        OutputFormat::Json => Ok(None),
        OutputFormat::JsonArray => {
            let mut json = report::generate_json_report(documents)?;
            json.push('\n');
            Ok(Some(json))
        }
        OutputFormat::Markdown => Ok(Some(report::generate_markdown_report(metadata, documents))),
    }
}

/// Run the batch. Returns exit code (0, 2 or 3).
async fn run_request(args: &Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    let request = build_request(args)?;
    let target = request.device.path.clone();
    info!(
        "Target: {} | Plugins: {}",
        target,
        request.plugins.join(", ")
    );

    let runner = PluginRunner::new(
        RunnerConfig::from(&config),
        Arc::new(ContextCache::new(config.cache.capacity)),
        Arc::new(FileImageOpener),
        Arc::new(RawImageEngine::new()),
    );

    let heartbeat = Heartbeat::new();
    let progress = if args.quiet {
        SpinnerProgress::hidden(heartbeat.clone())
    } else {
        SpinnerProgress::new(heartbeat.clone())
    };

    // JSON lines are streamed as each plugin finishes.
    let mut stream = match args.format {
        OutputFormat::Json => Some(open_output(&config.general.output)?),
        OutputFormat::JsonArray | OutputFormat::Markdown => None,
    };

    let batch = tokio::task::spawn_blocking(move || -> Result<Vec<ResultDocument>> {
        let mut documents = Vec::new();
        let mut write_error = None;

        runner.run_streaming(&request, &progress, |document| {
            if write_error.is_none() {
                if let Some(out) = stream.as_mut() {
                    if let Err(e) = write_json_line(out.as_mut(), &document) {
                        write_error = Some(e);
                    }
                }
            }
            documents.push(document);
        })?;
        progress.finish("Done");

        match write_error {
            Some(e) => Err(e.context("Failed to write result document")),
            None => Ok(documents),
        }
    });

    let joined = if config.watchdog.enabled {
        let timeout = Duration::from_secs(config.watchdog.timeout_seconds);
        tokio::select! {
            joined = batch => joined,
            idle = agent::watch(heartbeat.clone(), timeout) => {
                error!("No progress for {:.0}s, aborting batch", idle.as_secs_f64());
                eprintln!(
                    "\n⛔ Plugins stopped reporting progress for {:.0}s (exit code 3).",
                    idle.as_secs_f64()
                );
                return Ok(3);
            }
        }
    } else {
        batch.await
    };
    let documents = joined.context("Plugin batch task failed")??;

    let duration = start_time.elapsed().as_secs_f64();
    let metadata = ReportMetadata::from_documents(&target, &documents, duration);

    if let Some(rendered) = render_report(args.format, &metadata, &documents)? {
        let mut out = open_output(&config.general.output)?;
        out.write_all(rendered.as_bytes())
            .and_then(|_| out.flush())
            .context("Failed to write report")?;
    }

    if !args.quiet {
        eprintln!("\n📊 Batch Summary:");
        eprintln!("   Target: {}", metadata.target);
        eprintln!(
            "   Plugins: {} run | {} failed",
            metadata.plugins_requested, metadata.plugins_failed
        );
        eprintln!("   Heartbeats: {}", heartbeat.count());
        eprintln!("   Duration: {:.1}s", duration);
    }

    if args.strict && metadata.plugins_failed > 0 {
        eprintln!(
            "\n⛔ {} plugin(s) reported errors. Failing (exit code 2).",
            metadata.plugins_failed
        );
        return Ok(2);
    }

    Ok(0)
}

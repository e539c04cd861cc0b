//! Liveness tracking for long plugin runs.
//!
//! Plugins report progress through a [`ProgressSink`]. The binary's sink
//! stamps a [`Heartbeat`]; [`watch`] resolves once no stamp has arrived
//! within the allowed idle time.

use crate::engine::ProgressSink;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct Beats {
    origin: Instant,
    /// Milliseconds since `origin` at the last beat.
    last_ms: AtomicU64,
    count: AtomicU64,
}

/// Shared last-beat timestamp. Clones stamp the same heartbeat.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    beats: Arc<Beats>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            beats: Arc::new(Beats {
                origin: Instant::now(),
                last_ms: AtomicU64::new(0),
                count: AtomicU64::new(0),
            }),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.beats.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn beat(&self) {
        self.beats.last_ms.fetch_max(self.now_ms(), Ordering::Relaxed);
        self.beats.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Time since the last beat (or since creation).
    pub fn idle(&self) -> Duration {
        let last = self.beats.last_ms.load(Ordering::Relaxed);
        Duration::from_millis(self.now_ms().saturating_sub(last))
    }

    pub fn count(&self) -> u64 {
        self.beats.count.load(Ordering::Relaxed)
    }
}

impl ProgressSink for Heartbeat {
    fn report(&self, _message: &str) {
        self.beat();
    }
}

/// Resolve with the idle duration once `heartbeat` has been silent for
/// `timeout`. Never resolves while beats keep arriving.
pub async fn watch(heartbeat: Heartbeat, timeout: Duration) -> Duration {
    let poll = (timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(1));
    loop {
        let idle = heartbeat.idle();
        if idle >= timeout {
            debug!("No heartbeat for {:?}", idle);
            return idle;
        }
        tokio::time::sleep(poll.min(timeout - idle)).await;
    }
}

/// Progress sink that drives a terminal spinner and stamps a heartbeat.
#[derive(Debug)]
pub struct SpinnerProgress {
    bar: Option<ProgressBar>,
    heartbeat: Heartbeat,
}

impl SpinnerProgress {
    pub fn new(heartbeat: Heartbeat) -> Self {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Self {
            bar: Some(bar),
            heartbeat,
        }
    }

    /// A sink that only stamps the heartbeat (quiet mode).
    pub fn hidden(heartbeat: Heartbeat) -> Self {
        Self {
            bar: None,
            heartbeat,
        }
    }

    pub fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }

    pub fn finish(&self, message: &str) {
        if let Some(ref bar) = self.bar {
            bar.finish_with_message(message.to_string());
        }
    }
}

impl ProgressSink for SpinnerProgress {
    fn report(&self, message: &str) {
        self.heartbeat.beat();
        if let Some(ref bar) = self.bar {
            bar.set_message(message.to_string());
        }
    }
}

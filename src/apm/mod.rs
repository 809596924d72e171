//! Application performance monitoring — request timing and the harvest loop.
//!
//! [`HttpTimer`] accumulates request durations without locks; the timing
//! middleware feeds it. [`Agent`] owns the timer and periodically harvests a
//! [`TimerSnapshot`] from it, which is where a collector backend would pick
//! the numbers up.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::ConfigError;

/// Lock-free aggregate of request durations: count, total, min and max.
#[derive(Debug)]
pub struct HttpTimer {
    count: AtomicU64,
    total_ns: AtomicU64,
    min_ns: AtomicU64,
    max_ns: AtomicU64,
}

impl Default for HttpTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTimer {
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            total_ns: AtomicU64::new(0),
            min_ns: AtomicU64::new(u64::MAX),
            max_ns: AtomicU64::new(0),
        }
    }

    /// Records one sample.
    pub fn update(&self, elapsed: Duration) {
        let ns = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_ns.fetch_add(ns, Ordering::Relaxed);
        self.min_ns.fetch_min(ns, Ordering::Relaxed);
        self.max_ns.fetch_max(ns, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Release);
    }

    /// Records the time elapsed since `start`.
    pub fn update_since(&self, start: Instant) {
        self.update(start.elapsed());
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    /// Point-in-time view. Fields are read independently, so a snapshot
    /// taken while samples land may be off by the in-flight ones.
    pub fn snapshot(&self) -> TimerSnapshot {
        let count = self.count();
        let min_ns = self.min_ns.load(Ordering::Relaxed);
        TimerSnapshot {
            count,
            total: Duration::from_nanos(self.total_ns.load(Ordering::Relaxed)),
            min: if count == 0 || min_ns == u64::MAX {
                Duration::ZERO
            } else {
                Duration::from_nanos(min_ns)
            },
            max: Duration::from_nanos(self.max_ns.load(Ordering::Relaxed)),
        }
    }
}

/// Harvested timer figures. Durations serialize as fractional milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimerSnapshot {
    pub count: u64,
    #[serde(serialize_with = "as_millis")]
    pub total: Duration,
    #[serde(serialize_with = "as_millis")]
    pub min: Duration,
    #[serde(serialize_with = "as_millis")]
    pub max: Duration,
}

impl TimerSnapshot {
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        let mean_ns = self.total.as_nanos() / u128::from(self.count);
        Duration::from_nanos(u64::try_from(mean_ns).unwrap_or(u64::MAX))
    }
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_nanos() as f64 / 1e6)
}

/// APM agent: identifies the application and harvests its [`HttpTimer`].
#[derive(Debug, Clone)]
pub struct Agent {
    app_name: String,
    license_hint: String,
    verbose: bool,
    timer: Arc<HttpTimer>,
}

impl Agent {
    /// # Errors
    ///
    /// [`ConfigError::MissingCredential`] when `license` is empty.
    pub fn new(
        license: &str,
        app_name: impl Into<String>,
        verbose: bool,
    ) -> Result<Self, ConfigError> {
        let license = license.trim();
        if license.is_empty() {
            return Err(ConfigError::MissingCredential {
                name: "NEWRELIC_LICENSE_KEY",
            });
        }

        let tail = license
            .char_indices()
            .rev()
            .nth(3)
            .map_or(license, |(i, _)| &license[i..]);

        Ok(Self {
            app_name: app_name.into(),
            license_hint: format!("…{tail}"),
            verbose,
            timer: Arc::new(HttpTimer::new()),
        })
    }

    /// Shared handle for [`TimingMiddleware`](crate::middleware::TimingMiddleware).
    pub fn timer(&self) -> Arc<HttpTimer> {
        Arc::clone(&self.timer)
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    /// Takes a snapshot and logs it.
    pub fn harvest(&self) -> TimerSnapshot {
        let snapshot = self.timer.snapshot();
        tracing::info!(
            app = %self.app_name,
            requests = snapshot.count,
            mean = ?snapshot.mean(),
            max = ?snapshot.max,
            "apm harvest"
        );
        if self.verbose {
            match serde_json::to_string(&snapshot) {
                Ok(json) => tracing::debug!(app = %self.app_name, snapshot = %json, "apm harvest detail"),
                Err(e) => tracing::warn!(error = %e, "failed to encode apm snapshot"),
            }
        }
        snapshot
    }

    /// Spawns the harvest loop. The first harvest happens one `interval`
    /// after the call; the loop runs until the returned task is aborted.
    pub fn run(&self, interval: Duration) -> JoinHandle<()> {
        let agent = self.clone();
        tracing::info!(
            app = %agent.app_name,
            license = %agent.license_hint,
            ?interval,
            "apm agent started"
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                agent.harvest();
            }
        })
    }
}

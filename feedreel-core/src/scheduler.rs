use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use tracing::{error, info};

use crate::config::{load_run_config, ConfigOrigin, RunConfig};
use crate::pipeline::BatchRunner;

pub const DEFAULT_TICK: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Running,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerSummary {
    pub runs: u64,
    pub channels_succeeded: u64,
    pub channels_failed: u64,
}

/// Runs a batch immediately, then again whenever `run_interval_minutes` has
/// elapsed since the previous batch *started*. The configuration file is
/// re-read before every batch.
pub struct Scheduler<R> {
    runner: R,
    config_path: PathBuf,
    tick: Duration,
    state: SchedulerState,
    last_started: Option<Instant>,
    interval: Duration,
}

impl<R: BatchRunner> Scheduler<R> {
    pub fn new(runner: R, config_path: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            config_path: config_path.into(),
            tick: DEFAULT_TICK,
            state: SchedulerState::Idle,
            last_started: None,
            interval: RunConfig::default().run_interval(),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    fn is_due(&self) -> bool {
        match self.last_started {
            None => true,
            Some(started) => started.elapsed() >= self.interval,
        }
    }

    fn reload_config(&self) -> RunConfig {
        match load_run_config(&self.config_path) {
            Ok(loaded) => {
                if let ConfigOrigin::FallbackDefault(reason) = &loaded.origin {
                    error!(path = %self.config_path.display(), %reason, "running with default configuration");
                }
                loaded.config
            }
            Err(err) => {
                error!(path = %self.config_path.display(), error = %err, "failed to load configuration, running with defaults");
                RunConfig::default()
            }
        }
    }

    /// Loops until `shutdown` resolves. `shutdown` is polled once before the
    /// first batch so signal listeners are registered up front. A batch in
    /// progress finishes its current channel and skips the rest.
    pub async fn run_until<F>(&mut self, shutdown: F) -> SchedulerSummary
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let mut shutdown = Box::pin(shutdown);
        let watcher = if (&mut shutdown).now_or_never().is_some() {
            let _ = stop_tx.send(true);
            None
        } else {
            Some(tokio::spawn(async move {
                shutdown.await;
                let _ = stop_tx.send(true);
            }))
        };

        let mut summary = SchedulerSummary::default();
        info!(
            config = %self.config_path.display(),
            tick_secs = self.tick.as_secs_f64(),
            "scheduler started"
        );

        loop {
            if *stop_rx.borrow() {
                break;
            }
            if self.is_due() {
                let config = self.reload_config();
                self.interval = config.run_interval();
                self.last_started = Some(Instant::now());
                self.state = SchedulerState::Running;

                let report = self.runner.run_batch(&config, &stop_rx).await;

                self.state = SchedulerState::Idle;
                summary.runs += 1;
                summary.channels_succeeded += report.succeeded() as u64;
                summary.channels_failed += report.failed() as u64;
                info!(
                    run = summary.runs,
                    stamp = %report.stamp,
                    succeeded = report.succeeded(),
                    failed = report.failed(),
                    next_in_secs = self.interval.as_secs(),
                    "scheduled batch finished"
                );
                continue;
            }

            tokio::select! {
                biased;
                changed = stop_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = sleep(self.tick) => {}
            }
        }

        if let Some(watcher) = watcher {
            watcher.abort();
        }
        info!(runs = summary.runs, "scheduler stopped");
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::BatchReport;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    struct CountingRunner {
        starts: Arc<Mutex<Vec<Instant>>>,
    }

    #[async_trait]
    impl BatchRunner for CountingRunner {
        async fn run_batch(
            &self,
            _config: &RunConfig,
            _shutdown: &watch::Receiver<bool>,
        ) -> BatchReport {
            self.starts.lock().unwrap().push(Instant::now());
            BatchReport {
                stamp: "20240101_000000".into(),
                started_at: Utc::now(),
                finished_at: Utc::now(),
                channels: Vec::new(),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_on_interval_boundaries() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("feedreel.toml");
        std::fs::write(&config_path, "run_interval_minutes = 1\n").unwrap();

        let starts = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(
            CountingRunner {
                starts: Arc::clone(&starts),
            },
            &config_path,
        )
        .with_tick(Duration::from_secs(10));

        let origin = Instant::now();
        let summary = scheduler
            .run_until(sleep(Duration::from_secs(150)))
            .await;

        assert_eq!(summary.runs, 3);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        let offsets: Vec<u64> = starts
            .lock()
            .unwrap()
            .iter()
            .map(|at| at.duration_since(origin).as_secs())
            .collect();
        assert_eq!(offsets, vec![0, 60, 120]);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_config_file_is_created_before_first_run() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("nested").join("feedreel.toml");
        let starts = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(
            CountingRunner {
                starts: Arc::clone(&starts),
            },
            &config_path,
        );

        let summary = scheduler.run_until(sleep(Duration::from_secs(1))).await;
        assert_eq!(summary.runs, 1);
        assert!(config_path.exists());
    }

    #[tokio::test(start_paused = true)]
    async fn already_resolved_shutdown_skips_every_run() {
        let dir = TempDir::new().unwrap();
        let starts = Arc::new(Mutex::new(Vec::new()));
        let mut scheduler = Scheduler::new(
            CountingRunner {
                starts: Arc::clone(&starts),
            },
            dir.path().join("feedreel.toml"),
        );

        let summary = scheduler.run_until(async {}).await;
        assert_eq!(summary.runs, 0);
        assert!(starts.lock().unwrap().is_empty());
    }
}

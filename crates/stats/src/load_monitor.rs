//! Scheduler-delay monitor.
//!
//! Ticks on a fixed interval and records how late each tick fired compared
//! to the interval it asked for. A busy runtime shows up as growing delays.
//! The last `window_size` delays are reported as
//! `load_monitor.avg_load` / `load_monitor.max_load`.

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::LoadMonitorConfig;
use crate::sampler::{SlidingWindow, Summary};
use crate::stats::{StatsMap, StatsProducer};

pub const AVG_LOAD_KEY: &str = "load_monitor.avg_load";
pub const MAX_LOAD_KEY: &str = "load_monitor.max_load";

struct MonitorState {
    window: SlidingWindow,
    last: Option<Instant>,
}

/// Timer-driven stat producer measuring scheduler delay.
pub struct LoadMonitor {
    config: LoadMonitorConfig,
    state: Mutex<MonitorState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LoadMonitor {
    #[must_use]
    pub fn new(config: LoadMonitorConfig) -> Self {
        let window = SlidingWindow::new(config.window_size);
        Self {
            config,
            state: Mutex::new(MonitorState { window, last: None }),
            task: Mutex::new(None),
        }
    }

    /// Start ticking on the current tokio runtime. No-op if already running.
    /// The tick task does not keep the monitor alive.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }

        let monitor = Arc::downgrade(self);
        let interval = self.config.interval;
        *task = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                // Gone once the last owner drops the monitor.
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.tick(Instant::now());
            }
        }));
        debug!(interval_ms = interval.as_millis() as u64, "load monitor started");
    }

    /// Stop ticking. Collected samples stay; the next start reseeds `last`.
    pub fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
            debug!("load monitor stopped");
        }
        self.state.lock().last = None;
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Process one tick captured at `now`, returning the observed delay in
    /// seconds. The first tick after a start only seeds the reference time.
    pub fn tick(&self, now: Instant) -> Option<f64> {
        let mut state = self.state.lock();
        let observed = state.last.map(|last| {
            let elapsed = now.saturating_duration_since(last).as_secs_f64();
            elapsed - self.config.interval.as_secs_f64()
        });

        if let Some(delay) = observed {
            if delay > self.config.warn_threshold.as_secs_f64() {
                warn!(delay_secs = delay, "excessive scheduler delay");
            }
            state.window.record(delay);
        }
        state.last = Some(now);
        observed
    }

    #[must_use]
    pub fn summary(&self) -> Summary {
        self.state.lock().window.summary()
    }

    #[must_use]
    pub fn sample_count(&self) -> usize {
        self.state.lock().window.len()
    }
}

impl StatsProducer for LoadMonitor {
    fn name(&self) -> &str {
        "load_monitor"
    }

    fn get_stats(&self) -> StatsMap {
        let summary = self.summary();
        let mut stats = StatsMap::new();
        stats.insert(AVG_LOAD_KEY.to_string(), json!(summary.average));
        stats.insert(MAX_LOAD_KEY.to_string(), json!(summary.maximum));
        stats
    }
}

impl Drop for LoadMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(window_size: usize) -> LoadMonitorConfig {
        LoadMonitorConfig {
            interval: Duration::from_secs(1),
            window_size,
            warn_threshold: Duration::from_secs(1),
        }
    }

    #[test]
    fn test_first_tick_only_seeds() {
        let monitor = LoadMonitor::new(config(60));
        let t0 = Instant::now();
        assert_eq!(monitor.tick(t0), None);
        assert_eq!(monitor.sample_count(), 0);
    }

    #[test]
    fn test_tick_records_excess_over_interval() {
        let monitor = LoadMonitor::new(config(60));
        let t0 = Instant::now();
        monitor.tick(t0);

        let delay = monitor.tick(t0 + Duration::from_millis(1250)).unwrap();
        assert!((delay - 0.25).abs() < 1e-9);

        let delay = monitor.tick(t0 + Duration::from_millis(4250)).unwrap();
        assert!((delay - 2.0).abs() < 1e-9);

        let summary = monitor.summary();
        assert!((summary.maximum - 2.0).abs() < 1e-9);
        assert!((summary.average - 1.125).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded() {
        let monitor = LoadMonitor::new(config(3));
        let mut now = Instant::now();
        monitor.tick(now);
        for _ in 0..10 {
            now += Duration::from_secs(1);
            monitor.tick(now);
        }
        assert_eq!(monitor.sample_count(), 3);
    }

    #[test]
    fn test_stats_keys_default_to_zero() {
        let monitor = LoadMonitor::new(config(60));
        let stats = monitor.get_stats();
        assert_eq!(stats[AVG_LOAD_KEY], json!(0.0));
        assert_eq!(stats[MAX_LOAD_KEY], json!(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_monitor_collects_samples() {
        let monitor = Arc::new(LoadMonitor::new(config(60)));
        monitor.start();
        assert!(monitor.is_running());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        // Ticks at 1s, 2s, 3s: the first only seeds.
        assert_eq!(monitor.sample_count(), 2);
        assert!(monitor.summary().maximum < 0.5);

        monitor.stop();
        assert!(!monitor.is_running());
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(monitor.sample_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_running_monitor_frees_it() {
        let monitor = Arc::new(LoadMonitor::new(config(60)));
        monitor.start();
        let weak = Arc::downgrade(&monitor);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        drop(monitor);
        assert!(weak.upgrade().is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(weak.upgrade().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_reseeds() {
        let monitor = Arc::new(LoadMonitor::new(config(60)));
        monitor.start();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        monitor.stop();
        assert_eq!(monitor.sample_count(), 1);

        tokio::time::sleep(Duration::from_secs(30)).await;
        monitor.start();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        // One seeding tick after restart; no 30s outlier recorded.
        assert_eq!(monitor.sample_count(), 1);
        monitor.start();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(monitor.sample_count(), 2);
        assert!(monitor.summary().maximum < 1.0);
    }
}

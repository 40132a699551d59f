//! Fixed-interval poll sweeps.
//!
//! Every tick takes a snapshot of the provider registry and calls
//! `get_stats` on each provider concurrently. The set polled by a sweep is
//! fixed when the sweep starts; providers that register later wait for the
//! next tick, and providers that disconnect mid-sweep just fail their call.
//! A failed call is dropped for that sweep. Sweeps run as their own tasks so
//! a slow provider never delays the next tick.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error};

use super::registry::{ProviderRecord, ProviderRegistry};
use super::sink::ResultSink;

/// Outcome counts for one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub polled: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub sink_errors: usize,
}

enum PollOutcome {
    Delivered,
    CallFailed,
    SinkFailed,
}

/// Periodic poller over a [`ProviderRegistry`].
pub struct PollScheduler {
    registry: Arc<ProviderRegistry>,
    sink: Arc<dyn ResultSink>,
    interval: Duration,
}

impl PollScheduler {
    pub fn new(registry: Arc<ProviderRegistry>, sink: Arc<dyn ResultSink>, interval: Duration) -> Self {
        Self {
            registry,
            sink,
            interval,
        }
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll every currently registered provider once and wait for all calls
    /// to settle.
    pub async fn sweep(&self) -> SweepReport {
        let records = self.registry.snapshot();
        let polled = records.len();
        let calls = records.into_iter().map(|record| self.poll_one(record));
        let outcomes = join_all(calls).await;

        let mut report = SweepReport {
            polled,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome {
                PollOutcome::Delivered => report.succeeded += 1,
                PollOutcome::CallFailed => report.failed += 1,
                PollOutcome::SinkFailed => {
                    report.succeeded += 1;
                    report.sink_errors += 1;
                }
            }
        }
        report
    }

    async fn poll_one(&self, record: ProviderRecord) -> PollOutcome {
        let report = match record.link.get_stats().await {
            Ok(report) => report,
            Err(e) => {
                debug!(
                    identity = %record.identity,
                    nickname = %record.nickname,
                    error = %e,
                    "poll failed, dropping"
                );
                return PollOutcome::CallFailed;
            }
        };

        match self
            .sink
            .got_stats(&record.identity, &record.nickname, report)
            .await
        {
            Ok(()) => PollOutcome::Delivered,
            Err(e) => {
                error!(
                    identity = %record.identity,
                    error = %e,
                    "failed to record stats"
                );
                PollOutcome::SinkFailed
            }
        }
    }

    /// Start sweeping every `interval`, beginning immediately.
    pub fn start(self: Arc<Self>) -> SchedulerHandle {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let scheduler = Arc::clone(&self);
                tokio::spawn(async move {
                    let report = scheduler.sweep().await;
                    if report.polled > 0 {
                        debug!(
                            polled = report.polled,
                            succeeded = report.succeeded,
                            failed = report.failed,
                            sink_errors = report.sink_errors,
                            "poll sweep finished"
                        );
                    }
                });
            }
        });
        SchedulerHandle { task }
    }
}

/// Running scheduler. Dropping the handle leaves the scheduler running.
#[derive(Debug)]
pub struct SchedulerHandle {
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop scheduling new sweeps. Sweeps already in flight finish normally.
    pub fn stop(self) {
        self.task.abort();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

//! One sample-evaluate-decide pass over every metric

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::MonitoredMetric;
use crate::alerting::{deliver, render_report, ExceedanceTracker, NotificationSink};
use crate::collector::{host_name, sample_with_timeout};
use crate::config::Config;
use crate::models::{
    CycleReport, ExceedanceState, MetricDescriptor, MetricReading, MetricStatus, ObserverStats,
    ObserverStatus, SampleFailure,
};

/// Run one cycle over `metrics`, updating `states` in place.
///
/// `states` is indexed like `metrics`. A metric whose sample fails or times
/// out keeps its state untouched and is listed in `CycleReport::failures`;
/// the other metrics are evaluated as usual.
pub async fn run_cycle(
    metrics: &[MonitoredMetric],
    states: &mut [ExceedanceState],
    tracker: &ExceedanceTracker,
    sample_timeout: Duration,
) -> CycleReport {
    let mut report = CycleReport {
        started_at: Some(Utc::now()),
        ..CycleReport::default()
    };

    for (metric, state) in metrics.iter().zip(states.iter_mut()) {
        let id = metric.id();

        let sampled = sample_with_timeout(metric.source.as_ref(), sample_timeout)
            .await
            .map_err(|e| e.to_string())
            .and_then(|value| {
                let reading = MetricReading::now(id, value);
                metric
                    .evaluator
                    .score(&reading)
                    .map(|score| (score, reading.timestamp))
                    .map_err(|e| e.to_string())
            });

        let (score, sampled_at) = match sampled {
            Ok(scored) => scored,
            Err(reason) => {
                warn!(metric = %id, %reason, "Sample unavailable, holding state");
                counter!("sysobserver_sample_failures_total", "metric" => id.to_string())
                    .increment(1);
                report.failures.push(SampleFailure {
                    metric_id: id.to_string(),
                    reason,
                });
                continue;
            }
        };

        let outcome = tracker.observe(state, score.level, sampled_at);

        debug!(
            metric = %id,
            value = score.value,
            score = score.score,
            level = %score.level,
            count = state.consecutive_exceed_count,
            "Metric evaluated"
        );

        if outcome.reason.is_notify() {
            report.decision.should_send = true;
            report.decision.reason = report.decision.reason.max(outcome.reason);
        }
        if outcome.suppressed {
            debug!(metric = %id, "Notification held back by cooldown");
        }
        if outcome.recovered {
            info!(metric = %id, "Metric recovered");
            report.recovered.push(id.to_string());
        }
        if score.level.is_exceeded() {
            counter!(
                "sysobserver_exceedances_total",
                "metric" => id.to_string(),
                "level" => score.level.as_str()
            )
            .increment(1);
            report.decision.metrics.push(score);
        }
    }

    report
}

/// Everything the observer loop owns
pub struct ObserverContext {
    host: String,
    interval: Duration,
    sample_timeout: Duration,
    tracker: ExceedanceTracker,
    metrics: Vec<MonitoredMetric>,
    states: Vec<ExceedanceState>,
    stats: Arc<Mutex<ObserverStats>>,
    cycle: u64,
}

impl std::fmt::Debug for ObserverContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverContext")
            .field("host", &self.host)
            .field("interval", &self.interval)
            .field("metrics", &self.metrics.len())
            .field("cycle", &self.cycle)
            .finish_non_exhaustive()
    }
}

impl ObserverContext {
    /// Create a context with fresh state for every metric
    pub fn new(
        host: impl Into<String>,
        interval: Duration,
        tracker: ExceedanceTracker,
        metrics: Vec<MonitoredMetric>,
    ) -> Self {
        let states = metrics
            .iter()
            .map(|m| ExceedanceState::new(m.id()))
            .collect();
        Self {
            host: host.into(),
            interval,
            sample_timeout: crate::config::ObserverConfig::default().sample_timeout,
            tracker,
            metrics,
            states,
            stats: Arc::new(Mutex::new(ObserverStats::default())),
            cycle: 0,
        }
    }

    /// Create a context from the `[observer]` section
    pub fn from_config(config: &Config, metrics: Vec<MonitoredMetric>) -> Self {
        let observer = &config.observer;
        let tracker = ExceedanceTracker::new(observer.repeat_limit)
            .with_cooldown(observer.notify_cooldown);
        Self::new(host_name(), observer.interval, tracker, metrics)
            .with_sample_timeout(observer.sample_timeout)
    }

    /// Bound every sample by `timeout`
    pub fn with_sample_timeout(mut self, timeout: Duration) -> Self {
        self.sample_timeout = timeout;
        self
    }

    /// Machine name used in messages
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Time between the end of one cycle and the start of the next
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Descriptors in configuration order
    pub fn descriptors(&self) -> Vec<MetricDescriptor> {
        self.metrics.iter().map(|m| m.descriptor.clone()).collect()
    }

    /// Current per-metric state
    pub fn states(&self) -> &[ExceedanceState] {
        &self.states
    }

    /// Shared lifetime counters
    pub fn stats(&self) -> Arc<Mutex<ObserverStats>> {
        Arc::clone(&self.stats)
    }

    /// Drop every streak; used when the loop is started again
    pub fn reset_states(&mut self) {
        for state in &mut self.states {
            state.reset();
        }
    }

    /// Run one cycle and account for it
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        let mut report =
            run_cycle(&self.metrics, &mut self.states, &self.tracker, self.sample_timeout).await;
        report.cycle = self.cycle;

        counter!("sysobserver_cycles_total").increment(1);
        {
            let mut stats = self.stats.lock();
            stats.cycles += 1;
            stats.sample_failures += report.failures.len() as u64;
            stats.limits_reached += report.decision.metrics.len() as u64;
            stats.recoveries += report.recovered.len() as u64;
        }

        debug!(
            cycle = report.cycle,
            should_send = report.decision.should_send,
            reason = report.decision.reason.as_str(),
            failures = report.failures.len(),
            "Cycle finished"
        );
        report
    }

    /// Render the message for `report` and account for it as sent.
    ///
    /// Returns `None` when the cycle has nothing to deliver.
    pub fn prepare_delivery(&self, report: &CycleReport, include_recovery: bool) -> Option<String> {
        if !report.wants_delivery(include_recovery) {
            return None;
        }

        let text = render_report(report, &self.host, &self.descriptors(), include_recovery);
        if text.is_empty() {
            return None;
        }

        let label = report.delivery_label();
        counter!("sysobserver_notifications_total", "reason" => label).increment(1);
        self.stats.lock().notifications_sent += 1;

        info!(
            cycle = report.cycle,
            reason = label,
            metrics = report.decision.metrics.len(),
            recovered = report.recovered.len(),
            "Sending notification"
        );
        Some(text)
    }

    /// Run `cycles` cycles back to back, without sleeping in between.
    ///
    /// When a sink is given each report is delivered before the next cycle;
    /// a failed delivery is logged and counted and the remaining cycles still run.
    pub async fn run_checks(
        &mut self,
        cycles: u32,
        sink: Option<&dyn NotificationSink>,
        include_recovery: bool,
    ) -> Vec<CycleReport> {
        let mut reports = Vec::with_capacity(cycles as usize);
        for _ in 0..cycles {
            let report = self.run_cycle().await;
            if let Some(sink) = sink {
                if let Some(text) = self.prepare_delivery(&report, include_recovery) {
                    if !deliver(sink, &text).await {
                        self.stats.lock().delivery_failures += 1;
                    }
                }
            }
            reports.push(report);
        }
        reports
    }

    /// Build a status snapshot
    pub fn status(&self, running: bool, next_cycle_in: Option<Duration>) -> ObserverStatus {
        ObserverStatus {
            running,
            host: self.host.clone(),
            interval: self.interval,
            next_cycle_in,
            metrics: self
                .metrics
                .iter()
                .zip(&self.states)
                .map(|(metric, state)| MetricStatus {
                    id: metric.descriptor.id.clone(),
                    label: metric.descriptor.label.clone(),
                    last_level: state.last_level,
                    phase: state.phase,
                    consecutive_exceed_count: state.consecutive_exceed_count,
                    last_notified_at: state.last_notified_at,
                })
                .collect(),
            stats: self.stats.lock().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{SampleError, ScriptedSource};
    use crate::alerting::NotificationError;
    use crate::models::{Level, NotifyReason, Phase, ThresholdConfig};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct FlakySink {
        attempts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl NotificationSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn send(&self, text: &str) -> std::result::Result<(), NotificationError> {
            let mut attempts = self.attempts.lock();
            attempts.push(text.to_string());
            if attempts.len() == 1 {
                Err(NotificationError::Status {
                    sink: "flaky".to_string(),
                    status: 500,
                    body: String::new(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn metric(id: &str, warn: f64, crit: f64, max: f64, script: Vec<Result<f64, SampleError>>) -> MonitoredMetric {
        MonitoredMetric::new(
            MetricDescriptor {
                id: id.to_string(),
                label: id.to_string(),
                unit: "%".to_string(),
                thresholds: ThresholdConfig::new(warn, crit, max),
            },
            Arc::new(ScriptedSource::new(id, script)),
        )
        .unwrap()
    }

    fn context(metrics: Vec<MonitoredMetric>) -> ObserverContext {
        ObserverContext::new("box", Duration::from_secs(300), ExceedanceTracker::new(3), metrics)
            .with_sample_timeout(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_quiet_cycle() {
        let mut ctx = context(vec![metric("cpu", 70.0, 90.0, 100.0, vec![Ok(10.0)])]);

        let report = ctx.run_cycle().await;

        assert_eq!(report.cycle, 1);
        assert!(!report.decision.should_send);
        assert_eq!(report.decision.reason, NotifyReason::None);
        assert!(report.decision.metrics.is_empty());
        assert_eq!(ctx.states()[0].last_level, Some(Level::Ok));
    }

    #[tokio::test]
    async fn test_crit_wins_over_repeated_warn() {
        let mut ctx = context(vec![
            metric("mem", 70.0, 90.0, 100.0, vec![Ok(75.0), Ok(75.0), Ok(75.0)]),
            metric("disk", 70.0, 90.0, 100.0, vec![Ok(10.0), Ok(10.0), Ok(95.0)]),
        ]);

        ctx.run_cycle().await;
        ctx.run_cycle().await;
        let report = ctx.run_cycle().await;

        assert!(report.decision.should_send);
        assert_eq!(report.decision.reason, NotifyReason::ImmediateCrit);
        let ids: Vec<&str> = report
            .decision
            .metrics
            .iter()
            .map(|s| s.metric_id.as_str())
            .collect();
        assert_eq!(ids, vec!["mem", "disk"]);
    }

    #[tokio::test]
    async fn test_non_ok_metrics_listed_without_notifying() {
        let mut ctx = context(vec![metric("mem", 70.0, 90.0, 100.0, vec![Ok(80.0)])]);

        let report = ctx.run_cycle().await;

        assert!(!report.decision.should_send);
        assert_eq!(report.decision.metrics.len(), 1);
        assert_eq!(report.decision.metrics[0].level, Level::Warn);
    }

    #[tokio::test]
    async fn test_failure_holds_state_and_others_continue() {
        let mut ctx = context(vec![
            metric(
                "mem",
                70.0,
                90.0,
                100.0,
                vec![
                    Ok(75.0),
                    Ok(75.0),
                    Err(SampleError::Unavailable("gone".to_string())),
                    Ok(75.0),
                ],
            ),
            metric("cpu", 70.0, 90.0, 100.0, vec![Ok(1.0); 4]),
        ]);

        ctx.run_cycle().await;
        ctx.run_cycle().await;
        let held = ctx.run_cycle().await;

        assert_eq!(held.failures.len(), 1);
        assert_eq!(held.failures[0].metric_id, "mem");
        assert!(!held.decision.should_send);
        assert_eq!(ctx.states()[0].consecutive_exceed_count, 2);
        assert_eq!(ctx.states()[0].phase, Phase::Warning);
        assert_eq!(ctx.states()[1].last_level, Some(Level::Ok));

        let report = ctx.run_cycle().await;
        assert_eq!(report.decision.reason, NotifyReason::RepeatedWarn);
    }

    #[tokio::test]
    async fn test_reset_states_forgets_streaks() {
        let mut ctx = context(vec![metric("mem", 70.0, 90.0, 100.0, vec![Ok(75.0); 4])]);

        ctx.run_cycle().await;
        ctx.run_cycle().await;
        ctx.reset_states();
        let report = ctx.run_cycle().await;

        assert!(!report.decision.should_send);
        assert_eq!(ctx.states()[0].consecutive_exceed_count, 1);
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let mut ctx = context(vec![metric(
            "mem",
            70.0,
            90.0,
            100.0,
            vec![Ok(95.0), Err(SampleError::Invalid(f64::NAN)), Ok(10.0)],
        )]);

        for _ in 0..3 {
            ctx.run_cycle().await;
        }

        let status = ctx.status(false, None);
        assert_eq!(
            status.stats,
            ObserverStats {
                cycles: 3,
                sample_failures: 1,
                limits_reached: 1,
                notifications_sent: 0,
                delivery_failures: 0,
                recoveries: 1,
            }
        );
        assert_eq!(status.metrics[0].phase, Phase::Quiet);
    }

    #[tokio::test]
    async fn test_checks_continue_after_failed_delivery() {
        let mut ctx = context(vec![metric("cpu", 70.0, 90.0, 100.0, vec![Ok(95.0); 3])]);
        let sink = FlakySink::default();

        let reports = ctx.run_checks(3, Some(&sink as &dyn NotificationSink), false).await;

        assert_eq!(reports.len(), 3);
        assert_eq!(sink.attempts.lock().len(), 3);
        let stats = ctx.status(false, None).stats;
        assert_eq!(stats.cycles, 3);
        assert_eq!(stats.notifications_sent, 3);
        assert_eq!(stats.delivery_failures, 1);
    }

    #[tokio::test]
    async fn test_checks_without_sink_only_evaluate() {
        let mut ctx = context(vec![metric("cpu", 70.0, 90.0, 100.0, vec![Ok(95.0); 2])]);

        let reports = ctx.run_checks(2, None, false).await;

        assert!(reports.iter().all(|r| r.decision.should_send));
        assert_eq!(ctx.status(false, None).stats.notifications_sent, 0);
    }

    #[tokio::test]
    async fn test_recovery_only_delivery() {
        let mut ctx = context(vec![metric("mem", 70.0, 90.0, 100.0, vec![Ok(95.0), Ok(10.0)])]);

        ctx.run_cycle().await;
        let report = ctx.run_cycle().await;

        assert!(ctx.prepare_delivery(&report, false).is_none());
        let text = ctx.prepare_delivery(&report, true).unwrap();
        assert!(text.contains("mem has recovered"));
        assert_eq!(report.delivery_label(), "recovery");
    }

    #[tokio::test]
    async fn test_reading_time_taken_after_sample() {
        let slow = MonitoredMetric::new(
            MetricDescriptor {
                id: "slow".to_string(),
                label: "slow".to_string(),
                unit: "%".to_string(),
                thresholds: ThresholdConfig::new(70.0, 90.0, 100.0),
            },
            Arc::new(ScriptedSource::values("slow", [99.0]).with_delay(Duration::from_millis(50))),
        )
        .unwrap();
        let mut ctx = context(vec![slow]);

        let report = ctx.run_cycle().await;

        let started = report.started_at.unwrap();
        let notified = ctx.states()[0].last_notified_at.unwrap();
        assert!(notified - started >= chrono::Duration::milliseconds(50));
    }

    #[tokio::test]
    async fn test_free_run_cycle_uses_given_states() {
        let metrics = vec![metric("cpu", 70.0, 90.0, 100.0, vec![Ok(99.0)])];
        let mut states = vec![ExceedanceState::new("cpu")];

        let report = run_cycle(
            &metrics,
            &mut states,
            &ExceedanceTracker::default(),
            Duration::from_secs(1),
        )
        .await;

        assert_eq!(report.decision.reason, NotifyReason::ImmediateCrit);
        assert_eq!(states[0].phase, Phase::Notified);
    }
}

//! Chat message rendering

use std::fmt::Write as _;

use crate::models::{CycleReport, MetricDescriptor, NotifyReason};

/// Render one cycle's report as a single markdown message.
///
/// `metrics` supplies labels and thresholds; ids missing from it are shown verbatim.
pub fn render_report(
    report: &CycleReport,
    host: &str,
    metrics: &[MetricDescriptor],
    include_recovery: bool,
) -> String {
    let lookup = |id: &str| metrics.iter().find(|m| m.id == id);
    let mut message = String::new();

    let headline = match report.decision.reason {
        NotifyReason::ImmediateCrit => Some("🚨 **Critical resource usage**"),
        NotifyReason::RepeatedWarn => Some("⚠️ **Sustained resource pressure**"),
        NotifyReason::None => None,
    };

    if let Some(headline) = headline.filter(|_| report.decision.should_send) {
        let _ = writeln!(message, "{headline} on `{host}`");

        for score in &report.decision.metrics {
            let (label, unit, thresholds) = match lookup(&score.metric_id) {
                Some(m) => (m.label.as_str(), m.unit.as_str(), Some(m.thresholds)),
                None => (score.metric_id.as_str(), "", None),
            };

            let _ = write!(
                message,
                "- **{label}**: `{:.1}{unit}` {} (badness {:.2}",
                score.value, score.level, score.score
            );
            if let Some(t) = thresholds {
                let _ = write!(
                    message,
                    ", warn {}{unit}, crit {}{unit}",
                    t.warn_level, t.crit_level
                );
            }
            message.push_str(")\n");
        }
    }

    if include_recovery && !report.recovered.is_empty() {
        if message.is_empty() {
            let _ = writeln!(message, "✅ **Recovered** on `{host}`");
        }
        for id in &report.recovered {
            let label = lookup(id).map_or(id.as_str(), |m| m.label.as_str());
            let _ = writeln!(message, "- *{label} has recovered*");
        }
    }

    message.trim_end().to_string()
}

/// One-off message sent when the observer comes up
pub fn render_announcement(host: &str, metrics: &[MetricDescriptor]) -> String {
    let mut message = format!("Running system observer on `{host}`");
    if !metrics.is_empty() {
        let labels: Vec<&str> = metrics.iter().map(|m| m.label.as_str()).collect();
        let _ = write!(message, "\nWatching: {}", labels.join(", "));
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BadnessScore, Level, NotificationDecision, ThresholdConfig};
    use pretty_assertions::assert_eq;

    fn descriptors() -> Vec<MetricDescriptor> {
        vec![
            MetricDescriptor {
                id: "mem".to_string(),
                label: "Memory-Utilisation".to_string(),
                unit: "%".to_string(),
                thresholds: ThresholdConfig::new(85.0, 95.0, 100.0),
            },
            MetricDescriptor {
                id: "root".to_string(),
                label: "Disk-Usage-/".to_string(),
                unit: "%".to_string(),
                thresholds: ThresholdConfig::new(90.0, 95.0, 100.0),
            },
        ]
    }

    #[test]
    fn test_render_crit() {
        let report = CycleReport {
            decision: NotificationDecision {
                should_send: true,
                reason: NotifyReason::ImmediateCrit,
                metrics: vec![BadnessScore {
                    metric_id: "mem".to_string(),
                    value: 97.24,
                    score: 0.8167,
                    level: Level::Crit,
                }],
            },
            ..CycleReport::default()
        };

        let text = render_report(&report, "box", &descriptors(), false);

        assert_eq!(
            text,
            "🚨 **Critical resource usage** on `box`\n\
             - **Memory-Utilisation**: `97.2%` CRIT (badness 0.82, warn 85%, crit 95%)"
        );
    }

    #[test]
    fn test_render_recovery_only() {
        let report = CycleReport {
            recovered: vec!["root".to_string()],
            ..CycleReport::default()
        };

        let text = render_report(&report, "box", &descriptors(), true);
        assert_eq!(
            text,
            "✅ **Recovered** on `box`\n- *Disk-Usage-/ has recovered*"
        );

        assert!(render_report(&report, "box", &descriptors(), false).is_empty());
    }

    #[test]
    fn test_render_unknown_metric() {
        let report = CycleReport {
            decision: NotificationDecision {
                should_send: true,
                reason: NotifyReason::RepeatedWarn,
                metrics: vec![BadnessScore {
                    metric_id: "gpu0".to_string(),
                    value: 80.0,
                    score: 0.5,
                    level: Level::Warn,
                }],
            },
            ..CycleReport::default()
        };

        let text = render_report(&report, "box", &[], false);
        assert!(text.contains("**gpu0**: `80.0` WARN"));
    }

    #[test]
    fn test_announcement_lists_metrics() {
        let text = render_announcement("box", &descriptors());
        assert!(text.starts_with("Running system observer on `box`"));
        assert!(text.contains("Memory-Utilisation, Disk-Usage-/"));
    }
}

//! Alerting for sysobserver
//!
//! Scores readings, tracks repeated exceedances per metric and delivers the
//! resulting messages.

mod evaluator;
mod message;
mod notifier;
mod tracker;

pub use evaluator::{evaluate, BadnessEvaluator};
pub use message::{render_announcement, render_report};
pub use notifier::{build_sink, deliver, LogSink, NotificationError, NotificationSink, WebhookSink};
pub use tracker::{ExceedanceTracker, DEFAULT_REPEAT_LIMIT};

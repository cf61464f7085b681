//! # sysobserver
//!
//! Watches the resources of the local machine and tells a chat channel when
//! they are under sustained or severe pressure.
//!
//! ## Architecture
//!
//! - **Collector**: metric sources (load average, memory, disks, GPUs)
//! - **Alerting**: badness scoring, hysteresis tracking, message rendering and sinks
//! - **Observer**: the interval loop that ties sampling, tracking and delivery together
//! - **API**: HTTP control surface to start, stop and inspect the observer
//!
//! ## Quick Start
//!
//! ```bash
//! # Serve the control API and start observing right away
//! sysobserver serve --start
//!
//! # Run three cycles against the current machine and print the result
//! sysobserver check --cycles 3
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]

pub mod alerting;
pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod models;
pub mod observer;

pub use config::Config;
pub use error::{Error, Result};

/// Re-exports for convenience
pub mod prelude {
    pub use crate::alerting::{BadnessEvaluator, ExceedanceTracker, NotificationSink};
    pub use crate::collector::{HostProbe, MetricSource};
    pub use crate::config::Config;
    pub use crate::error::{Error, Result};
    pub use crate::models::*;
    pub use crate::observer::{MonitoredMetric, Observer, ObserverContext};
}

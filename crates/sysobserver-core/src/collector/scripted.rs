//! Replays a fixed sequence of readings

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{MetricSource, SampleError};

/// A source that returns pre-recorded results in order, then reports itself unavailable
#[derive(Debug)]
pub struct ScriptedSource {
    label: String,
    unit: &'static str,
    script: Mutex<VecDeque<Result<f64, SampleError>>>,
    delay: Option<Duration>,
}

impl ScriptedSource {
    /// Create a source that will replay `script`
    pub fn new(label: impl Into<String>, script: Vec<Result<f64, SampleError>>) -> Self {
        Self {
            label: label.into(),
            unit: "%",
            script: Mutex::new(script.into()),
            delay: None,
        }
    }

    /// Convenience constructor for a script of plain values
    pub fn values(label: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        Self::new(label, values.into_iter().map(Ok).collect())
    }

    /// Sleep before answering each sample
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Override the unit suffix
    pub fn with_unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    /// Append further results
    pub fn push(&self, result: Result<f64, SampleError>) {
        self.script.lock().push_back(result);
    }

    /// Results not yet consumed
    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }
}

#[async_trait]
impl MetricSource for ScriptedSource {
    fn label(&self) -> String {
        self.label.clone()
    }

    fn unit(&self) -> &'static str {
        self.unit
    }

    async fn sample(&self) -> Result<f64, SampleError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SampleError::Unavailable("script exhausted".to_string())))
    }
}

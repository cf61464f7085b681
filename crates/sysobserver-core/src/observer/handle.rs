//! Background task and control handle

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use super::ObserverContext;
use crate::alerting::{deliver, NotificationSink};
use crate::error::{Error, Result};
use crate::models::{
    CycleReport, MetricDescriptor, ObserverStats, ObserverStatus, StartOutcome, StopOutcome,
};

const COMMAND_QUEUE: usize = 16;

enum Command {
    Start(oneshot::Sender<StartOutcome>),
    Stop(oneshot::Sender<StopOutcome>),
    Status(oneshot::Sender<ObserverStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle to a running observer task
#[derive(Clone)]
pub struct Observer {
    commands: mpsc::Sender<Command>,
    host: String,
    metrics: Arc<[MetricDescriptor]>,
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("host", &self.host)
            .field("metrics", &self.metrics.len())
            .finish_non_exhaustive()
    }
}

impl Observer {
    /// Move `context` onto a background task. The loop starts stopped.
    pub fn spawn(
        context: ObserverContext,
        sink: Arc<dyn NotificationSink>,
        notify_recovery: bool,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE);
        let handle = Self {
            commands: tx,
            host: context.host().to_string(),
            metrics: context.descriptors().into(),
        };

        let task = ObserverTask {
            stats: context.stats(),
            context,
            sink,
            notify_recovery,
            commands: rx,
        };
        tokio::spawn(task.run());

        handle
    }

    /// Machine name the observer reports for
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Metric descriptors in configuration order
    pub fn metrics(&self) -> &[MetricDescriptor] {
        &self.metrics
    }

    /// Start scheduling cycles; the first one runs right away
    pub async fn start(&self) -> Result<StartOutcome> {
        self.request(Command::Start).await
    }

    /// Stop scheduling cycles
    pub async fn stop(&self) -> Result<StopOutcome> {
        self.request(Command::Stop).await
    }

    /// Current state of the loop and every metric
    pub async fn status(&self) -> Result<ObserverStatus> {
        self.request(Command::Status).await
    }

    /// Stop the task for good; later requests fail
    pub async fn shutdown(&self) -> Result<()> {
        self.request(Command::Shutdown).await
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| Error::observer("observer task is not running"))?;
        rx.await
            .map_err(|_| Error::observer("observer task dropped the request"))
    }
}

struct ObserverTask {
    context: ObserverContext,
    stats: Arc<Mutex<ObserverStats>>,
    sink: Arc<dyn NotificationSink>,
    notify_recovery: bool,
    commands: mpsc::Receiver<Command>,
}

impl ObserverTask {
    async fn run(mut self) {
        let timer = sleep(Duration::ZERO);
        tokio::pin!(timer);
        let mut running = false;

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        debug!("All observer handles dropped");
                        break;
                    };
                    match command {
                        Command::Start(reply) => {
                            let outcome = if running {
                                StartOutcome::AlreadyRunning
                            } else {
                                self.context.reset_states();
                                running = true;
                                timer.as_mut().reset(Instant::now());
                                info!(
                                    interval = %humantime::format_duration(self.context.interval()),
                                    "Observer started"
                                );
                                StartOutcome::Started
                            };
                            let _ = reply.send(outcome);
                        }
                        Command::Stop(reply) => {
                            let outcome = if running {
                                running = false;
                                info!("Observer stopped");
                                StopOutcome::Stopped
                            } else {
                                StopOutcome::NotRunning
                            };
                            let _ = reply.send(outcome);
                        }
                        Command::Status(reply) => {
                            let next = running
                                .then(|| timer.deadline().saturating_duration_since(Instant::now()));
                            let _ = reply.send(self.context.status(running, next));
                        }
                        Command::Shutdown(reply) => {
                            info!("Observer shutting down");
                            let _ = reply.send(());
                            break;
                        }
                    }
                }
                () = &mut timer, if running => {
                    let report = self.context.run_cycle().await;
                    self.dispatch(&report);
                    timer.as_mut().reset(Instant::now() + self.context.interval());
                }
            }
        }
    }

    /// Hand the cycle's message to the sink without waiting for it
    fn dispatch(&self, report: &CycleReport) {
        let Some(text) = self.context.prepare_delivery(report, self.notify_recovery) else {
            return;
        };

        let sink = Arc::clone(&self.sink);
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            if !deliver(sink.as_ref(), &text).await {
                stats.lock().delivery_failures += 1;
            }
        });
    }
}

use std::{sync::Arc, time::Duration};

use tokio::{task::JoinHandle, time::MissedTickBehavior};
use tracing::{Instrument, info_span};

use crate::lifecycle::{AutoStop, Lifecycle};

/// Periodically runs the reconciliation tick.
#[derive(Clone)]
pub struct StatusMonitor {
    lifecycle: Arc<Lifecycle>,
    interval: Duration,
}

/// Aborts the monitor task when dropped.
#[derive(Debug)]
pub struct MonitorHandle(JoinHandle<()>);

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl StatusMonitor {
    pub fn new(lifecycle: Arc<Lifecycle>, interval: Duration) -> Self {
        Self {
            lifecycle,
            interval,
        }
    }

    /// First tick runs immediately.
    pub fn spawn(self) -> MonitorHandle {
        let span = info_span!(
            "status_monitor",
            instance = %self.lifecycle.instance_name(),
            interval_secs = self.interval.as_secs_f64()
        );
        let task = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(self.interval);
                // A tick that has to wait for a stop can outlast the period.
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    self.tick().await;
                }
            }
            .instrument(span),
        );
        MonitorHandle(task)
    }

    async fn tick(&self) {
        match self.lifecycle.observe_and_maybe_autostop().await {
            Ok(AutoStop::Stopped { channel_id }) => {
                tracing::info!(?channel_id, "auto-stop completed");
            }
            Ok(outcome) => tracing::debug!(?outcome, "status observed"),
            Err(e) => tracing::warn!(error = %format!("{e:#}"), "status check failed"),
        }
    }
}

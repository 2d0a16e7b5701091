//! Start/stop/status decisions for the managed instance and the auto-stop policy.
//!
//! Every decision is taken on a freshly read status. The instance can be changed
//! from the cloud console or by an earlier, unfinished operation, so nothing
//! about its state is cached here.

use std::{sync::Arc, time::Duration};

use lodestone_instance::{InstanceGateway, InstanceStatus, Operation};
use tokio::sync::Mutex;

use crate::config::Config;
use crate::presence::{ChatSink, Presence};
use crate::start_log::StartLogStore;

/// The invoking side of a chat command.
#[async_trait::async_trait]
pub trait Interaction: Send + Sync {
    fn channel_id(&self) -> u64;

    async fn reply(&self, content: &str) -> anyhow::Result<()>;

    /// Acknowledges the command so a slow operation can answer later with `followup`.
    async fn defer(&self) -> anyhow::Result<()>;

    async fn followup(&self, content: &str) -> anyhow::Result<()>;
}

/// How to wait for the instance to reach a target status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub delay: Duration,
    /// `None` waits forever.
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(1),
            max_attempts: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{instance} did not reach {target} after {attempts} checks (last seen {last})")]
pub struct WaitTimeout {
    pub instance: String,
    pub target: InstanceStatus,
    pub last: InstanceStatus,
    pub attempts: u32,
}

/// What a reconciliation tick decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoStop {
    NoRecord,
    /// The record's start time could not be parsed.
    UnknownStartTime,
    BelowThreshold { elapsed: Duration },
    NotRunning(InstanceStatus),
    /// A start or stop is in flight.
    Busy,
    Stopped { channel_id: Option<u64> },
}

pub struct Lifecycle {
    gateway: Arc<dyn InstanceGateway>,
    store: StartLogStore,
    presence: Presence,
    auto_stop_after: Duration,
    poll: PollPolicy,
    // Held from status pre-check to completion of start/stop, and around an auto-stop.
    op_lock: Mutex<()>,
}

impl Lifecycle {
    pub fn new(
        gateway: Arc<dyn InstanceGateway>,
        store: StartLogStore,
        presence: Presence,
        auto_stop_after: Duration,
        poll: PollPolicy,
    ) -> Self {
        Self {
            gateway,
            store,
            presence,
            auto_stop_after,
            poll,
            op_lock: Mutex::new(()),
        }
    }

    pub fn from_config(
        config: &Config,
        gateway: Arc<dyn InstanceGateway>,
        sink: Arc<dyn ChatSink>,
    ) -> Self {
        let name = gateway.instance_name().to_string();
        Self::new(
            gateway,
            StartLogStore::new(&config.start_log_path, &name),
            Presence::new(sink, &name),
            config.auto_stop_after,
            config.poll,
        )
    }

    pub fn instance_name(&self) -> &str {
        self.gateway.instance_name()
    }

    pub async fn dispatch(
        &self,
        operation: Operation,
        interaction: &dyn Interaction,
    ) -> anyhow::Result<()> {
        match operation {
            Operation::Start => self.request_start(interaction).await,
            Operation::Stop => self.request_stop(interaction).await,
            Operation::Status => self.request_status(interaction).await,
        }
    }

    pub async fn request_start(&self, interaction: &dyn Interaction) -> anyhow::Result<()> {
        let name = self.instance_name();
        let Ok(_guard) = self.op_lock.try_lock() else {
            tracing::debug!("start requested while another operation is running");
            return interaction.reply(&busy_message(name)).await;
        };

        let status = self.gateway.get().await?;
        tracing::debug!(%status, "start requested");

        match status {
            InstanceStatus::Running => {
                return interaction
                    .reply(&format!("{name} is already running"))
                    .await;
            }
            InstanceStatus::Terminated => {}
            other => return interaction.reply(&state_message(name, &other)).await,
        }

        tracing::info!(instance = %name, "starting instance");
        self.gateway.start().await?;
        interaction.defer().await?;

        self.wait_for(InstanceStatus::Running).await?;
        tracing::info!(instance = %name, "instance started");
        interaction.followup(&format!("{name} has started")).await?;

        let channel_id = interaction.channel_id();
        match self.store.write(channel_id).await {
            Ok(record) => tracing::debug!(channel_id, start_at = ?record.start_at(), "recorded start"),
            Err(e) => tracing::error!(
                channel_id,
                error = %format!("{e:#}"),
                "failed to record start, auto-stop will not cover this run"
            ),
        }

        self.presence.update(&InstanceStatus::Running).await;
        Ok(())
    }

    pub async fn request_stop(&self, interaction: &dyn Interaction) -> anyhow::Result<()> {
        let name = self.instance_name();
        let Ok(_guard) = self.op_lock.try_lock() else {
            tracing::debug!("stop requested while another operation is running");
            return interaction.reply(&busy_message(name)).await;
        };

        let status = self.gateway.get().await?;
        tracing::debug!(%status, "stop requested");

        match status {
            InstanceStatus::Terminated => {
                return interaction
                    .reply(&format!("{name} is already stopped"))
                    .await;
            }
            InstanceStatus::Running => {}
            other => return interaction.reply(&state_message(name, &other)).await,
        }

        tracing::info!(instance = %name, "stopping instance");
        self.gateway.stop().await?;
        interaction.defer().await?;

        self.wait_for(InstanceStatus::Terminated).await?;
        tracing::info!(instance = %name, "instance stopped");
        interaction.followup(&format!("{name} has stopped")).await?;

        self.store.delete().await?;
        self.presence.update(&InstanceStatus::Terminated).await;
        Ok(())
    }

    pub async fn request_status(&self, interaction: &dyn Interaction) -> anyhow::Result<()> {
        let name = self.instance_name();
        let status = self.gateway.get().await?;
        tracing::debug!(%status, "status requested");

        let message = match &status {
            InstanceStatus::Running => format!("{name} is running"),
            InstanceStatus::Terminated => format!("{name} is stopped"),
            other => state_message(name, other),
        };
        interaction.reply(&message).await?;
        self.presence.update(&status).await;
        Ok(())
    }

    /// One reconciliation tick: refresh presence, then stop the instance if it has
    /// been running longer than the auto-stop threshold.
    pub async fn observe_and_maybe_autostop(&self) -> anyhow::Result<AutoStop> {
        let status = self.gateway.get().await?;
        self.presence.update(&status).await;

        let Some(record) = self.store.read().await? else {
            return Ok(AutoStop::NoRecord);
        };

        let Some(start_at) = record.start_at() else {
            tracing::warn!(?record.start_at, "start log has no usable start time, skipping auto-stop");
            return Ok(AutoStop::UnknownStartTime);
        };

        let elapsed = (chrono::Local::now().naive_local() - start_at)
            .to_std()
            .unwrap_or_default();
        if elapsed < self.auto_stop_after {
            tracing::debug!(elapsed_secs = elapsed.as_secs(), "below auto-stop threshold");
            return Ok(AutoStop::BelowThreshold { elapsed });
        }

        if !status.is_running() {
            tracing::debug!(%status, elapsed_secs = elapsed.as_secs(), "not running, nothing to auto-stop");
            return Ok(AutoStop::NotRunning(status));
        }

        let Ok(_guard) = self.op_lock.try_lock() else {
            tracing::debug!(%status, "operation in flight, skipping auto-stop");
            return Ok(AutoStop::Busy);
        };
        // A manual stop may have cleared the record since it was read.
        if self.store.read().await?.is_none() {
            return Ok(AutoStop::NoRecord);
        }

        let name = self.instance_name();
        tracing::info!(instance = %name, elapsed_secs = elapsed.as_secs(), "auto-stopping instance");
        self.gateway.stop().await?;
        self.wait_for(InstanceStatus::Terminated).await?;

        let channel_id = record.channel_id();
        match channel_id {
            Some(channel_id) => {
                let notice = format!(
                    "{name} was stopped automatically because {} seconds have passed since it started",
                    self.auto_stop_after.as_secs_f64()
                );
                if let Err(e) = self.presence.notify(channel_id, &notice).await {
                    tracing::warn!(channel_id, error = %e, "failed to post auto-stop notice");
                }
            }
            None => {
                tracing::warn!(?record.channel_id, "start log has no usable channel, auto-stop notice dropped");
            }
        }
        tracing::info!(instance = %name, "instance auto-stopped");

        self.store.delete().await?;
        self.presence.update(&InstanceStatus::Terminated).await;
        Ok(AutoStop::Stopped { channel_id })
    }

    async fn wait_for(&self, target: InstanceStatus) -> anyhow::Result<()> {
        let mut attempts = 0u32;
        loop {
            let status = self.gateway.get().await?;
            attempts = attempts.saturating_add(1);
            if status == target {
                tracing::debug!(%status, attempts, "reached target status");
                return Ok(());
            }
            if let Some(max) = self.poll.max_attempts
                && attempts >= max
            {
                return Err(WaitTimeout {
                    instance: self.instance_name().to_string(),
                    target,
                    last: status,
                    attempts,
                }
                .into());
            }
            tracing::trace!(%status, %target, attempts, "waiting for status");
            tokio::time::sleep(self.poll.delay).await;
        }
    }
}

fn state_message(name: &str, status: &InstanceStatus) -> String {
    format!("{name} is currently {status}")
}

fn busy_message(name: &str) -> String {
    format!("Another start/stop of {name} is still in progress, try again shortly")
}

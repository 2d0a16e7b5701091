use std::sync::Arc;

use lodestone_instance::InstanceStatus;
use tokio::sync::Mutex;

/// Outbound side of the chat platform: bot activity and channel messages.
#[async_trait::async_trait]
pub trait ChatSink: Send + Sync {
    /// `None` clears the activity.
    async fn set_activity(&self, activity: Option<String>) -> anyhow::Result<()>;

    async fn send_to_channel(&self, channel_id: u64, content: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Shown {
    Never,
    Activity(Option<String>),
}

/// Mirrors instance status into the bot's activity.
pub struct Presence {
    sink: Arc<dyn ChatSink>,
    label: String,
    shown: Mutex<Shown>,
}

impl Presence {
    pub fn new(sink: Arc<dyn ChatSink>, instance_name: &str) -> Self {
        Self {
            sink,
            label: format!("Minecraft server ({instance_name})"),
            shown: Mutex::new(Shown::Never),
        }
    }

    /// Shows the activity while Running, clears it otherwise. Failures are logged only.
    pub async fn update(&self, status: &InstanceStatus) {
        let desired = status.is_running().then(|| self.label.clone());

        let mut shown = self.shown.lock().await;
        match &*shown {
            Shown::Never if desired.is_none() => {
                tracing::debug!(%status, "no activity set yet, nothing to clear");
                return;
            }
            Shown::Activity(current) if *current == desired => {
                tracing::trace!(%status, "activity unchanged");
                return;
            }
            _ => {}
        }

        match self.sink.set_activity(desired.clone()).await {
            Ok(()) => {
                *shown = Shown::Activity(desired);
                tracing::debug!(%status, "update activity");
            }
            Err(e) => tracing::warn!(%status, error = %e, "failed to update activity"),
        }
    }

    pub async fn notify(&self, channel_id: u64, content: &str) -> anyhow::Result<()> {
        self.sink.send_to_channel(channel_id, content).await
    }
}

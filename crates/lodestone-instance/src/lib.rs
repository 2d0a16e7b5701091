use std::fmt;

/// Raw status strings reported by the Compute Engine instances API.
pub const STATUS_RUNNING: &str = "RUNNING";
pub const STATUS_TERMINATED: &str = "TERMINATED";

/// Observed state of the managed instance.
///
/// NOTE: Only the two terminal states drive decisions. Transitional states
/// (STAGING, STOPPING, ...) are carried verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Deserialize)]
#[serde(from = "String")]
pub enum InstanceStatus {
    Running,
    Terminated,
    Other(String),
}

impl InstanceStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            STATUS_RUNNING => Self::Running,
            STATUS_TERMINATED => Self::Terminated,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Running => STATUS_RUNNING,
            Self::Terminated => STATUS_TERMINATED,
            Self::Other(raw) => raw,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for InstanceStatus {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

/// User intent selected by the chat command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    Stop,
    Status,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Status => "status",
        })
    }
}

/// Start/stop/get for one instance, bound to (project, zone, name) at construction.
///
/// `start` and `stop` only trigger the transition; callers must poll `get`
/// to observe the result.
#[async_trait::async_trait]
pub trait InstanceGateway: Send + Sync {
    fn instance_name(&self) -> &str;

    async fn start(&self) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;

    async fn get(&self) -> anyhow::Result<InstanceStatus>;
}

use std::{path::PathBuf, time::Duration};

use anyhow::Context;

use crate::lifecycle::PollPolicy;

pub const DEFAULT_MONITOR_INTERVAL_SECS: f64 = 60.0 * 5.0;
pub const DEFAULT_AUTO_STOP_SECS: f64 = 60.0 * 60.0 * 24.0;
pub const DEFAULT_START_LOG_FILE: &str = "server_start_log.json";
const DEFAULT_POLL_DELAY_MS: u64 = 1000;

/// Process configuration, read once at startup and passed to constructors.
#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub credentials_file: PathBuf,
    pub project_id: String,
    pub zone: String,
    pub instance_name: String,
    pub monitor_interval: Duration,
    pub auto_stop_after: Duration,
    pub start_log_path: PathBuf,
    pub poll: PollPolicy,
    pub log_dir: Option<PathBuf>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"<redacted>")
            .field("credentials_file", &self.credentials_file)
            .field("project_id", &self.project_id)
            .field("zone", &self.zone)
            .field("instance_name", &self.instance_name)
            .field("monitor_interval", &self.monitor_interval)
            .field("auto_stop_after", &self.auto_stop_after)
            .field("start_log_path", &self.start_log_path)
            .field("poll", &self.poll)
            .field("log_dir", &self.log_dir)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &str| get(name).ok_or_else(|| anyhow::anyhow!("{name} is required"));

        let discord_token = required("DISCORD_BOT_TOKEN")?;
        let credentials_file = PathBuf::from(required("GOOGLE_CREDENTIALS_FILE")?);
        let project_id = required("GOOGLE_MINECRAFT_SERVER_PROJECT_ID")?;
        let zone = required("GOOGLE_MINECRAFT_SERVER_ZONE")?;
        let instance_name = required("GOOGLE_MINECRAFT_SERVER_INSTANCE_NAME")?;

        let monitor_interval = seconds(
            "MONITERING_SERVER_STATUS_TIME",
            get("MONITERING_SERVER_STATUS_TIME"),
            DEFAULT_MONITOR_INTERVAL_SECS,
        )?;
        if monitor_interval.is_zero() {
            anyhow::bail!("MONITERING_SERVER_STATUS_TIME must be greater than 0");
        }
        let auto_stop_after = seconds(
            "SERVER_AUTO_STOP_TIME",
            get("SERVER_AUTO_STOP_TIME"),
            DEFAULT_AUTO_STOP_SECS,
        )?;

        let start_log_path = PathBuf::from(
            get("SERVER_START_LOG_FILE").unwrap_or_else(|| DEFAULT_START_LOG_FILE.to_string()),
        );

        let delay_ms = match get("LODESTONE_POLL_DELAY_MS") {
            None => DEFAULT_POLL_DELAY_MS,
            Some(raw) => raw
                .parse::<u64>()
                .context("LODESTONE_POLL_DELAY_MS must be an integer (milliseconds)")?,
        };
        let max_attempts = match get("LODESTONE_POLL_MAX_ATTEMPTS") {
            None => None,
            Some(raw) => {
                let v = raw
                    .parse::<u32>()
                    .context("LODESTONE_POLL_MAX_ATTEMPTS must be a positive integer")?;
                if v == 0 {
                    anyhow::bail!("LODESTONE_POLL_MAX_ATTEMPTS must be a positive integer");
                }
                Some(v)
            }
        };

        Ok(Self {
            discord_token,
            credentials_file,
            project_id,
            zone,
            instance_name,
            monitor_interval,
            auto_stop_after,
            start_log_path,
            poll: PollPolicy {
                delay: Duration::from_millis(delay_ms),
                max_attempts,
            },
            log_dir: get("LODESTONE_LOG_DIR").map(PathBuf::from),
        })
    }
}

// Accepts fractional seconds ("300", "1.5").
fn seconds(name: &str, raw: Option<String>, default: f64) -> anyhow::Result<Duration> {
    let secs = match raw {
        None => default,
        Some(raw) => raw
            .parse::<f64>()
            .with_context(|| format!("{name} must be a number of seconds (got {raw:?})"))?,
    };
    Duration::try_from_secs_f64(secs)
        .map_err(|_| anyhow::anyhow!("{name} must be a non-negative number of seconds"))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("DISCORD_BOT_TOKEN", "token"),
            ("GOOGLE_CREDENTIALS_FILE", "/etc/lodestone/sa.json"),
            ("GOOGLE_MINECRAFT_SERVER_PROJECT_ID", "craft-1234"),
            ("GOOGLE_MINECRAFT_SERVER_ZONE", "asia-northeast1-b"),
            ("GOOGLE_MINECRAFT_SERVER_INSTANCE_NAME", "minecraft"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> anyhow::Result<Config> {
        Config::from_lookup(|k| env.get(k).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply() {
        let cfg = load(&base_env()).unwrap();
        assert_eq!(cfg.instance_name, "minecraft");
        assert_eq!(cfg.monitor_interval, Duration::from_secs(300));
        assert_eq!(cfg.auto_stop_after, Duration::from_secs(86400));
        assert_eq!(cfg.start_log_path, PathBuf::from(DEFAULT_START_LOG_FILE));
        assert_eq!(cfg.poll.delay, Duration::from_secs(1));
        assert_eq!(cfg.poll.max_attempts, None);
        assert!(cfg.log_dir.is_none());
    }

    #[test]
    fn missing_required_is_fatal() {
        let mut env = base_env();
        env.remove("GOOGLE_MINECRAFT_SERVER_ZONE");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("GOOGLE_MINECRAFT_SERVER_ZONE"));
    }

    #[test]
    fn blank_required_counts_as_missing() {
        let mut env = base_env();
        env.insert("DISCORD_BOT_TOKEN", "   ");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("DISCORD_BOT_TOKEN"));
    }

    #[test]
    fn fractional_seconds_accepted() {
        let mut env = base_env();
        env.insert("MONITERING_SERVER_STATUS_TIME", "2.5");
        env.insert("SERVER_AUTO_STOP_TIME", "3600");
        let cfg = load(&env).unwrap();
        assert_eq!(cfg.monitor_interval, Duration::from_millis(2500));
        assert_eq!(cfg.auto_stop_after, Duration::from_secs(3600));
    }

    #[test]
    fn invalid_numbers_name_the_variable() {
        let mut env = base_env();
        env.insert("SERVER_AUTO_STOP_TIME", "a day");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("SERVER_AUTO_STOP_TIME"));

        let mut env = base_env();
        env.insert("SERVER_AUTO_STOP_TIME", "-5");
        assert!(load(&env).is_err());

        let mut env = base_env();
        env.insert("MONITERING_SERVER_STATUS_TIME", "0");
        assert!(load(&env).is_err());
    }

    #[test]
    fn poll_policy_overrides() {
        let mut env = base_env();
        env.insert("LODESTONE_POLL_DELAY_MS", "250");
        env.insert("LODESTONE_POLL_MAX_ATTEMPTS", "600");
        let cfg = load(&env).unwrap();
        assert_eq!(cfg.poll.delay, Duration::from_millis(250));
        assert_eq!(cfg.poll.max_attempts, Some(600));

        env.insert("LODESTONE_POLL_MAX_ATTEMPTS", "0");
        assert!(load(&env).is_err());
    }

    #[test]
    fn debug_redacts_token() {
        let cfg = load(&base_env()).unwrap();
        let s = format!("{cfg:?}");
        assert!(!s.contains("\"token\""));
        assert!(s.contains("<redacted>"));
    }
}

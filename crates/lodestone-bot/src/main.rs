use std::sync::Arc;

use lodestone_bot::config::Config;
use lodestone_bot::{discord, logging};
use lodestone_gce::{ComputeInstance, InstanceRef};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let _log_guard = logging::init(config.log_dir.as_deref())?;
    tracing::debug!(?config, "loaded config");

    let target = InstanceRef {
        project: config.project_id.clone(),
        zone: config.zone.clone(),
        name: config.instance_name.clone(),
    };
    let gateway = Arc::new(ComputeInstance::from_credentials_file(
        target,
        &config.credentials_file,
    )?);

    tracing::info!(
        instance = %config.instance_name,
        monitor_interval_secs = config.monitor_interval.as_secs_f64(),
        auto_stop_secs = config.auto_stop_after.as_secs_f64(),
        "lodestone starting"
    );
    discord::run(config, gateway).await
}

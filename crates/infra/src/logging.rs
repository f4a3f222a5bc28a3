use crate::config::AppConfig;
use anyhow::Result;
use tracing_subscriber::{EnvFilter, fmt};

pub fn init_tracing(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_new(config.log_level.clone()).unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if config.is_production() {
        fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_target(false)
            .try_init()
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .compact()
            .try_init()
    };
    installed.map_err(|err| anyhow::anyhow!("failed to install tracing subscriber: {err}"))?;

    tracing::debug!(app_env = %config.app_env, "tracing initialised");
    Ok(())
}

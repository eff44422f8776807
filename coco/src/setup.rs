use anyhow::{Context, Result};
use coco_config::Config;
use coco_server::services::filter::Blacklist;

/// Validates parts of the configuration that are only checked when the router starts.
pub fn check_config(config: &Config) -> Result<()> {
    let types_db = config.types_db_path();
    if !types_db.is_file() {
        anyhow::bail!("types.db not found at {}", types_db.display());
    }

    Blacklist::new(config.blacklist()).context("invalid blacklist pattern")?;

    if config.listen_addr().ip().is_loopback() {
        coco_log::warn!(
            "listening on loopback address {}, remote agents cannot reach coco",
            config.listen_addr()
        );
    }

    Ok(())
}

/// Print spawn infos to the log.
pub fn dump_spawn_infos(config: &Config) {
    coco_log::info!("launching coco from config {}", config.path().display());
    coco_log::info!("  listen address: {}", config.listen_addr());
    coco_log::info!("  api address: {}", config.api_addr());
    for (name, targets) in config.tiers() {
        coco_log::info!("  tier {name}: {}", targets.join(", "));
    }
    coco_log::info!("  filter workers: {}", config.filter_workers());
    coco_log::info!("  log level: {}", config.logging().level);
}

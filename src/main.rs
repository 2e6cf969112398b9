//! CLI launcher for the condo management core
//!
//! Loads the JSON configuration, initializes logging, migrates the database
//! and wires the service layer. The HTTP frontend attaches to the resulting
//! [`AppContext`]; a migration or configuration failure exits non-zero
//! before anything serves.

use anyhow::Context;
use condo_manager::config::Config;
use condo_manager::AppContext;
use log::info;
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let config_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config"));

    let config = Config::load(&config_dir)
        .with_context(|| format!("loading configuration from {}", config_dir.display()))?;
    config.logging.init_logger()?;

    info!(
        "Starting condo manager on {}:{}",
        config.app.host, config.app.port
    );

    let context = AppContext::bootstrap(config).context("startup failed")?;

    let projects = context.services.projects.list_projects()?;
    let users = context.services.users.get_all_users()?;
    info!(
        "Catalog ready: {} project(s), {} user(s)",
        projects.len(),
        users.len()
    );
    info!("Core services initialized; attach the HTTP frontend via condo_manager::AppContext");

    Ok(())
}

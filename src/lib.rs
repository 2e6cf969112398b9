//! Condo management core
//!
//! Persistence-and-service layer for a multi-tenant condominium management
//! application: the project/unit aggregate, the authenticated-user
//! repository, the schema migration engine and the feature-flag gate. The
//! HTTP frontend is an external collaborator that drives everything through
//! [`AppContext`] and the service operations it exposes.

use log::info;
use std::sync::Arc;

// Module declarations
pub mod config;
pub mod database;
pub mod errors;
pub mod models;
pub mod security;
pub mod services;


use crate::config::Config;
use crate::database::Database;
use crate::errors::AppResult;
use crate::services::Services;

/// Fully wired application state, built once at startup.
///
/// Construction is explicit: the configuration is loaded by the caller, the
/// database is opened and migrated here, and the services receive their
/// dependencies by reference. Nothing is looked up globally.
pub struct AppContext {
    pub config: Config,
    pub database: Arc<Database>,
    pub services: Arc<Services>,
}

impl AppContext {
    /// Bring the application up from a loaded configuration.
    ///
    /// Schema migration runs to completion in here; a migration failure
    /// propagates and must abort startup.
    pub fn bootstrap(config: Config) -> AppResult<Self> {
        info!("Bootstrapping application context");

        let database = Arc::new(Database::init(&config.database)?);
        let services = Arc::new(Services::init(Arc::clone(&database))?);

        info!("Application context ready");
        Ok(Self {
            config,
            database,
            services,
        })
    }
}

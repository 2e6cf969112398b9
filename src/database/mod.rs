//! Database module for the condo management core
//!
//! Contains the pooled SQLite connection handling and the schema
//! migration engine.

pub mod core;
pub mod migrations;

pub use core::Database;
pub use migrations::SchemaMigrator;

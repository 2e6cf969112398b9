//! Centralized error handling for the condo management core
//!
//! This module provides the application-wide error taxonomy covering
//! configuration loading, schema migration, repository operations,
//! validation and authentication.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide result type
pub type AppResult<T> = Result<T, AppError>;

/// Main application error enum covering all error categories
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    // Database Errors
    #[error("Database operation failed: {message}")]
    Database { message: String },

    #[error("Database connection failed: {reason}")]
    DatabaseConnection { reason: String },

    #[error("Database busy: {operation} timed out waiting for the write lock")]
    DatabaseBusy { operation: String },

    #[error("Migration {file} failed: {reason}")]
    DatabaseMigration { file: String, reason: String },

    #[error("Record not found: {entity} with {field} = {value}")]
    RecordNotFound {
        entity: String,
        field: String,
        value: String,
    },

    #[error("Duplicate record: {entity} with {field} = {value} already exists")]
    DuplicateRecord {
        entity: String,
        field: String,
        value: String,
    },

    // Validation Errors
    #[error("Validation failed: {field} - {message}")]
    Validation { field: String, message: String },

    // Configuration Errors
    #[error("Configuration error: {path} - {reason}")]
    Configuration { path: String, reason: String },

    // Business Logic Errors
    #[error("Ambiguous project name: {name} matches {matches} projects")]
    AmbiguousName { name: String, matches: usize },

    #[error("Cannot shrink project {project_id}: {reason}")]
    CannotShrink { project_id: String, reason: String },

    #[error("Constraint violation: {detail}")]
    Constraint { detail: String },

    // Security Errors
    //
    // Authentication carries no detail: callers receive one uniform failure
    // regardless of whether the user exists, is inactive, or supplied a
    // wrong password.
    #[error("Authentication failed")]
    Authentication,

    // Generic Errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found(
        entity: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::RecordNotFound {
            entity: entity.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the error category for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            Self::Database { .. }
            | Self::DatabaseConnection { .. }
            | Self::DatabaseBusy { .. }
            | Self::DatabaseMigration { .. }
            | Self::RecordNotFound { .. }
            | Self::DuplicateRecord { .. }
            | Self::Constraint { .. } => "database",

            Self::Validation { .. } => "validation",

            Self::Configuration { .. } => "configuration",

            Self::AmbiguousName { .. } | Self::CannotShrink { .. } => "business",

            Self::Authentication => "security",

            Self::Internal { .. } => "system",
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DatabaseBusy { .. })
    }

    /// Get the HTTP status code that should be returned for this error
    pub fn http_status(&self) -> u16 {
        match self {
            Self::RecordNotFound { .. } => 404,

            Self::Validation { .. } | Self::DuplicateRecord { .. } => 400,

            Self::Authentication => 401,

            Self::AmbiguousName { .. } | Self::CannotShrink { .. } | Self::Constraint { .. } => {
                409
            }

            _ => 500,
        }
    }
}

// Map SQLite failures onto the domain taxonomy: unique/check/foreign-key
// violations become Constraint, a busy timeout becomes DatabaseBusy.
impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg) => match code.code {
                rusqlite::ErrorCode::ConstraintViolation => Self::Constraint {
                    detail: msg.clone().unwrap_or_else(|| err.to_string()),
                },
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked => {
                    Self::DatabaseBusy {
                        operation: msg.clone().unwrap_or_else(|| "statement".to_string()),
                    }
                }
                _ => Self::Database {
                    message: err.to_string(),
                },
            },
            _ => Self::Database {
                message: err.to_string(),
            },
        }
    }
}

impl From<AppError> for String {
    fn from(err: AppError) -> Self {
        err.to_string()
    }
}

//! Data models for the condo management core
//!
//! This module contains the domain entities: projects, their units,
//! authenticated users and feature flags, together with the enums that
//! describe their lifecycles.
//!
//! Enum values are stored as canonical lowercase text. Parsing accepts any
//! casing so callers may submit either the stored form or a display form.

use crate::errors::{AppError, AppResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Owner name marking a unit that has no real owner yet
pub const PLACEHOLDER_OWNER: &str = "Disponible";

/// Prefix of auto-provisioned unit numbers ("UNIT-1", "UNIT-2", ...)
pub const PLACEHOLDER_UNIT_PREFIX: &str = "UNIT-";

/// Validation trait for models
pub trait Validate {
    /// Validate the model and return any validation errors
    fn validate(&self) -> AppResult<()>;
}

// =============================================================================
// Project Models
// =============================================================================

/// A building or development grouping units. The project and its units form
/// one consistency boundary: `unit_count` equals the number of unit rows at
/// every commit boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    /// Opaque public identifier, UUID-shaped, assigned on create
    pub project_id: String,
    pub name: String,
    pub address: String,
    pub building_area: f64,
    pub land_area: f64,
    pub construction_year: i32,
    pub unit_count: i64,
    pub constructor: String,
    /// ISO-8601 timestamp recorded at creation, kept as text
    pub creation_date: String,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub units: Vec<Unit>,
}

impl Project {
    /// Number of units currently open for sale
    pub fn count_available(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.status == UnitStatus::Available)
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    #[serde(alias = "ACTIVE", alias = "Active")]
    Active,
    #[serde(alias = "INACTIVE", alias = "Inactive")]
    Inactive,
    #[serde(alias = "ARCHIVED", alias = "Archived")]
    Archived,
}

impl std::fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProjectStatus::Active => write!(f, "active"),
            ProjectStatus::Inactive => write!(f, "inactive"),
            ProjectStatus::Archived => write!(f, "archived"),
        }
    }
}

impl std::str::FromStr for ProjectStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "active" => Ok(ProjectStatus::Active),
            "inactive" => Ok(ProjectStatus::Inactive),
            "archived" => Ok(ProjectStatus::Archived),
            _ => Err(AppError::validation(
                "status",
                format!("Invalid project status: {}", s),
            )),
        }
    }
}

impl Validate for Project {
    fn validate(&self) -> AppResult<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::validation("name", "Project name cannot be empty"));
        }
        if self.address.trim().is_empty() {
            return Err(AppError::validation("address", "Address cannot be empty"));
        }
        if self.building_area <= 0.0 {
            return Err(AppError::validation(
                "building_area",
                "Building area must be greater than 0",
            ));
        }
        if self.land_area < 0.0 {
            return Err(AppError::validation(
                "land_area",
                "Land area cannot be negative",
            ));
        }
        if self.unit_count < 0 {
            return Err(AppError::validation(
                "unit_count",
                "Unit count cannot be negative",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Unit Models
// =============================================================================

/// A sellable or leasable space inside a project. The surrogate `id` is
/// assigned at insert and stable across updates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub id: i64,
    pub unit_number: String,
    pub project_id: String,
    pub area: f64,
    pub condo_type: CondoType,
    pub status: UnitStatus,
    pub estimated_price: Option<f64>,
    pub owner_name: String,
    /// Stored verbatim; parsed lazily by the fee computation
    pub calculated_monthly_fees: Option<String>,
}

impl Unit {
    /// Numeric suffix of an auto-provisioned "UNIT-N" number
    pub fn placeholder_index(&self) -> Option<i64> {
        self.unit_number
            .strip_prefix(PLACEHOLDER_UNIT_PREFIX)
            .and_then(|suffix| suffix.parse().ok())
    }

    /// A unit may be dropped by a shrink only while it is still available
    /// and unowned.
    pub fn is_removable_placeholder(&self) -> bool {
        self.status == UnitStatus::Available && self.owner_name == PLACEHOLDER_OWNER
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CondoType {
    #[serde(alias = "RESIDENTIAL", alias = "Residential")]
    Residential,
    #[serde(alias = "COMMERCIAL", alias = "Commercial")]
    Commercial,
    #[serde(alias = "PARKING", alias = "Parking")]
    Parking,
    #[serde(alias = "STORAGE", alias = "Storage")]
    Storage,
}

impl std::fmt::Display for CondoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CondoType::Residential => write!(f, "residential"),
            CondoType::Commercial => write!(f, "commercial"),
            CondoType::Parking => write!(f, "parking"),
            CondoType::Storage => write!(f, "storage"),
        }
    }
}

impl std::str::FromStr for CondoType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "residential" => Ok(CondoType::Residential),
            "commercial" => Ok(CondoType::Commercial),
            "parking" => Ok(CondoType::Parking),
            "storage" => Ok(CondoType::Storage),
            _ => Err(AppError::validation(
                "condo_type",
                format!("Invalid condo type: {}", s),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    #[serde(alias = "AVAILABLE", alias = "Available")]
    Available,
    #[serde(alias = "RESERVED", alias = "Reserved")]
    Reserved,
    #[serde(alias = "SOLD", alias = "Sold")]
    Sold,
    #[serde(alias = "MAINTENANCE", alias = "Maintenance")]
    Maintenance,
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitStatus::Available => write!(f, "available"),
            UnitStatus::Reserved => write!(f, "reserved"),
            UnitStatus::Sold => write!(f, "sold"),
            UnitStatus::Maintenance => write!(f, "maintenance"),
        }
    }
}

impl std::str::FromStr for UnitStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "available" => Ok(UnitStatus::Available),
            "reserved" => Ok(UnitStatus::Reserved),
            "sold" => Ok(UnitStatus::Sold),
            "maintenance" => Ok(UnitStatus::Maintenance),
            _ => Err(AppError::validation(
                "status",
                format!("Invalid unit status: {}", s),
            )),
        }
    }
}

impl Validate for Unit {
    fn validate(&self) -> AppResult<()> {
        if self.unit_number.trim().is_empty() {
            return Err(AppError::validation(
                "unit_number",
                "Unit number cannot be empty",
            ));
        }
        if self.area < 0.0 {
            return Err(AppError::validation("area", "Area cannot be negative"));
        }
        Ok(())
    }
}

// =============================================================================
// User Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub full_name: String,
    pub condo_unit: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[serde(alias = "ADMIN", alias = "Admin")]
    Admin,
    #[serde(alias = "RESIDENT", alias = "Resident")]
    Resident,
    #[serde(alias = "GUEST", alias = "Guest")]
    Guest,
}

impl UserRole {
    pub fn can_manage_users(self) -> bool {
        matches!(self, UserRole::Admin)
    }

    pub fn can_access_finances(self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Resident)
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UserRole::Admin => write!(f, "admin"),
            UserRole::Resident => write!(f, "resident"),
            UserRole::Guest => write!(f, "guest"),
        }
    }
}

impl std::str::FromStr for UserRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(UserRole::Admin),
            "resident" => Ok(UserRole::Resident),
            "guest" => Ok(UserRole::Guest),
            _ => Err(AppError::validation(
                "role",
                format!("Invalid user role: {}", s),
            )),
        }
    }
}

impl Validate for User {
    fn validate(&self) -> AppResult<()> {
        if self.username.trim().len() < 3 {
            return Err(AppError::validation(
                "username",
                "Username must be at least 3 characters",
            ));
        }
        if !self.email.contains('@') {
            return Err(AppError::validation("email", "Invalid email format"));
        }
        if self.full_name.trim().len() < 2 {
            return Err(AppError::validation(
                "full_name",
                "Full name must be at least 2 characters",
            ));
        }
        if self.password_hash.is_empty() {
            return Err(AppError::validation(
                "password_hash",
                "Password hash cannot be empty",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Feature Flag Models
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlag {
    pub id: i64,
    pub flag_name: String,
    pub is_enabled: bool,
    pub description: Option<String>,
}

//! Services module containing business logic for all major entities
//!
//! This module implements the repository pattern over the pooled SQLite
//! store: the project/unit aggregate, the authenticated-user repository,
//! feature-flag reads and the monthly fee computation.

use crate::database::Database;
use crate::errors::{AppError, AppResult};
use crate::models::*;
use crate::security::PasswordHasher;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

// =============================================================================
// Data Transfer Objects (DTOs)
// =============================================================================

/// Inputs for creating a project and its placeholder units
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProject {
    pub name: String,
    pub address: String,
    pub building_area: f64,
    #[serde(default)]
    pub land_area: f64,
    pub construction_year: i32,
    pub unit_count: i64,
    #[serde(default)]
    pub constructor: String,
}

impl Validate for NewProject {
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

/// Partial update of a single unit. Absent fields are preserved; enum fields
/// accept the stored lowercase form or an uppercase display form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitUpdateData {
    pub unit_number: Option<String>,
    pub area: Option<f64>,
    pub condo_type: Option<CondoType>,
    pub status: Option<UnitStatus>,
    pub estimated_price: Option<f64>,
    pub owner_name: Option<String>,
    pub calculated_monthly_fees: Option<String>,
}

impl UnitUpdateData {
    pub fn is_empty(&self) -> bool {
        self.unit_number.is_none()
            && self.area.is_none()
            && self.condo_type.is_none()
            && self.status.is_none()
            && self.estimated_price.is_none()
            && self.owner_name.is_none()
            && self.calculated_monthly_fees.is_none()
    }
}

/// Inputs for creating a user. The password is hashed by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub full_name: String,
    #[serde(default)]
    pub condo_unit: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Validate for NewUser {
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

/// Partial update of a user record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserUpdateData {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub role: Option<UserRole>,
    pub full_name: Option<String>,
    pub condo_unit: Option<String>,
    pub phone: Option<String>,
    pub is_active: Option<bool>,
}

impl UserUpdateData {
    fn apply_to(self, mut user: User) -> User {
        if let Some(username) = self.username {
            user.username = username;
        }
        if let Some(email) = self.email {
            user.email = email;
        }
        if let Some(password_hash) = self.password_hash {
            user.password_hash = password_hash;
        }
        if let Some(role) = self.role {
            user.role = role;
        }
        if let Some(full_name) = self.full_name {
            user.full_name = full_name;
        }
        if let Some(condo_unit) = self.condo_unit {
            user.condo_unit = Some(condo_unit);
        }
        if let Some(phone) = self.phone {
            user.phone = Some(phone);
        }
        if let Some(is_active) = self.is_active {
            user.is_active = is_active;
        }
        user
    }
}

/// Projection of a user for the list view
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDisplay {
    pub id: i64,
    pub username: String,
    pub full_name: String,
    pub role: UserRole,
    pub condo_unit: Option<String>,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<User> for UserDisplay {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            full_name: user.full_name,
            role: user.role,
            condo_unit: user.condo_unit,
            is_active: user.is_active,
            last_login: user.last_login,
        }
    }
}

/// API projection of a user: no password hash, with role-derived permissions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDetails {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: UserRole,
    pub full_name: String,
    pub condo_unit: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub can_manage_users: bool,
    pub can_access_finances: bool,
}

impl UserDetails {
    pub fn for_user(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role,
            full_name: user.full_name.clone(),
            condo_unit: user.condo_unit.clone(),
            phone: user.phone.clone(),
            is_active: user.is_active,
            created_at: user.created_at,
            last_login: user.last_login,
            can_manage_users: user.role.can_manage_users(),
            can_access_finances: user.role.can_access_finances(),
        }
    }
}

/// Per-project statistics for the dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectStatistics {
    pub total_units: i64,
    pub available: i64,
    pub sold: i64,
    pub reserved: i64,
    pub maintenance: i64,
    pub avg_area: f64,
    pub total_monthly_fees: f64,
}

impl ProjectStatistics {
    pub fn for_units(units: &[Unit], schedule: &FeeSchedule) -> Self {
        let count = |status: UnitStatus| {
            units.iter().filter(|u| u.status == status).count() as i64
        };
        let avg_area = if units.is_empty() {
            0.0
        } else {
            units.iter().map(|u| u.area).sum::<f64>() / units.len() as f64
        };
        let total_monthly_fees = round2(
            units
                .iter()
                .map(|u| effective_monthly_fee(u, schedule))
                .sum(),
        );

        Self {
            total_units: units.len() as i64,
            available: count(UnitStatus::Available),
            sold: count(UnitStatus::Sold),
            reserved: count(UnitStatus::Reserved),
            maintenance: count(UnitStatus::Maintenance),
            avg_area,
            total_monthly_fees,
        }
    }
}

// =============================================================================
// Fee Computation
// =============================================================================

/// Monthly fee rates per condo type, per square unit of area.
///
/// The `system_config` table is authoritative when its `fee_rate_*` keys are
/// present; the defaults below apply otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub residential: f64,
    pub commercial: f64,
    pub parking: f64,
    pub storage: f64,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            residential: 0.45,
            commercial: 0.60,
            parking: 0.15,
            storage: 0.25,
        }
    }
}

impl FeeSchedule {
    pub fn rate(&self, condo_type: CondoType) -> f64 {
        match condo_type {
            CondoType::Residential => self.residential,
            CondoType::Commercial => self.commercial,
            CondoType::Parking => self.parking,
            CondoType::Storage => self.storage,
        }
    }
}

/// Monthly fee of a unit from its area and type. Pure; does not mutate.
pub fn calculate_monthly_fee(unit: &Unit, schedule: &FeeSchedule) -> f64 {
    round2(unit.area * schedule.rate(unit.condo_type))
}

/// Monthly fee actually presented for a unit.
///
/// The stored `calculated_monthly_fees` text wins when it parses as a
/// number; otherwise the fee is recomputed from area and type. Parse
/// failures are logged, not raised.
pub fn effective_monthly_fee(unit: &Unit, schedule: &FeeSchedule) -> f64 {
    if let Some(stored) = &unit.calculated_monthly_fees {
        match stored.trim().parse::<f64>() {
            Ok(value) => return round2(value),
            Err(_) => warn!(
                "Unit {}: unparseable stored monthly fees '{}', recomputing",
                unit.id, stored
            ),
        }
    }
    calculate_monthly_fee(unit, schedule)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

// =============================================================================
// Project Service
// =============================================================================

pub struct ProjectService {
    database: Arc<Database>,
}

impl ProjectService {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Create a project together with its placeholder units, in one
    /// transaction. The new project carries `unit_count` unit rows named
    /// `UNIT-1` through `UNIT-N`.
    pub fn create_project(&self, draft: NewProject) -> AppResult<Project> {
        info!("Creating new project: {}", draft.name);
        draft.validate()?;

        self.database.with_transaction(|conn| {
            let project_id = Uuid::new_v4().to_string();
            let now = Utc::now();

            conn.execute(
                "INSERT INTO projects (project_id, name, address, building_area, land_area,
                 construction_year, unit_count, constructor, creation_date, status,
                 created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    project_id,
                    draft.name,
                    draft.address,
                    draft.building_area,
                    draft.land_area,
                    draft.construction_year,
                    draft.unit_count,
                    draft.constructor,
                    now.to_rfc3339(),
                    ProjectStatus::Active.to_string(),
                    now,
                    now
                ],
            )?;

            for number in 1..=draft.unit_count {
                Self::insert_placeholder_unit(conn, &project_id, number)?;
            }

            debug!(
                "Project {} created with {} placeholder unit(s)",
                project_id, draft.unit_count
            );
            Self::project_by_public_id(conn, &project_id)?
                .ok_or_else(|| AppError::internal("Project row vanished after insert"))
        })
    }

    /// Fetch a project with its units eagerly loaded
    pub fn get_project_by_id(&self, project_id: &str) -> AppResult<Option<Project>> {
        debug!("Fetching project by id: {}", project_id);
        let conn = self.database.get_connection()?;
        let result = Self::project_by_public_id(&conn, project_id);
        self.database.return_connection(conn);
        result
    }

    /// Fetch every project sharing a name. Several projects may share one
    /// name; resolution through this lookup is ambiguous by design.
    pub fn get_projects_by_name(&self, name: &str) -> AppResult<Vec<Project>> {
        debug!("Fetching projects by name: {}", name);
        let conn = self.database.get_connection()?;

        let result = (|| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM projects WHERE name = ?1 ORDER BY id",
                PROJECT_COLUMNS
            ))?;
            let mut projects = stmt
                .query_map(params![name], Self::row_to_project)?
                .collect::<Result<Vec<_>, _>>()?;
            for project in &mut projects {
                project.units = Self::units_for_project(&conn, &project.project_id)?;
            }
            Ok(projects)
        })();

        self.database.return_connection(conn);
        result
    }

    /// All projects with their units eagerly loaded
    pub fn list_projects(&self) -> AppResult<Vec<Project>> {
        debug!("Listing all projects");
        let conn = self.database.get_connection()?;

        let result = (|| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM projects ORDER BY id",
                PROJECT_COLUMNS
            ))?;
            let mut projects = stmt
                .query_map([], Self::row_to_project)?
                .collect::<Result<Vec<_>, _>>()?;
            for project in &mut projects {
                project.units = Self::units_for_project(&conn, &project.project_id)?;
            }
            Ok(projects)
        })();

        self.database.return_connection(conn);
        result
    }

    pub fn get_unit_by_id(&self, id: i64) -> AppResult<Option<Unit>> {
        debug!("Fetching unit by id: {}", id);
        let conn = self.database.get_connection()?;
        let unit = conn
            .query_row(
                &format!("SELECT {} FROM units WHERE id = ?1", UNIT_COLUMNS),
                params![id],
                Self::row_to_unit,
            )
            .optional()
            .map_err(AppError::from);
        self.database.return_connection(conn);
        unit
    }

    /// Apply a partial update to one unit.
    ///
    /// Exactly one `UPDATE ... WHERE id = ?` is issued; no other unit row is
    /// touched, so surrogate ids stay stable across modifications. Returns
    /// true iff one row was affected; an unknown id yields false, not an
    /// error. An empty patch degenerates to an existence check.
    pub fn update_unit(&self, unit_id: i64, patch: UnitUpdateData) -> AppResult<bool> {
        info!("Updating unit {}", unit_id);

        if let Some(number) = &patch.unit_number {
            if number.trim().is_empty() {
                return Err(AppError::validation(
                    "unit_number",
                    "Unit number cannot be empty",
                ));
            }
        }
        if let Some(area) = patch.area {
            if area < 0.0 {
                return Err(AppError::validation("area", "Area cannot be negative"));
            }
        }

        self.database.with_transaction(|conn| {
            if patch.is_empty() {
                let exists = conn
                    .query_row(
                        "SELECT 1 FROM units WHERE id = ?1",
                        params![unit_id],
                        |_row| Ok(()),
                    )
                    .optional()?
                    .is_some();
                return Ok(exists);
            }

            let mut assignments: Vec<&'static str> = Vec::new();
            let mut values: Vec<Box<dyn ToSql>> = Vec::new();

            if let Some(unit_number) = patch.unit_number {
                assignments.push("unit_number = ?");
                values.push(Box::new(unit_number));
            }
            if let Some(area) = patch.area {
                assignments.push("area = ?");
                values.push(Box::new(area));
            }
            if let Some(condo_type) = patch.condo_type {
                assignments.push("condo_type = ?");
                values.push(Box::new(condo_type.to_string()));
            }
            if let Some(status) = patch.status {
                assignments.push("status = ?");
                values.push(Box::new(status.to_string()));
            }
            if let Some(price) = patch.estimated_price {
                assignments.push("estimated_price = ?");
                values.push(Box::new(price));
            }
            if let Some(owner_name) = patch.owner_name {
                assignments.push("owner_name = ?");
                values.push(Box::new(owner_name));
            }
            if let Some(fees) = patch.calculated_monthly_fees {
                assignments.push("calculated_monthly_fees = ?");
                values.push(Box::new(fees));
            }
            values.push(Box::new(unit_id));

            let sql = format!("UPDATE units SET {} WHERE id = ?", assignments.join(", "));
            let param_refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
            let affected = conn.execute(&sql, &param_refs[..])?;

            debug!("Unit {} update affected {} row(s)", unit_id, affected);
            Ok(affected == 1)
        })
    }

    /// Grow or shrink a project to `new_count` units, transactionally.
    ///
    /// Growing appends placeholder units, continuing the `UNIT-N` numbering
    /// monotonically. Shrinking removes the highest-numbered units, and only
    /// if each of them is still an available placeholder; otherwise the whole
    /// adjustment fails with `CannotShrink` and no row changes.
    pub fn update_project_units(&self, project_id: &str, new_count: i64) -> AppResult<Project> {
        info!(
            "Adjusting unit count of project {} to {}",
            project_id, new_count
        );
        if new_count < 0 {
            return Err(AppError::validation(
                "unit_count",
                "Unit count cannot be negative",
            ));
        }

        self.database.with_transaction(|conn| {
            let Some(project) = Self::project_by_public_id(conn, project_id)? else {
                return Err(AppError::not_found("Project", "project_id", project_id));
            };
            let current = project.units.len() as i64;

            if new_count > current {
                let mut next = project
                    .units
                    .iter()
                    .filter_map(Unit::placeholder_index)
                    .max()
                    .unwrap_or(current);
                for _ in current..new_count {
                    next += 1;
                    Self::insert_placeholder_unit(conn, project_id, next)?;
                }
            } else if new_count < current {
                let needed = (current - new_count) as usize;
                let mut ordered: Vec<&Unit> = project.units.iter().collect();
                ordered.sort_by(|a, b| {
                    b.placeholder_index()
                        .cmp(&a.placeholder_index())
                        .then_with(|| b.unit_number.cmp(&a.unit_number))
                });

                let doomed = &ordered[..needed];
                if let Some(blocker) = doomed.iter().find(|u| !u.is_removable_placeholder()) {
                    return Err(AppError::CannotShrink {
                        project_id: project_id.to_string(),
                        reason: format!(
                            "unit {} is {} and owned by {}",
                            blocker.unit_number, blocker.status, blocker.owner_name
                        ),
                    });
                }
                for unit in doomed {
                    conn.execute("DELETE FROM units WHERE id = ?1", params![unit.id])?;
                }
            }

            conn.execute(
                "UPDATE projects SET unit_count = ?1 WHERE project_id = ?2",
                params![new_count, project_id],
            )?;

            Self::project_by_public_id(conn, project_id)?
                .ok_or_else(|| AppError::internal("Project row vanished during unit adjustment"))
        })
    }

    /// Delete a project; `ON DELETE CASCADE` removes its units
    pub fn delete_project_by_id(&self, project_id: &str) -> AppResult<()> {
        info!("Deleting project {}", project_id);

        self.database.with_transaction(|conn| {
            let affected = conn.execute(
                "DELETE FROM projects WHERE project_id = ?1",
                params![project_id],
            )?;
            if affected == 0 {
                return Err(AppError::not_found("Project", "project_id", project_id));
            }
            debug!("Project {} deleted", project_id);
            Ok(())
        })
    }

    /// Delete a project by name, kept for backward compatibility.
    ///
    /// New callers should resolve ids themselves; a name matching several
    /// projects fails with `AmbiguousName` instead of silently picking one.
    pub fn delete_project(&self, project_name: &str) -> AppResult<()> {
        warn!(
            "Deleting project by name '{}'; name resolution is ambiguous, prefer ids",
            project_name
        );
        let matches = self.get_projects_by_name(project_name)?;
        match matches.as_slice() {
            [] => Err(AppError::not_found("Project", "name", project_name)),
            [only] => self.delete_project_by_id(&only.project_id),
            _ => Err(AppError::AmbiguousName {
                name: project_name.to_string(),
                matches: matches.len(),
            }),
        }
    }

    /// Aggregate statistics for one project
    pub fn get_project_statistics(&self, project_id: &str) -> AppResult<ProjectStatistics> {
        debug!("Computing statistics for project {}", project_id);
        let Some(project) = self.get_project_by_id(project_id)? else {
            return Err(AppError::not_found("Project", "project_id", project_id));
        };
        let schedule = self.fee_schedule()?;
        Ok(ProjectStatistics::for_units(&project.units, &schedule))
    }

    /// Current fee rates: `system_config` when present, defaults otherwise
    pub fn fee_schedule(&self) -> AppResult<FeeSchedule> {
        let conn = self.database.get_connection()?;
        let schedule = Self::fee_schedule_on(&conn);
        self.database.return_connection(conn);
        Ok(schedule)
    }

    fn fee_schedule_on(conn: &Connection) -> FeeSchedule {
        let mut schedule = FeeSchedule::default();

        let mut stmt = match conn.prepare(
            "SELECT config_key, config_value FROM system_config
             WHERE config_key LIKE 'fee_rate_%'",
        ) {
            Ok(stmt) => stmt,
            Err(e) => {
                warn!("system_config unavailable ({}), using default fee rates", e);
                return schedule;
            }
        };

        let rows = match stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        }) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("system_config unreadable ({}), using default fee rates", e);
                return schedule;
            }
        };

        for row in rows.flatten() {
            let (key, value) = row;
            let Ok(rate) = value.trim().parse::<f64>() else {
                warn!("system_config {}: unparseable rate '{}'", key, value);
                continue;
            };
            match key.as_str() {
                "fee_rate_residential" => schedule.residential = rate,
                "fee_rate_commercial" => schedule.commercial = rate,
                "fee_rate_parking" => schedule.parking = rate,
                "fee_rate_storage" => schedule.storage = rate,
                other => debug!("Ignoring unrelated config key {}", other),
            }
        }

        schedule
    }

    fn insert_placeholder_unit(conn: &Connection, project_id: &str, number: i64) -> AppResult<()> {
        conn.execute(
            "INSERT INTO units (unit_number, project_id, area, condo_type, status, owner_name)
             VALUES (?1, ?2, 0, ?3, ?4, ?5)",
            params![
                format!("{}{}", PLACEHOLDER_UNIT_PREFIX, number),
                project_id,
                CondoType::Residential.to_string(),
                UnitStatus::Available.to_string(),
                PLACEHOLDER_OWNER
            ],
        )?;
        Ok(())
    }

    fn project_by_public_id(conn: &Connection, project_id: &str) -> AppResult<Option<Project>> {
        let project = conn
            .query_row(
                &format!("SELECT {} FROM projects WHERE project_id = ?1", PROJECT_COLUMNS),
                params![project_id],
                Self::row_to_project,
            )
            .optional()?;

        match project {
            Some(mut project) => {
                project.units = Self::units_for_project(conn, &project.project_id)?;
                Ok(Some(project))
            }
            None => Ok(None),
        }
    }

    fn units_for_project(conn: &Connection, project_id: &str) -> AppResult<Vec<Unit>> {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM units WHERE project_id = ?1 ORDER BY id",
            UNIT_COLUMNS
        ))?;
        let units = stmt
            .query_map(params![project_id], Self::row_to_unit)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    fn row_to_project(row: &Row) -> rusqlite::Result<Project> {
        Ok(Project {
            id: row.get(0)?,
            project_id: row.get(1)?,
            name: row.get(2)?,
            address: row.get(3)?,
            building_area: row.get(4)?,
            land_area: row.get(5)?,
            construction_year: row.get(6)?,
            unit_count: row.get(7)?,
            constructor: row.get(8)?,
            creation_date: row.get(9)?,
            status: row
                .get::<_, String>(10)?
                .parse()
                .unwrap_or(ProjectStatus::Active),
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            units: Vec::new(),
        })
    }

    fn row_to_unit(row: &Row) -> rusqlite::Result<Unit> {
        Ok(Unit {
            id: row.get(0)?,
            unit_number: row.get(1)?,
            project_id: row.get(2)?,
            area: row.get(3)?,
            condo_type: row
                .get::<_, String>(4)?
                .parse()
                .unwrap_or(CondoType::Residential),
            status: row
                .get::<_, String>(5)?
                .parse()
                .unwrap_or(UnitStatus::Available),
            estimated_price: row.get(6)?,
            owner_name: row.get(7)?,
            calculated_monthly_fees: row.get(8)?,
        })
    }
}

const PROJECT_COLUMNS: &str = "id, project_id, name, address, building_area, land_area, \
     construction_year, unit_count, constructor, creation_date, status, created_at, updated_at";

const UNIT_COLUMNS: &str = "id, unit_number, project_id, area, condo_type, status, \
     estimated_price, owner_name, calculated_monthly_fees";

// =============================================================================
// User Service
// =============================================================================

pub struct UserService {
    database: Arc<Database>,
}

impl UserService {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Create a new user. The password hash is produced by the caller with
    /// [`PasswordHasher::hash`].
    pub fn create_user(&self, draft: NewUser) -> AppResult<User> {
        info!("Creating new user: {}", draft.username);
        draft.validate()?;

        if self.username_exists(&draft.username)? {
            return Err(AppError::DuplicateRecord {
                entity: "User".to_string(),
                field: "username".to_string(),
                value: draft.username,
            });
        }
        if self.email_exists(&draft.email)? {
            return Err(AppError::DuplicateRecord {
                entity: "User".to_string(),
                field: "email".to_string(),
                value: draft.email,
            });
        }

        self.database.with_transaction(|conn| {
            let id = conn.query_row(
                "INSERT INTO users (username, email, password_hash, role, full_name,
                 condo_unit, phone, is_active, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 RETURNING id",
                params![
                    draft.username,
                    draft.email,
                    draft.password_hash,
                    draft.role.to_string(),
                    draft.full_name,
                    draft.condo_unit,
                    draft.phone,
                    draft.is_active,
                    Utc::now()
                ],
                |row| row.get::<_, i64>(0),
            )?;

            debug!("User created with id {}", id);
            Self::user_by_id_on(conn, id)?
                .ok_or_else(|| AppError::internal("User row vanished after insert"))
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> AppResult<Option<User>> {
        debug!("Fetching user by id: {}", id);
        let conn = self.database.get_connection()?;
        let user = Self::user_by_id_on(&conn, id);
        self.database.return_connection(conn);
        user
    }

    pub fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        debug!("Fetching user by username: {}", username);
        let conn = self.database.get_connection()?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE username = ?1", USER_COLUMNS),
                params![username],
                Self::row_to_user,
            )
            .optional()
            .map_err(AppError::from);
        self.database.return_connection(conn);
        user
    }

    /// All users, unfiltered; ordering unspecified
    pub fn get_all_users(&self) -> AppResult<Vec<User>> {
        debug!("Fetching all users");
        let conn = self.database.get_connection()?;

        let result = (|| {
            let mut stmt = conn.prepare(&format!("SELECT {} FROM users", USER_COLUMNS))?;
            let users = stmt
                .query_map([], Self::row_to_user)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(users)
        })();

        self.database.return_connection(conn);
        result
    }

    /// Merge non-None fields into the stored record and re-validate
    pub fn update_user(&self, id: i64, updates: UserUpdateData) -> AppResult<User> {
        info!("Updating user {}", id);

        self.database.with_transaction(|conn| {
            let Some(current) = Self::user_by_id_on(conn, id)? else {
                return Err(AppError::not_found("User", "id", id.to_string()));
            };
            let merged = updates.apply_to(current);
            merged.validate()?;

            let clash: i64 = conn.query_row(
                "SELECT COUNT(*) FROM users WHERE (username = ?1 OR email = ?2) AND id != ?3",
                params![merged.username, merged.email, id],
                |row| row.get(0),
            )?;
            if clash > 0 {
                return Err(AppError::DuplicateRecord {
                    entity: "User".to_string(),
                    field: "username or email".to_string(),
                    value: merged.username,
                });
            }

            conn.execute(
                "UPDATE users SET username = ?1, email = ?2, password_hash = ?3, role = ?4,
                 full_name = ?5, condo_unit = ?6, phone = ?7, is_active = ?8
                 WHERE id = ?9",
                params![
                    merged.username,
                    merged.email,
                    merged.password_hash,
                    merged.role.to_string(),
                    merged.full_name,
                    merged.condo_unit,
                    merged.phone,
                    merged.is_active,
                    id
                ],
            )?;

            debug!("User {} updated", id);
            Self::user_by_id_on(conn, id)?
                .ok_or_else(|| AppError::internal("User row vanished during update"))
        })
    }

    /// Returns true iff a row was removed
    pub fn delete_user(&self, id: i64) -> AppResult<bool> {
        info!("Deleting user {}", id);
        self.database.with_transaction(|conn| {
            let affected = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
            Ok(affected > 0)
        })
    }

    pub fn delete_user_by_username(&self, username: &str) -> AppResult<bool> {
        info!("Deleting user by username: {}", username);
        self.database.with_transaction(|conn| {
            let affected = conn.execute(
                "DELETE FROM users WHERE username = ?1",
                params![username],
            )?;
            Ok(affected > 0)
        })
    }

    /// Record a login timestamp. Never fails fatally: a database error here
    /// is logged and swallowed so the login itself still succeeds.
    pub fn update_last_login(&self, id: i64, timestamp: DateTime<Utc>) {
        let result = self.database.with_transaction(|conn| {
            conn.execute(
                "UPDATE users SET last_login = ?1 WHERE id = ?2",
                params![timestamp, id],
            )?;
            Ok(())
        });
        if let Err(e) = result {
            error!("Failed to record last login for user {}: {}", id, e);
        }
    }

    /// Verify credentials and return the user on success.
    ///
    /// Unknown user, inactive account and wrong password are
    /// indistinguishable from the outside: all yield `None`.
    pub fn authenticate(&self, username: &str, password: &str) -> AppResult<Option<User>> {
        debug!("Authenticating user: {}", username);

        let Some(user) = self.get_user_by_username(username)? else {
            debug!("Authentication failed: unknown username");
            return Ok(None);
        };
        if !user.is_active {
            debug!("Authentication failed: account inactive");
            return Ok(None);
        }
        if !PasswordHasher::verify(password, &user.password_hash) {
            debug!("Authentication failed: password mismatch");
            return Ok(None);
        }

        let now = Utc::now();
        self.update_last_login(user.id, now);
        info!("User {} authenticated", user.username);
        Ok(Some(User {
            last_login: Some(now),
            ..user
        }))
    }

    /// Projection of all users for the list view
    pub fn get_users_for_display(&self) -> AppResult<Vec<UserDisplay>> {
        Ok(self
            .get_all_users()?
            .into_iter()
            .map(UserDisplay::from)
            .collect())
    }

    /// API projection of a user: omits the password hash, adds
    /// role-derived permissions
    pub fn get_user_details_for_api(&self, user: &User) -> UserDetails {
        UserDetails::for_user(user)
    }

    pub fn get_user_details_by_username(&self, username: &str) -> AppResult<Option<UserDetails>> {
        Ok(self
            .get_user_by_username(username)?
            .map(|user| UserDetails::for_user(&user)))
    }

    pub fn email_exists(&self, email: &str) -> AppResult<bool> {
        let conn = self.database.get_connection()?;
        let count: AppResult<i64> = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE LOWER(email) = LOWER(?1)",
                params![email],
                |row| row.get(0),
            )
            .map_err(AppError::from);
        self.database.return_connection(conn);
        Ok(count? > 0)
    }

    pub fn username_exists(&self, username: &str) -> AppResult<bool> {
        let conn = self.database.get_connection()?;
        let count: AppResult<i64> = conn
            .query_row(
                "SELECT COUNT(*) FROM users WHERE LOWER(username) = LOWER(?1)",
                params![username],
                |row| row.get(0),
            )
            .map_err(AppError::from);
        self.database.return_connection(conn);
        Ok(count? > 0)
    }

    fn user_by_id_on(conn: &Connection, id: i64) -> AppResult<Option<User>> {
        conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![id],
            Self::row_to_user,
        )
        .optional()
        .map_err(AppError::from)
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            id: row.get(0)?,
            username: row.get(1)?,
            email: row.get(2)?,
            password_hash: row.get(3)?,
            role: row.get::<_, String>(4)?.parse().unwrap_or(UserRole::Guest),
            full_name: row.get(5)?,
            condo_unit: row.get(6)?,
            phone: row.get(7)?,
            is_active: row.get(8)?,
            created_at: row.get(9)?,
            last_login: row.get(10)?,
        })
    }
}

const USER_COLUMNS: &str = "id, username, email, password_hash, role, full_name, condo_unit, \
     phone, is_active, created_at, last_login";

// =============================================================================
// Feature Flag Service
// =============================================================================

pub struct FeatureFlagService {
    database: Arc<Database>,
}

impl FeatureFlagService {
    pub fn new(database: Arc<Database>) -> Self {
        Self { database }
    }

    /// Whether a gated module is enabled.
    ///
    /// Reads the table on every call; no caching. An absent row or a failed
    /// read fails open: modules activate by default. Flags have no write
    /// API; they are administered by direct SQL access.
    pub fn is_enabled(&self, flag_name: &str) -> bool {
        match self.read_flag(flag_name) {
            Ok(Some(enabled)) => enabled,
            Ok(None) => {
                debug!("Feature flag {} not configured, defaulting to enabled", flag_name);
                true
            }
            Err(e) => {
                warn!("Feature flag {} read failed ({}), failing open", flag_name, e);
                true
            }
        }
    }

    /// All configured flags, for the admin view
    pub fn list_flags(&self) -> AppResult<Vec<FeatureFlag>> {
        let conn = self.database.get_connection()?;

        let result = (|| {
            let mut stmt = conn.prepare(
                "SELECT id, flag_name, is_enabled, description FROM feature_flags ORDER BY flag_name",
            )?;
            let flags = stmt
                .query_map([], |row| {
                    Ok(FeatureFlag {
                        id: row.get(0)?,
                        flag_name: row.get(1)?,
                        is_enabled: row.get(2)?,
                        description: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(flags)
        })();

        self.database.return_connection(conn);
        result
    }

    fn read_flag(&self, flag_name: &str) -> AppResult<Option<bool>> {
        let conn = self.database.get_connection()?;
        let enabled = conn
            .query_row(
                "SELECT is_enabled FROM feature_flags WHERE flag_name = ?1",
                params![flag_name],
                |row| row.get::<_, bool>(0),
            )
            .optional()
            .map_err(AppError::from);
        self.database.return_connection(conn);
        enabled
    }
}

// =============================================================================
// Main Services Struct
// =============================================================================

pub struct Services {
    pub projects: Arc<ProjectService>,
    pub users: Arc<UserService>,
    pub feature_flags: Arc<FeatureFlagService>,
}

impl Services {
    pub fn init(database: Arc<Database>) -> AppResult<Self> {
        info!("Initializing services layer");

        let projects = Arc::new(ProjectService::new(database.clone()));
        let users = Arc::new(UserService::new(database.clone()));
        let feature_flags = Arc::new(FeatureFlagService::new(database));

        info!("Services layer initialized successfully");
        Ok(Services {
            projects,
            users,
            feature_flags,
        })
    }
}

// Test modules
#[cfg(test)]
pub mod tests;

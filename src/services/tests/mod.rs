//! Service-layer tests against the shipped schema

use super::*;
use crate::errors::AppError;
use crate::models::*;
use crate::test_fixtures::{generators::*, TestDatabase};
use assert_matches::assert_matches;
use rusqlite::params;
use std::collections::BTreeSet;

fn setup() -> (TestDatabase, Services) {
    let db = TestDatabase::new().unwrap();
    let services = db.services().unwrap();
    (db, services)
}

fn unit_count_for(db: &TestDatabase, project_id: &str) -> i64 {
    let conn = db.database().get_connection().unwrap();
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM units WHERE project_id = ?1",
            params![project_id],
            |row| row.get(0),
        )
        .unwrap();
    db.database().return_connection(conn);
    count
}

// =============================================================================
// Project lifecycle
// =============================================================================

#[test]
fn test_create_project_provisions_placeholder_units() {
    let (_db, services) = setup();

    let project = services
        .projects
        .create_project(sample_new_project("Les Jardins", 3))
        .unwrap();

    assert_eq!(project.status, ProjectStatus::Active);
    assert_eq!(project.unit_count, 3);
    assert_eq!(project.units.len(), 3);
    assert_eq!(project.count_available(), 3);

    let numbers: Vec<&str> = project.units.iter().map(|u| u.unit_number.as_str()).collect();
    assert_eq!(numbers, vec!["UNIT-1", "UNIT-2", "UNIT-3"]);
    for unit in &project.units {
        assert_eq!(unit.condo_type, CondoType::Residential);
        assert_eq!(unit.status, UnitStatus::Available);
        assert_eq!(unit.owner_name, PLACEHOLDER_OWNER);
        assert_eq!(unit.area, 0.0);
        assert_eq!(unit.project_id, project.project_id);
    }
}

#[test]
fn test_create_project_with_zero_units() {
    let (_db, services) = setup();

    let project = services
        .projects
        .create_project(sample_new_project("Lot Vide", 0))
        .unwrap();
    assert_eq!(project.unit_count, 0);
    assert!(project.units.is_empty());
}

#[test]
fn test_create_project_rejects_invalid_drafts() {
    let (_db, services) = setup();

    let mut draft = sample_new_project("", 2);
    assert_matches!(
        services.projects.create_project(draft.clone()).unwrap_err(),
        AppError::Validation { .. }
    );

    draft.name = "Tour B".to_string();
    draft.building_area = 0.0;
    assert_matches!(
        services.projects.create_project(draft.clone()).unwrap_err(),
        AppError::Validation { .. }
    );

    draft.building_area = 1000.0;
    draft.unit_count = -1;
    assert_matches!(
        services.projects.create_project(draft).unwrap_err(),
        AppError::Validation { .. }
    );
}

// =============================================================================
// Unit update protocol
// =============================================================================

#[test]
fn test_unit_ids_stable_across_update() {
    let (_db, services) = setup();

    let project = services
        .projects
        .create_project(sample_new_project("Stabilite", 10))
        .unwrap();
    let before = project.units.clone();
    let ids_before: BTreeSet<i64> = before.iter().map(|u| u.id).collect();
    let target = before[4].clone();

    let changed = services
        .projects
        .update_unit(
            target.id,
            UnitUpdateData {
                owner_name: Some("Alice".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(changed);

    let after = services
        .projects
        .get_project_by_id(&project.project_id)
        .unwrap()
        .unwrap()
        .units;
    let ids_after: BTreeSet<i64> = after.iter().map(|u| u.id).collect();
    assert_eq!(ids_before, ids_after);

    for unit in &after {
        let previous = before.iter().find(|u| u.id == unit.id).unwrap();
        if unit.id == target.id {
            assert_eq!(unit.owner_name, "Alice");
            assert_eq!(unit.unit_number, previous.unit_number);
            assert_eq!(unit.status, previous.status);
            assert_eq!(unit.area, previous.area);
        } else {
            assert_eq!(unit, previous);
        }
    }
}

#[test]
fn test_update_unit_unknown_id_returns_false() {
    let (_db, services) = setup();
    let changed = services
        .projects
        .update_unit(
            424242,
            UnitUpdateData {
                owner_name: Some("Nobody".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(!changed);
}

#[test]
fn test_update_unit_empty_patch_is_existence_check() {
    let (_db, services) = setup();
    let project = services
        .projects
        .create_project(sample_new_project("Vide", 1))
        .unwrap();

    assert!(services
        .projects
        .update_unit(project.units[0].id, UnitUpdateData::default())
        .unwrap());
    assert!(!services
        .projects
        .update_unit(999_999, UnitUpdateData::default())
        .unwrap());
}

#[test]
fn test_update_unit_duplicate_number_is_constraint_error() {
    let (_db, services) = setup();
    let project = services
        .projects
        .create_project(sample_new_project("Doublon", 2))
        .unwrap();

    let err = services
        .projects
        .update_unit(
            project.units[1].id,
            UnitUpdateData {
                unit_number: Some("UNIT-1".to_string()),
                ..Default::default()
            },
        )
        .unwrap_err();
    assert_matches!(err, AppError::Constraint { .. });
}

#[test]
fn test_update_unit_normalizes_enum_input() {
    let (db, services) = setup();
    let project = services
        .projects
        .create_project(sample_new_project("Normalise", 1))
        .unwrap();
    let unit_id = project.units[0].id;

    // Uppercase display forms coming off the wire normalize to the
    // canonical lowercase stored form.
    let patch: UnitUpdateData =
        serde_json::from_str(r#"{"status": "SOLD", "condo_type": "COMMERCIAL"}"#).unwrap();
    assert!(services.projects.update_unit(unit_id, patch).unwrap());

    let unit = services.projects.get_unit_by_id(unit_id).unwrap().unwrap();
    assert_eq!(unit.status, UnitStatus::Sold);
    assert_eq!(unit.condo_type, CondoType::Commercial);

    let conn = db.database().get_connection().unwrap();
    let (status, condo_type): (String, String) = conn
        .query_row(
            "SELECT status, condo_type FROM units WHERE id = ?1",
            params![unit_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    db.database().return_connection(conn);
    assert_eq!(status, "sold");
    assert_eq!(condo_type, "commercial");
}

#[test]
fn test_update_unit_preserves_stored_fees_when_absent() {
    let (_db, services) = setup();
    let project = services
        .projects
        .create_project(sample_new_project("Frais", 1))
        .unwrap();
    let unit_id = project.units[0].id;

    services
        .projects
        .update_unit(
            unit_id,
            UnitUpdateData {
                calculated_monthly_fees: Some("123.45".to_string()),
                ..Default::default()
            },
        )
        .unwrap();
    services
        .projects
        .update_unit(
            unit_id,
            UnitUpdateData {
                area: Some(70.0),
                ..Default::default()
            },
        )
        .unwrap();

    let unit = services.projects.get_unit_by_id(unit_id).unwrap().unwrap();
    assert_eq!(unit.calculated_monthly_fees.as_deref(), Some("123.45"));
    assert_eq!(unit.area, 70.0);
}

// =============================================================================
// Unit count adjustment
// =============================================================================

#[test]
fn test_grow_continues_numbering_monotonically() {
    let (_db, services) = setup();
    let project = services
        .projects
        .create_project(sample_new_project("Croissance", 3))
        .unwrap();

    let grown = services
        .projects
        .update_project_units(&project.project_id, 5)
        .unwrap();
    assert_eq!(grown.unit_count, 5);
    let numbers: Vec<&str> = grown.units.iter().map(|u| u.unit_number.as_str()).collect();
    assert_eq!(
        numbers,
        vec!["UNIT-1", "UNIT-2", "UNIT-3", "UNIT-4", "UNIT-5"]
    );
}

#[test]
fn test_adjust_round_trip_restores_count() {
    let (_db, services) = setup();
    let project = services
        .projects
        .create_project(sample_new_project("AllerRetour", 4))
        .unwrap();

    let grown = services
        .projects
        .update_project_units(&project.project_id, 7)
        .unwrap();
    assert_eq!(grown.units.len(), 7);
    assert_eq!(grown.unit_count, 7);

    let back = services
        .projects
        .update_project_units(&project.project_id, 4)
        .unwrap();
    assert_eq!(back.units.len(), 4);
    assert_eq!(back.unit_count, 4);
}

#[test]
fn test_adjust_to_same_count_is_a_noop() {
    let (_db, services) = setup();
    let project = services
        .projects
        .create_project(sample_new_project("Statique", 2))
        .unwrap();
    let ids: BTreeSet<i64> = project.units.iter().map(|u| u.id).collect();

    let same = services
        .projects
        .update_project_units(&project.project_id, 2)
        .unwrap();
    let ids_after: BTreeSet<i64> = same.units.iter().map(|u| u.id).collect();
    assert_eq!(ids, ids_after);
}

#[test]
fn test_shrink_removes_highest_numbered_available_units() {
    let (db, services) = setup();
    let project = services
        .projects
        .create_project(sample_new_project("Retrait", 3))
        .unwrap();

    // Middle unit sold: the shrink only needs to drop UNIT-3, which is
    // still an available placeholder.
    let sold = project
        .units
        .iter()
        .find(|u| u.unit_number == "UNIT-2")
        .unwrap();
    services
        .projects
        .update_unit(
            sold.id,
            UnitUpdateData {
                status: Some(UnitStatus::Sold),
                owner_name: Some("Bob".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let shrunk = services
        .projects
        .update_project_units(&project.project_id, 2)
        .unwrap();
    assert_eq!(shrunk.unit_count, 2);
    let numbers: Vec<&str> = shrunk.units.iter().map(|u| u.unit_number.as_str()).collect();
    assert_eq!(numbers, vec!["UNIT-1", "UNIT-2"]);
    assert_eq!(unit_count_for(&db, &project.project_id), 2);
}

#[test]
fn test_shrink_fails_when_highest_numbered_unit_is_sold() {
    let (db, services) = setup();
    let project = services
        .projects
        .create_project(sample_new_project("Bloque", 3))
        .unwrap();

    let top = project
        .units
        .iter()
        .find(|u| u.unit_number == "UNIT-3")
        .unwrap();
    services
        .projects
        .update_unit(
            top.id,
            UnitUpdateData {
                status: Some(UnitStatus::Sold),
                owner_name: Some("Bob".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    let err = services
        .projects
        .update_project_units(&project.project_id, 2)
        .unwrap_err();
    assert_matches!(err, AppError::CannotShrink { .. });

    // Nothing changed: row count and the unit_count column both still 3.
    let unchanged = services
        .projects
        .get_project_by_id(&project.project_id)
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.unit_count, 3);
    assert_eq!(unchanged.units.len(), 3);
    assert_eq!(unit_count_for(&db, &project.project_id), 3);
}

#[test]
fn test_unit_count_column_tracks_cardinality() {
    let (db, services) = setup();
    let project = services
        .projects
        .create_project(sample_new_project("Inventaire", 5))
        .unwrap();
    assert_eq!(project.unit_count, unit_count_for(&db, &project.project_id));

    for target in [8, 2, 6] {
        let adjusted = services
            .projects
            .update_project_units(&project.project_id, target)
            .unwrap();
        assert_eq!(adjusted.unit_count, target);
        assert_eq!(unit_count_for(&db, &project.project_id), target);
    }
}

#[test]
fn test_adjust_unknown_project_is_not_found() {
    let (_db, services) = setup();
    assert_matches!(
        services
            .projects
            .update_project_units("no-such-id", 2)
            .unwrap_err(),
        AppError::RecordNotFound { .. }
    );
}

// =============================================================================
// Deletion and lookups
// =============================================================================

#[test]
fn test_delete_project_cascades_to_units() {
    let (db, services) = setup();
    let project = services
        .projects
        .create_project(sample_new_project("Demolition", 5))
        .unwrap();
    let unit_ids: Vec<i64> = project.units.iter().map(|u| u.id).collect();

    services
        .projects
        .delete_project_by_id(&project.project_id)
        .unwrap();

    assert!(services
        .projects
        .get_project_by_id(&project.project_id)
        .unwrap()
        .is_none());
    assert_eq!(unit_count_for(&db, &project.project_id), 0);
    for id in unit_ids {
        assert!(services.projects.get_unit_by_id(id).unwrap().is_none());
    }
}

#[test]
fn test_delete_project_by_id_unknown_is_not_found() {
    let (_db, services) = setup();
    assert_matches!(
        services.projects.delete_project_by_id("missing").unwrap_err(),
        AppError::RecordNotFound { .. }
    );
}

#[test]
fn test_delete_project_by_name_resolution() {
    let (_db, services) = setup();

    services
        .projects
        .create_project(sample_new_project("Tour Sud", 1))
        .unwrap();
    services
        .projects
        .create_project(sample_new_project("Tour Sud", 2))
        .unwrap();
    let lone = services
        .projects
        .create_project(sample_new_project("Tour Nord", 1))
        .unwrap();

    assert_matches!(
        services.projects.delete_project("Tour Sud").unwrap_err(),
        AppError::AmbiguousName { matches: 2, .. }
    );
    assert_matches!(
        services.projects.delete_project("Tour Ouest").unwrap_err(),
        AppError::RecordNotFound { .. }
    );

    services.projects.delete_project("Tour Nord").unwrap();
    assert!(services
        .projects
        .get_project_by_id(&lone.project_id)
        .unwrap()
        .is_none());
}

#[test]
fn test_get_projects_by_name_returns_every_match() {
    let (_db, services) = setup();
    services
        .projects
        .create_project(sample_new_project("Jumeaux", 1))
        .unwrap();
    services
        .projects
        .create_project(sample_new_project("Jumeaux", 2))
        .unwrap();

    let matches = services.projects.get_projects_by_name("Jumeaux").unwrap();
    assert_eq!(matches.len(), 2);
    assert_ne!(matches[0].project_id, matches[1].project_id);
}

#[test]
fn test_list_projects_loads_units_eagerly() {
    let (_db, services) = setup();
    services
        .projects
        .create_project(sample_new_project("Alpha", 2))
        .unwrap();
    services
        .projects
        .create_project(sample_new_project("Beta", 3))
        .unwrap();

    let projects = services.projects.list_projects().unwrap();
    assert_eq!(projects.len(), 2);
    let total_units: usize = projects.iter().map(|p| p.units.len()).sum();
    assert_eq!(total_units, 5);
}

// =============================================================================
// Fee computation and statistics
// =============================================================================

fn bare_unit(area: f64, condo_type: CondoType) -> Unit {
    Unit {
        id: 0,
        unit_number: "UNIT-1".to_string(),
        project_id: "p".to_string(),
        area,
        condo_type,
        status: UnitStatus::Available,
        estimated_price: None,
        owner_name: PLACEHOLDER_OWNER.to_string(),
        calculated_monthly_fees: None,
    }
}

#[test]
fn test_calculate_monthly_fee_uses_type_specific_rates() {
    let schedule = FeeSchedule::default();
    assert_eq!(
        calculate_monthly_fee(&bare_unit(100.0, CondoType::Residential), &schedule),
        45.0
    );
    assert_eq!(
        calculate_monthly_fee(&bare_unit(80.0, CondoType::Commercial), &schedule),
        48.0
    );
    assert_eq!(
        calculate_monthly_fee(&bare_unit(20.0, CondoType::Parking), &schedule),
        3.0
    );
    assert_eq!(
        calculate_monthly_fee(&bare_unit(40.0, CondoType::Storage), &schedule),
        10.0
    );
}

#[test]
fn test_calculate_monthly_fee_rounds_to_two_decimals() {
    let schedule = FeeSchedule::default();
    // 33.333 * 0.45 = 14.99985 -> 15.00
    assert_eq!(
        calculate_monthly_fee(&bare_unit(33.333, CondoType::Residential), &schedule),
        15.0
    );
}

#[test]
fn test_effective_fee_prefers_parseable_stored_value() {
    let schedule = FeeSchedule::default();

    let mut unit = bare_unit(100.0, CondoType::Residential);
    unit.calculated_monthly_fees = Some("99.99".to_string());
    assert_eq!(effective_monthly_fee(&unit, &schedule), 99.99);

    // Unparseable stored text falls back to the computed fee.
    unit.calculated_monthly_fees = Some("n/a".to_string());
    assert_eq!(effective_monthly_fee(&unit, &schedule), 45.0);

    unit.calculated_monthly_fees = None;
    assert_eq!(effective_monthly_fee(&unit, &schedule), 45.0);
}

#[test]
fn test_project_statistics() {
    let (_db, services) = setup();
    let project = services
        .projects
        .create_project(sample_new_project("Stats", 4))
        .unwrap();
    let units = &project.units;

    let patches = [
        (
            units[0].id,
            UnitUpdateData {
                area: Some(100.0),
                ..Default::default()
            },
        ),
        (
            units[1].id,
            UnitUpdateData {
                area: Some(80.0),
                condo_type: Some(CondoType::Commercial),
                status: Some(UnitStatus::Reserved),
                ..Default::default()
            },
        ),
        (
            units[2].id,
            UnitUpdateData {
                area: Some(20.0),
                condo_type: Some(CondoType::Parking),
                status: Some(UnitStatus::Sold),
                owner_name: Some("Carole".to_string()),
                ..Default::default()
            },
        ),
        (
            units[3].id,
            UnitUpdateData {
                area: Some(50.0),
                status: Some(UnitStatus::Maintenance),
                calculated_monthly_fees: Some("99.99".to_string()),
                ..Default::default()
            },
        ),
    ];
    for (id, patch) in patches {
        assert!(services.projects.update_unit(id, patch).unwrap());
    }

    let stats = services
        .projects
        .get_project_statistics(&project.project_id)
        .unwrap();
    assert_eq!(stats.total_units, 4);
    assert_eq!(stats.available, 1);
    assert_eq!(stats.reserved, 1);
    assert_eq!(stats.sold, 1);
    assert_eq!(stats.maintenance, 1);
    assert_eq!(stats.avg_area, 62.5);
    // 45.00 + 48.00 + 3.00 + 99.99 (stored override)
    assert!((stats.total_monthly_fees - 195.99).abs() < 1e-9);
}

#[test]
fn test_fee_schedule_reads_system_config() {
    let (db, services) = setup();

    assert_eq!(
        services.projects.fee_schedule().unwrap(),
        FeeSchedule::default()
    );

    db.execute(
        "UPDATE system_config SET config_value = '0.50'
         WHERE config_key = 'fee_rate_residential'",
    )
    .unwrap();

    let schedule = services.projects.fee_schedule().unwrap();
    assert_eq!(schedule.residential, 0.50);
    assert_eq!(schedule.commercial, 0.60);
    assert_eq!(
        calculate_monthly_fee(&bare_unit(100.0, CondoType::Residential), &schedule),
        50.0
    );
}

#[test]
fn test_fee_schedule_survives_a_missing_table() {
    let (db, services) = setup();
    db.execute("DROP TABLE system_config").unwrap();
    assert_eq!(
        services.projects.fee_schedule().unwrap(),
        FeeSchedule::default()
    );
}

// =============================================================================
// Users
// =============================================================================

#[test]
fn test_create_and_fetch_user() {
    let (_db, services) = setup();
    let created = services
        .users
        .create_user(sample_new_user("alice", UserRole::Resident))
        .unwrap();
    assert!(created.id > 0);

    let fetched = services
        .users
        .get_user_by_username("alice")
        .unwrap()
        .unwrap();
    assert_eq!(fetched.id, created.id);
    assert_eq!(fetched.email, "alice@example.com");
    assert_eq!(fetched.role, UserRole::Resident);
    assert!(fetched.is_active);
    assert!(fetched.last_login.is_none());

    assert!(services.users.get_user_by_username("nobody").unwrap().is_none());
    assert!(services.users.get_user_by_id(999_999).unwrap().is_none());
}

#[test]
fn test_duplicate_username_fails_without_partial_row() {
    let (_db, services) = setup();
    services
        .users
        .create_user(sample_new_user("bob", UserRole::Guest))
        .unwrap();
    let before = services.users.get_all_users().unwrap().len();

    let mut clone = sample_new_user("bob", UserRole::Guest);
    clone.email = "other@example.com".to_string();
    assert_matches!(
        services.users.create_user(clone).unwrap_err(),
        AppError::DuplicateRecord { .. }
    );
    assert_eq!(services.users.get_all_users().unwrap().len(), before);
}

#[test]
fn test_duplicate_email_is_rejected() {
    let (_db, services) = setup();
    services
        .users
        .create_user(sample_new_user("carol", UserRole::Resident))
        .unwrap();

    let mut clone = sample_new_user("carol2", UserRole::Resident);
    clone.email = "carol@example.com".to_string();
    assert_matches!(
        services.users.create_user(clone).unwrap_err(),
        AppError::DuplicateRecord { .. }
    );
}

#[test]
fn test_create_user_rejects_invalid_drafts() {
    let (_db, services) = setup();

    let mut draft = sample_new_user("ab", UserRole::Guest);
    assert_matches!(
        services.users.create_user(draft.clone()).unwrap_err(),
        AppError::Validation { .. }
    );

    draft.username = "abc".to_string();
    draft.email = "not-an-email".to_string();
    assert_matches!(
        services.users.create_user(draft.clone()).unwrap_err(),
        AppError::Validation { .. }
    );

    draft.email = "abc@example.com".to_string();
    draft.password_hash = String::new();
    assert_matches!(
        services.users.create_user(draft).unwrap_err(),
        AppError::Validation { .. }
    );
}

#[test]
fn test_update_user_merges_patch_fields() {
    let (_db, services) = setup();
    let user = services
        .users
        .create_user(sample_new_user("dave", UserRole::Guest))
        .unwrap();

    let updated = services
        .users
        .update_user(
            user.id,
            UserUpdateData {
                role: Some(UserRole::Resident),
                condo_unit: Some("UNIT-7".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

    assert_eq!(updated.role, UserRole::Resident);
    assert_eq!(updated.condo_unit.as_deref(), Some("UNIT-7"));
    // Untouched fields survive the merge.
    assert_eq!(updated.username, "dave");
    assert_eq!(updated.email, "dave@example.com");
    assert_eq!(updated.password_hash, user.password_hash);
}

#[test]
fn test_update_user_rejects_clashes_and_unknown_ids() {
    let (_db, services) = setup();
    services
        .users
        .create_user(sample_new_user("erin", UserRole::Resident))
        .unwrap();
    let frank = services
        .users
        .create_user(sample_new_user("frank", UserRole::Resident))
        .unwrap();

    assert_matches!(
        services
            .users
            .update_user(
                frank.id,
                UserUpdateData {
                    username: Some("erin".to_string()),
                    ..Default::default()
                }
            )
            .unwrap_err(),
        AppError::DuplicateRecord { .. }
    );

    assert_matches!(
        services
            .users
            .update_user(999_999, UserUpdateData::default())
            .unwrap_err(),
        AppError::RecordNotFound { .. }
    );
}

#[test]
fn test_delete_user() {
    let (_db, services) = setup();
    let user = services
        .users
        .create_user(sample_new_user("gina", UserRole::Guest))
        .unwrap();

    assert!(services.users.delete_user(user.id).unwrap());
    assert!(!services.users.delete_user(user.id).unwrap());
    assert!(services.users.get_user_by_id(user.id).unwrap().is_none());
}

#[test]
fn test_delete_user_by_username() {
    let (_db, services) = setup();
    services
        .users
        .create_user(sample_new_user("henri", UserRole::Guest))
        .unwrap();

    assert!(services.users.delete_user_by_username("henri").unwrap());
    assert!(!services.users.delete_user_by_username("henri").unwrap());
}

// =============================================================================
// Authentication
// =============================================================================

#[test]
fn test_authenticate_success_records_last_login() {
    let (_db, services) = setup();
    services
        .users
        .create_user(sample_new_user("iris", UserRole::Resident))
        .unwrap();

    let user = services
        .users
        .authenticate("iris", TEST_PASSWORD)
        .unwrap()
        .expect("credentials should match");
    assert!(user.last_login.is_some());

    let stored = services
        .users
        .get_user_by_username("iris")
        .unwrap()
        .unwrap();
    assert!(stored.last_login.is_some());
}

#[test]
fn test_authenticate_failures_are_uniform() {
    let (_db, services) = setup();
    let user = services
        .users
        .create_user(sample_new_user("jack", UserRole::Resident))
        .unwrap();

    assert!(services.users.authenticate("jack", "wrong").unwrap().is_none());
    assert!(services
        .users
        .authenticate("nobody", TEST_PASSWORD)
        .unwrap()
        .is_none());

    services
        .users
        .update_user(
            user.id,
            UserUpdateData {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .unwrap();
    assert!(services
        .users
        .authenticate("jack", TEST_PASSWORD)
        .unwrap()
        .is_none());
}

#[test]
fn test_seeded_admin_can_authenticate() {
    let (_db, services) = setup();
    let admin = services
        .users
        .authenticate("admin", "admin123")
        .unwrap()
        .expect("seeded admin should authenticate");
    assert_eq!(admin.role, UserRole::Admin);
}

// =============================================================================
// User projections
// =============================================================================

#[test]
fn test_user_details_omit_hash_and_derive_permissions() {
    let (_db, services) = setup();
    let resident = services
        .users
        .create_user(sample_new_user("kate", UserRole::Resident))
        .unwrap();

    let details = services.users.get_user_details_for_api(&resident);
    assert!(!details.can_manage_users);
    assert!(details.can_access_finances);

    let json = serde_json::to_value(&details).unwrap();
    assert!(json.get("password_hash").is_none());
    assert_eq!(json["username"], "kate");

    let admin = services
        .users
        .get_user_by_username("admin")
        .unwrap()
        .unwrap();
    let admin_details = services.users.get_user_details_for_api(&admin);
    assert!(admin_details.can_manage_users);
    assert!(admin_details.can_access_finances);
}

#[test]
fn test_user_details_by_username() {
    let (_db, services) = setup();
    services
        .users
        .create_user(sample_new_user("mona", UserRole::Guest))
        .unwrap();

    let details = services
        .users
        .get_user_details_by_username("mona")
        .unwrap()
        .unwrap();
    assert_eq!(details.email, "mona@example.com");
    assert!(!details.can_access_finances);

    assert!(services
        .users
        .get_user_details_by_username("absent")
        .unwrap()
        .is_none());
}

#[test]
fn test_users_for_display_projection() {
    let (_db, services) = setup();
    services
        .users
        .create_user(sample_new_user("luc", UserRole::Guest))
        .unwrap();

    let display = services.users.get_users_for_display().unwrap();
    // Seeded admin plus the user just created.
    assert_eq!(display.len(), 2);
    let luc = display.iter().find(|u| u.username == "luc").unwrap();
    assert_eq!(luc.role, UserRole::Guest);
    assert!(luc.is_active);
}

// =============================================================================
// Feature flags
// =============================================================================

#[test]
fn test_flag_gating_reads_are_uncached() {
    let (db, services) = setup();

    assert!(services.feature_flags.is_enabled("finance_module"));

    db.execute("UPDATE feature_flags SET is_enabled = 0 WHERE flag_name = 'finance_module'")
        .unwrap();
    assert!(!services.feature_flags.is_enabled("finance_module"));

    db.execute("UPDATE feature_flags SET is_enabled = 1 WHERE flag_name = 'finance_module'")
        .unwrap();
    assert!(services.feature_flags.is_enabled("finance_module"));
}

#[test]
fn test_unknown_flag_fails_open() {
    let (_db, services) = setup();
    assert!(services.feature_flags.is_enabled("module_that_does_not_exist"));
}

#[test]
fn test_flag_read_failure_fails_open() {
    let (db, services) = setup();
    db.execute("DROP TABLE feature_flags").unwrap();
    assert!(services.feature_flags.is_enabled("finance_module"));
}

#[test]
fn test_list_flags_returns_seeded_flags() {
    let (_db, services) = setup();
    let flags = services.feature_flags.list_flags().unwrap();
    let names: Vec<&str> = flags.iter().map(|f| f.flag_name.as_str()).collect();
    assert_eq!(
        names,
        vec!["analytics_module", "finance_module", "reports_module"]
    );
    assert!(flags.iter().all(|f| f.is_enabled));
}

/// Schema migration for persisted board documents.
///
/// Migrations are applied to the raw JSON tree before deserialization, in
/// strictly increasing version order. A document without `schemaVersion`
/// is version 0 (pre-versioning).

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::types::Board;

/// Increment when making breaking changes to the persisted model.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Document root is not an object")]
    NotAnObject,

    #[error("Schema version {found} is newer than supported version {supported}")]
    UnsupportedVersion { found: i32, supported: i32 },
}

#[derive(Clone, Copy)]
struct Migration {
    version: i32,
    apply: fn(&mut Map<String, Value>),
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        apply: migrate_v0_to_v1,
    },
    Migration {
        version: 2,
        apply: migrate_v1_to_v2,
    },
];

/// Latest version known to this build.
pub fn latest_version() -> i32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Read `schemaVersion`; missing or non-integer means 0.
pub fn schema_version(root: &Value) -> i32 {
    root.get("schemaVersion")
        .and_then(Value::as_i64)
        .map(|v| v.clamp(0, i32::MAX as i64) as i32)
        .unwrap_or(0)
}

/// Bring a JSON tree up to the current version in place.
/// Returns the version the document started at.
pub fn migrate_value(root: &mut Value) -> Result<i32, MigrationError> {
    let from = schema_version(root);
    let latest = latest_version();
    if from > latest {
        return Err(MigrationError::UnsupportedVersion {
            found: from,
            supported: latest,
        });
    }

    let object = root.as_object_mut().ok_or(MigrationError::NotAnObject)?;
    for migration in MIGRATIONS.iter().filter(|m| m.version > from) {
        (migration.apply)(object);
        object.insert("schemaVersion".to_string(), Value::from(migration.version));
        log::debug!(
            "[flowdeck.migration] Applied schema migration to v{}",
            migration.version
        );
    }
    Ok(from)
}

/// Parse, migrate and deserialize a stored board document.
pub fn migrate_from_json(json: &str) -> Result<Board, MigrationError> {
    let mut root: Value = serde_json::from_str(json)?;
    migrate_value(&mut root)?;
    Ok(serde_json::from_value(root)?)
}

/// v1 only introduced fields the model supplies defaults for.
fn migrate_v0_to_v1(_root: &mut Map<String, Value>) {}

/// v2 introduced work item numbers and the board-level counter.
fn migrate_v1_to_v2(root: &mut Map<String, Value>) {
    let mut used = HashSet::new();
    let mut max = 0i32;
    let mut needs_number: Vec<(usize, usize)> = Vec::new();

    if let Some(Value::Array(columns)) = root.get("columns") {
        for (ci, column) in columns.iter().enumerate() {
            let Some(Value::Array(tasks)) = column.get("tasks") else {
                continue;
            };
            for (ti, task) in tasks.iter().enumerate() {
                if !task.is_object() {
                    continue;
                }
                match positive_int(task.get("workItemNumber")) {
                    Some(n) if used.insert(n) => max = max.max(n),
                    _ => needs_number.push((ci, ti)),
                }
            }
        }
    }

    let mut next = max.saturating_add(1).max(1);
    if let Some(Value::Array(columns)) = root.get_mut("columns") {
        for (ci, ti) in needs_number {
            if let Some(task) = columns[ci]
                .get_mut("tasks")
                .and_then(|tasks| tasks.get_mut(ti))
                .and_then(Value::as_object_mut)
            {
                task.insert("workItemNumber".to_string(), Value::from(next));
                next = next.saturating_add(1);
            }
        }
    }

    root.insert("nextWorkItemNumber".to_string(), Value::from(next));
}

fn positive_int(value: Option<&Value>) -> Option<i32> {
    value
        .and_then(Value::as_i64)
        .filter(|n| *n > 0 && *n <= i32::MAX as i64)
        .map(|n| n as i32)
}

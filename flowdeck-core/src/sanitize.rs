/// Validation and normalization of untrusted board JSON.
///
/// Everything read from storage or imported from outside passes through here
/// before it becomes a `Board`. Rejection is always a negative result
/// (`None` / `false`), never a panic.

use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use serde_json::Value;

use crate::migration::{self, CURRENT_SCHEMA_VERSION};
use crate::numbering;
use crate::types::{
    lenient, new_id, Board, BoardMetadata, Column, CustomFields, Lane, Subtask, Task,
    UNASSIGNED_LANE_ID, UNTITLED_BOARD,
};

pub const MAX_JSON_LENGTH: usize = 2_000_000;
pub const MAX_JSON_DEPTH: usize = 64;
pub const MAX_COLUMNS: usize = 120;
pub const MAX_TASKS_PER_COLUMN: usize = 500;
pub const MAX_TOTAL_TASKS: usize = 10_000;
pub const MAX_SUBTASKS_PER_TASK: usize = 200;
pub const MAX_LANES: usize = 50;
pub const MAX_TAGS: usize = 200;
pub const MAX_CUSTOM_FIELDS: usize = 100;
pub const MAX_CUSTOM_FIELD_KEY_LENGTH: usize = 80;
pub const MAX_BOARD_TITLE_LENGTH: usize = 200;
pub const MAX_BOARD_DESCRIPTION_LENGTH: usize = 4000;
pub const MAX_BOARD_CREATED_BY_LENGTH: usize = 120;
pub const MAX_COLUMN_TITLE_LENGTH: usize = 160;
pub const MAX_COLUMN_POLICY_LENGTH: usize = 2000;
pub const MAX_LANE_TITLE_LENGTH: usize = 160;
pub const MAX_LANE_DESCRIPTION_LENGTH: usize = 2000;
pub const MAX_TASK_TITLE_LENGTH: usize = 200;
pub const MAX_TASK_DESCRIPTION_LENGTH: usize = 4000;
pub const MAX_TASK_TAGS_LENGTH: usize = 300;
pub const MAX_ASSIGNEE_LENGTH: usize = 120;
pub const MAX_ASSIGNEE_ID_LENGTH: usize = 200;
pub const MAX_BLOCKED_REASON_LENGTH: usize = 400;
pub const MAX_SUBTASK_TITLE_LENGTH: usize = 160;
pub const MAX_TAG_TEXT_LENGTH: usize = 80;
pub const MAX_WIP_LIMIT: i32 = 1000;
pub const MAX_LANE_WIP_LIMIT_ENTRIES: usize = 200;
pub const MAX_AUTO_ARCHIVE_DONE_DAYS: i32 = 3650;

// ── Identifiers ─────────────────────────────────────────────────────────────

/// Canonical, non-nil UUID without surrounding whitespace.
pub fn is_valid_id(value: &str) -> bool {
    if value.trim().is_empty() || value.trim() != value {
        return false;
    }
    if value.len() != 36 {
        return false;
    }
    matches!(
        uuid::Uuid::parse_str(value),
        Ok(id) if !id.is_nil() && id.hyphenated().to_string().eq_ignore_ascii_case(value)
    )
}

/// Lowercase hyphenated form of a UUID, or `None` for anything else.
pub fn normalize_id(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    match uuid::Uuid::parse_str(trimmed) {
        Ok(id) if !id.is_nil() => Some(id.hyphenated().to_string()),
        _ => None,
    }
}

// ── Raw content checks ──────────────────────────────────────────────────────

/// Cheap gate before any parsing: non-blank, bounded length, no control
/// characters besides CR/LF/TAB, nesting within `MAX_JSON_DEPTH`.
pub fn is_safe_json_content(json: &str) -> bool {
    if json.trim().is_empty() || json.len() > MAX_JSON_LENGTH {
        return false;
    }
    if json
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\r' | '\n' | '\t'))
    {
        return false;
    }
    nesting_depth(json) <= MAX_JSON_DEPTH
}

/// Maximum bracket nesting outside string literals.
fn nesting_depth(json: &str) -> usize {
    let mut depth = 0usize;
    let mut max = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for c in json.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' | '[' => {
                depth += 1;
                max = max.max(depth);
            }
            '}' | ']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    max
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Only the fields a board list needs. Everything else is skipped unparsed.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MetadataFields {
    #[serde(default)]
    title: Option<Value>,
    #[serde(default)]
    created_at: Option<Value>,
    #[serde(default)]
    updated_at: Option<Value>,
    #[serde(default)]
    schema_version: Option<Value>,
}

/// List-display metadata from a stored document, or `None` when unsafe or
/// unparsable.
pub fn try_build_board_metadata(json: &str, fallback_id: &str) -> Option<BoardMetadata> {
    if !is_safe_json_content(json) || !json.trim_start().starts_with('{') {
        return None;
    }
    let fields: MetadataFields = match serde_json::from_str(json) {
        Ok(fields) => fields,
        Err(e) => {
            log::debug!("[flowdeck.sanitize] Metadata parse failed for {}: {}", fallback_id, e);
            return None;
        }
    };

    let version = fields
        .schema_version
        .as_ref()
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if version > i64::from(migration::latest_version()) {
        log::warn!(
            "[flowdeck.sanitize] Board {} has unsupported schema version {}",
            fallback_id,
            version
        );
        return None;
    }

    let read_date = |value: &Option<Value>| match value {
        Some(Value::String(s)) => lenient::parse_date(s),
        _ => None,
    };

    let title = match &fields.title {
        Some(Value::String(s)) => sanitize_required_text(s, MAX_BOARD_TITLE_LENGTH, false),
        _ => String::new(),
    };

    Some(BoardMetadata {
        id: fallback_id.to_string(),
        title: if title.is_empty() {
            UNTITLED_BOARD.to_string()
        } else {
            title
        },
        last_modified: read_date(&fields.updated_at).or_else(|| read_date(&fields.created_at)),
    })
}

/// Safety check, migration, deserialization and structural sanitization.
pub fn try_load_from_json(json: &str) -> Option<Board> {
    if !is_safe_json_content(json) {
        log::debug!("[flowdeck.sanitize] Rejected unsafe board content");
        return None;
    }
    match migration::migrate_from_json(json) {
        Ok(mut board) => {
            sanitize_board(&mut board);
            Some(board)
        }
        Err(e) => {
            log::debug!("[flowdeck.sanitize] Board load failed: {}", e);
            None
        }
    }
}

/// Normalize a deserialized board in place: ids, text, caps and references.
/// Finishes with a work-item number repair pass.
pub fn sanitize_board(board: &mut Board) {
    if !is_valid_id(&board.id) {
        board.id = new_id();
    }

    board.schema_version = CURRENT_SCHEMA_VERSION;
    board.title = sanitize_required_text(&board.title, MAX_BOARD_TITLE_LENGTH, false);
    board.description = sanitize_required_text(&board.description, MAX_BOARD_DESCRIPTION_LENGTH, true);
    board.created_by = sanitize_required_text(&board.created_by, MAX_BOARD_CREATED_BY_LENGTH, false);
    board.custom_fields = sanitize_custom_fields(board.custom_fields.take());
    board.tags = sanitize_tags(std::mem::take(&mut board.tags));

    let (lanes, lane_ids) = sanitize_lanes(std::mem::take(&mut board.lanes));
    board.lanes = lanes;

    let (columns, column_ids) = sanitize_columns(std::mem::take(&mut board.columns), &lane_ids);
    board.columns = columns;

    board.archive_column_id = sanitize_reference(board.archive_column_id.take(), &column_ids);
    board.done_column_id = sanitize_reference(board.done_column_id.take(), &column_ids);
    board.auto_archive_done_days = board.auto_archive_done_days.clamp(1, MAX_AUTO_ARCHIVE_DONE_DAYS);

    for task in board.tasks_mut() {
        task.archived_from_column_id = sanitize_reference(task.archived_from_column_id.take(), &column_ids);
    }

    numbering::ensure_board_numbers(board);
}

// ── Structure ───────────────────────────────────────────────────────────────

fn sanitize_tags(tags: Vec<String>) -> Vec<String> {
    tags.iter()
        .filter_map(|tag| sanitize_optional_text(tag, MAX_TAG_TEXT_LENGTH, false))
        .take(MAX_TAGS)
        .collect()
}

fn sanitize_lanes(lanes: Vec<Lane>) -> (Vec<Lane>, HashSet<String>) {
    let mut result = Vec::new();
    let mut ids = HashSet::new();

    for mut lane in lanes {
        if result.len() >= MAX_LANES {
            break;
        }
        let Some(id) = normalize_id(&lane.id) else { continue };
        if !ids.insert(id.clone()) {
            continue;
        }
        lane.id = id;
        lane.title = sanitize_required_text(&lane.title, MAX_LANE_TITLE_LENGTH, false);
        lane.description = sanitize_optional(lane.description.take(), MAX_LANE_DESCRIPTION_LENGTH, true);
        lane.custom_fields = sanitize_custom_fields(lane.custom_fields.take());
        result.push(lane);
    }
    (result, ids)
}

fn sanitize_columns(columns: Vec<Column>, lane_ids: &HashSet<String>) -> (Vec<Column>, HashSet<String>) {
    let mut result = Vec::new();
    let mut column_ids = HashSet::new();
    let mut task_ids = HashSet::new();
    let mut total_tasks = 0usize;

    for mut column in columns {
        if result.len() >= MAX_COLUMNS {
            break;
        }
        let Some(id) = normalize_id(&column.id) else { continue };
        if !column_ids.insert(id.clone()) {
            continue;
        }
        column.id = id;
        column.title = sanitize_required_text(&column.title, MAX_COLUMN_TITLE_LENGTH, false);
        column.policy_text = sanitize_optional(column.policy_text.take(), MAX_COLUMN_POLICY_LENGTH, true);
        column.custom_fields = sanitize_custom_fields(column.custom_fields.take());
        column.wip_limit = sanitize_wip_limit(column.wip_limit);
        column.lane_wip_limits = sanitize_lane_wip_limits(std::mem::take(&mut column.lane_wip_limits), lane_ids);

        let mut tasks = Vec::new();
        for task in std::mem::take(&mut column.tasks) {
            if tasks.len() >= MAX_TASKS_PER_COLUMN || total_tasks >= MAX_TOTAL_TASKS {
                break;
            }
            if let Some(task) = sanitize_task(task, lane_ids, &mut task_ids) {
                tasks.push(task);
                total_tasks += 1;
            }
        }
        column.tasks = tasks;
        result.push(column);
    }
    (result, column_ids)
}

fn sanitize_task(mut task: Task, lane_ids: &HashSet<String>, task_ids: &mut HashSet<String>) -> Option<Task> {
    let id = normalize_id(&task.id)?;
    if !task_ids.insert(id.clone()) {
        return None;
    }

    task.id = id;
    task.title = sanitize_required_text(&task.title, MAX_TASK_TITLE_LENGTH, false);
    task.description = sanitize_required_text(&task.description, MAX_TASK_DESCRIPTION_LENGTH, true);
    task.tags = sanitize_optional(task.tags.take(), MAX_TASK_TAGS_LENGTH, false);
    task.assignee = sanitize_optional(task.assignee.take(), MAX_ASSIGNEE_LENGTH, false);
    task.assignee_id = sanitize_optional(task.assignee_id.take(), MAX_ASSIGNEE_ID_LENGTH, false);
    task.blocked_reason = sanitize_optional(task.blocked_reason.take(), MAX_BLOCKED_REASON_LENGTH, true);
    task.custom_fields = sanitize_custom_fields(task.custom_fields.take());
    task.lane_id = task
        .lane_id
        .take()
        .filter(|lane| !is_unassigned_lane(lane))
        .and_then(|lane| normalize_id(&lane))
        .filter(|lane| lane_ids.contains(lane));
    task.progress_percent = task.progress_percent.clamp(0, 100);
    if matches!(task.archived_from_index, Some(i) if i < 0) {
        task.archived_from_index = None;
    }
    task.subtasks = sanitize_subtasks(std::mem::take(&mut task.subtasks));
    Some(task)
}

fn sanitize_subtasks(subtasks: Vec<Subtask>) -> Vec<Subtask> {
    let mut result = Vec::new();
    let mut ids = HashSet::new();
    for mut subtask in subtasks {
        if result.len() >= MAX_SUBTASKS_PER_TASK {
            break;
        }
        let Some(id) = normalize_id(&subtask.id) else { continue };
        if !ids.insert(id.clone()) {
            continue;
        }
        subtask.id = id;
        subtask.title = sanitize_required_text(&subtask.title, MAX_SUBTASK_TITLE_LENGTH, false);
        result.push(subtask);
    }
    result
}

fn sanitize_reference(reference: Option<String>, known: &HashSet<String>) -> Option<String> {
    reference
        .and_then(|id| normalize_id(&id))
        .filter(|id| known.contains(id))
}

fn sanitize_wip_limit(limit: Option<i32>) -> Option<i32> {
    limit.filter(|l| *l >= 0).map(|l| l.min(MAX_WIP_LIMIT))
}

fn sanitize_lane_wip_limits(
    limits: BTreeMap<String, Option<i32>>,
    lane_ids: &HashSet<String>,
) -> BTreeMap<String, Option<i32>> {
    let mut result = BTreeMap::new();
    for (key, value) in limits {
        if result.len() >= MAX_LANE_WIP_LIMIT_ENTRIES {
            break;
        }
        let key = if is_unassigned_lane(&key) {
            Some(UNASSIGNED_LANE_ID.to_string())
        } else {
            normalize_id(&key).filter(|id| lane_ids.contains(id))
        };
        if let Some(key) = key {
            result.entry(key).or_insert_with(|| sanitize_wip_limit(value));
        }
    }
    result
}

fn is_unassigned_lane(lane_id: &str) -> bool {
    let trimmed = lane_id.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case(UNASSIGNED_LANE_ID)
}

fn sanitize_custom_fields(fields: Option<CustomFields>) -> Option<CustomFields> {
    let mut result = CustomFields::new();
    for (key, value) in fields? {
        if result.len() >= MAX_CUSTOM_FIELDS {
            break;
        }
        if let Some(key) = sanitize_optional_text(&key, MAX_CUSTOM_FIELD_KEY_LENGTH, false) {
            result.entry(key).or_insert(value);
        }
    }
    (!result.is_empty()).then_some(result)
}

// ── Text ────────────────────────────────────────────────────────────────────

/// Strip control characters (keeping CR/LF/TAB when `allow_line_breaks`),
/// cut at `max_chars`, trim.
pub fn sanitize_text(text: &str, max_chars: usize, allow_line_breaks: bool) -> String {
    let mut out = String::with_capacity(text.len().min(max_chars));
    let mut count = 0;
    for c in text.chars() {
        let line_break = matches!(c, '\r' | '\n' | '\t');
        if c.is_control() && !(allow_line_breaks && line_break) {
            continue;
        }
        out.push(c);
        count += 1;
        if count >= max_chars {
            break;
        }
    }
    out.trim().to_string()
}

pub fn sanitize_required_text(text: &str, max_chars: usize, allow_line_breaks: bool) -> String {
    sanitize_text(text, max_chars, allow_line_breaks)
}

/// Like `sanitize_required_text`, but blank results become `None`.
pub fn sanitize_optional_text(text: &str, max_chars: usize, allow_line_breaks: bool) -> Option<String> {
    let sanitized = sanitize_text(text, max_chars, allow_line_breaks);
    (!sanitized.is_empty()).then_some(sanitized)
}

fn sanitize_optional(text: Option<String>, max_chars: usize, allow_line_breaks: bool) -> Option<String> {
    text.and_then(|t| sanitize_optional_text(&t, max_chars, allow_line_breaks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const A: &str = "0b9e8c1e-4a4f-4c33-9f3c-6a1c1b2f0001";
    const B: &str = "0b9e8c1e-4a4f-4c33-9f3c-6a1c1b2f0002";
    const C: &str = "0b9e8c1e-4a4f-4c33-9f3c-6a1c1b2f0003";
    const D: &str = "0b9e8c1e-4a4f-4c33-9f3c-6a1c1b2f0004";

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_id(A));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id(&format!(" {}", A)));
        assert!(!is_valid_id("00000000-0000-0000-0000-000000000000"));
        assert!(!is_valid_id("../../etc/passwd"));
        assert!(!is_valid_id("board.1"));
        assert!(is_valid_id(&A.to_uppercase()));
        assert!(!is_valid_id(&format!("urn:uuid:{}", A)));
        assert!(!is_valid_id(&format!("{{{}}}", A)));
        assert!(!is_valid_id(&A.replace('-', "")));
    }

    #[test]
    fn test_normalize_id() {
        assert_eq!(normalize_id(&format!("  {}  ", A.to_uppercase())).as_deref(), Some(A));
        assert_eq!(normalize_id("nope"), None);
        assert_eq!(normalize_id("00000000-0000-0000-0000-000000000000"), None);
    }

    #[test]
    fn test_safe_json_content() {
        assert!(is_safe_json_content("{\r\n\t\"a\": 1\n}"));
        assert!(!is_safe_json_content("   "));
        assert!(!is_safe_json_content("{\"a\":\u{0}}"));
        assert!(!is_safe_json_content(&"x".repeat(MAX_JSON_LENGTH + 1)));

        let deep = format!("{}{}", "[".repeat(MAX_JSON_DEPTH + 1), "]".repeat(MAX_JSON_DEPTH + 1));
        assert!(!is_safe_json_content(&deep));
        // Brackets inside strings do not count
        let quoted = format!("{{\"a\":\"{}\"}}", "[".repeat(100));
        assert!(is_safe_json_content(&quoted));
    }

    #[test]
    fn test_metadata_reads_only_display_fields() {
        let json = r#"{"title":"  Roadmap\u0007 ","createdAt":"2024-01-01T00:00:00Z","columns":"not-an-array"}"#;
        let meta = try_build_board_metadata(json, A).unwrap();
        assert_eq!(meta.id, A);
        assert_eq!(meta.title, "Roadmap");
        assert_eq!(meta.last_modified, lenient::parse_date("2024-01-01T00:00:00Z"));

        let meta = try_build_board_metadata(r#"{"title":"   ","updatedAt":"2024-05-01"}"#, A).unwrap();
        assert_eq!(meta.title, UNTITLED_BOARD);
        assert_eq!(meta.last_modified, lenient::parse_date("2024-05-01"));

        assert!(try_build_board_metadata("not json", A).is_none());
        assert!(try_build_board_metadata("[1]", A).is_none());
    }

    #[test]
    fn test_load_drops_invalid_and_duplicate_entities() {
        let json = json!({
            "id": "bogus",
            "title": "Board",
            "doneColumnId": B,
            "archiveColumnId": "missing",
            "autoArchiveDoneDays": 0,
            "lanes": [{"id": C, "title": "L"}, {"id": C, "title": "dup"}, {"id": "x"}],
            "columns": [
                {"id": A, "title": "Todo", "wipLimit": -3, "laneWipLimits": {C: 5000, "__unassigned__": 2, D: 1},
                 "tasks": [
                    {"id": D, "title": "one", "laneId": C, "archivedFromColumnId": B, "archivedFromIndex": -1},
                    {"id": D, "title": "duplicate"},
                    {"id": "nope", "title": "invalid"}
                 ]},
                {"id": A.to_uppercase(), "title": "dup column"},
                {"id": B, "title": "Done"}
            ]
        })
        .to_string();

        let board = try_load_from_json(&json).unwrap();
        assert!(is_valid_id(&board.id));
        assert_eq!(board.schema_version, CURRENT_SCHEMA_VERSION);
        assert_eq!(board.lanes.len(), 1);
        assert_eq!(board.columns.len(), 2);
        assert_eq!(board.done_column_id.as_deref(), Some(B));
        assert!(board.archive_column_id.is_none());
        assert_eq!(board.auto_archive_done_days, 1);

        let todo = &board.columns[0];
        assert!(todo.wip_limit.is_none());
        assert_eq!(todo.lane_wip_limits.get(C), Some(&Some(MAX_WIP_LIMIT)));
        assert_eq!(todo.lane_wip_limits.get(UNASSIGNED_LANE_ID), Some(&Some(2)));
        assert!(!todo.lane_wip_limits.contains_key(D));

        assert_eq!(todo.tasks.len(), 1);
        let task = &todo.tasks[0];
        assert_eq!(task.lane_id.as_deref(), Some(C));
        assert_eq!(task.archived_from_column_id.as_deref(), Some(B));
        assert!(task.archived_from_index.is_none());
        assert_eq!(task.work_item_number, 1);
    }

    #[test]
    fn test_load_rejects_garbage() {
        assert!(try_load_from_json("").is_none());
        assert!(try_load_from_json("{ not json").is_none());
        assert!(try_load_from_json(r#"{"schemaVersion": 999}"#).is_none());
        assert!(try_load_from_json(r#"{"columns": 5}"#).is_none());
    }

    #[test]
    fn test_text_sanitizing() {
        assert_eq!(sanitize_text("  a\u{1}b\nc  ", 10, false), "abc");
        assert_eq!(sanitize_text("a\nb", 10, true), "a\nb");
        assert_eq!(sanitize_text("abcdef", 3, false), "abc");
        assert_eq!(sanitize_optional_text(" \u{7} ", 10, false), None);
    }

    #[test]
    fn test_custom_fields_capped_and_keys_cleaned() {
        let mut fields = CustomFields::new();
        fields.insert("   ".into(), json!(1));
        for i in 0..150 {
            fields.insert(format!("k{:03}", i), json!(i));
        }
        let cleaned = sanitize_custom_fields(Some(fields)).unwrap();
        assert_eq!(cleaned.len(), MAX_CUSTOM_FIELDS);
        assert!(!cleaned.contains_key("   "));

        assert!(sanitize_custom_fields(Some(CustomFields::new())).is_none());
    }
}

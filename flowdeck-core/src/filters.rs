/// Task filtering and saved filter presets.
///
/// Presets live in a single global document, independent of any board.
/// They may name columns or assignees that no longer exist; matching simply
/// finds nothing for those.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::{self, StateStorage, StorageError};
use crate::types::{lenient, new_id, Board, Column, Priority, Task};

pub const FILTER_PRESETS_KEY: &str = "kanban.filter.presets.global";
pub const MAX_PRESET_NAME_LENGTH: usize = 50;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DateRange {
    #[serde(deserialize_with = "lenient::date", skip_serializing_if = "Option::is_none")]
    pub from: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::date", skip_serializing_if = "Option::is_none")]
    pub to: Option<DateTime<Utc>>,
}

impl DateRange {
    pub fn has_value(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    /// Inclusive, by calendar date.
    pub fn contains(&self, date: Option<DateTime<Utc>>) -> bool {
        let Some(date) = date.map(|d| d.date_naive()) else {
            return false;
        };
        if matches!(self.from, Some(from) if date < from.date_naive()) {
            return false;
        }
        !matches!(self.to, Some(to) if date > to.date_naive())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterCriteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_query: Option<String>,
    pub match_title: bool,
    pub match_description: bool,
    pub match_tags: bool,
    pub match_assignee: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priorities: Option<Vec<Priority>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_only_overdue: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_only_blocked: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_start_range: Option<DateRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub planned_end_range: Option<DateRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub included_column_ids: Option<Vec<String>>,
    pub exclude_archive: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_ids: Option<Vec<String>>,
}

impl Default for FilterCriteria {
    fn default() -> Self {
        Self {
            text_query: None,
            match_title: true,
            match_description: true,
            match_tags: true,
            match_assignee: true,
            priorities: None,
            show_only_overdue: None,
            show_only_blocked: None,
            planned_start_range: None,
            planned_end_range: None,
            included_column_ids: None,
            exclude_archive: true,
            assignee_ids: None,
        }
    }
}

fn non_empty<T>(list: &Option<Vec<T>>) -> bool {
    list.as_ref().is_some_and(|l| !l.is_empty())
}

impl FilterCriteria {
    pub fn has_any_filter(&self) -> bool {
        self.text_query.as_deref().is_some_and(|q| !q.trim().is_empty())
            || non_empty(&self.priorities)
            || self.show_only_overdue == Some(true)
            || self.show_only_blocked == Some(true)
            || self.planned_start_range.as_ref().is_some_and(DateRange::has_value)
            || self.planned_end_range.as_ref().is_some_and(DateRange::has_value)
            || non_empty(&self.included_column_ids)
            || non_empty(&self.assignee_ids)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

fn contains_ignore_case(haystack: &str, needle_lower: &str) -> bool {
    !haystack.trim().is_empty() && haystack.to_lowercase().contains(needle_lower)
}

fn text_matches(task: &Task, criteria: &FilterCriteria, query: &str) -> bool {
    if let Ok(number) = query.parse::<i32>() {
        if number > 0 && task.work_item_number == number {
            return true;
        }
    }

    let needle = query.to_lowercase();
    let optional = |value: &Option<String>| value.as_deref().is_some_and(|v| contains_ignore_case(v, &needle));

    (criteria.match_title && contains_ignore_case(&task.title, &needle))
        || (criteria.match_description && contains_ignore_case(&task.description, &needle))
        || (criteria.match_tags && optional(&task.tags))
        || (criteria.match_assignee && optional(&task.assignee))
}

/// Whether a task passes every active criterion.
pub fn task_matches(task: &Task, criteria: &FilterCriteria, now: DateTime<Utc>) -> bool {
    if !criteria.has_any_filter() {
        return true;
    }

    if let Some(query) = criteria.text_query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        if !text_matches(task, criteria, query) {
            return false;
        }
    }

    if let Some(priorities) = criteria.priorities.as_ref().filter(|p| !p.is_empty()) {
        if !priorities.contains(&task.priority) {
            return false;
        }
    }

    if criteria.show_only_overdue == Some(true) && !task.is_overdue(now) {
        return false;
    }
    if criteria.show_only_blocked == Some(true) && !task.is_blocked {
        return false;
    }

    if let Some(range) = criteria.planned_start_range.as_ref().filter(|r| r.has_value()) {
        if !range.contains(task.planned_start_date) {
            return false;
        }
    }
    if let Some(range) = criteria.planned_end_range.as_ref().filter(|r| r.has_value()) {
        if !range.contains(task.planned_end_date) {
            return false;
        }
    }

    if let Some(ids) = criteria.assignee_ids.as_ref().filter(|ids| !ids.is_empty()) {
        match task.assignee_id.as_deref() {
            Some(id) if ids.iter().any(|candidate| candidate == id) => {}
            _ => return false,
        }
    }

    true
}

/// Archive column is hidden when `exclude_archive`; an explicit inclusion
/// list otherwise decides.
pub fn column_included(board: &Board, column: &Column, criteria: &FilterCriteria) -> bool {
    if criteria.exclude_archive && board.is_archive_column(&column.id) {
        return false;
    }
    match criteria.included_column_ids.as_ref().filter(|ids| !ids.is_empty()) {
        Some(ids) => ids.contains(&column.id),
        None => true,
    }
}

/// Tasks visible under `criteria`, grouped by column.
pub fn filter_board<'a>(
    board: &'a Board,
    criteria: &FilterCriteria,
    now: DateTime<Utc>,
) -> Vec<(&'a Column, Vec<&'a Task>)> {
    board
        .columns
        .iter()
        .filter(|column| column_included(board, column, criteria))
        .map(|column| {
            let tasks = column
                .tasks
                .iter()
                .filter(|task| task_matches(task, criteria, now))
                .collect();
            (column, tasks)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterPreset {
    pub id: String,
    pub name: String,
    pub criteria: FilterCriteria,
    #[serde(deserialize_with = "lenient::required_date")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "lenient::required_date")]
    pub last_used_at: DateTime<Utc>,
}

impl Default for FilterPreset {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            name: String::new(),
            criteria: FilterCriteria::default(),
            created_at: now,
            last_used_at: now,
        }
    }
}

impl FilterPreset {
    /// Trimmed, control characters removed, at most `MAX_PRESET_NAME_LENGTH` chars.
    pub fn sanitize_name(name: &str) -> String {
        name.trim()
            .chars()
            .filter(|c| !c.is_control())
            .take(MAX_PRESET_NAME_LENGTH)
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPresetCollection {
    pub presets: Vec<FilterPreset>,
}

impl FilterPresetCollection {
    pub fn find(&self, id: &str) -> Option<&FilterPreset> {
        self.presets.iter().find(|p| p.id == id)
    }
}

/// Persistence for the global preset document.
pub struct FilterPresetStore {
    storage: Arc<dyn StateStorage>,
}

impl FilterPresetStore {
    pub fn new(storage: Arc<dyn StateStorage>) -> Self {
        Self { storage }
    }

    /// Missing or corrupt documents load as empty.
    pub fn load(&self) -> FilterPresetCollection {
        let text = match storage::load_text(self.storage.as_ref(), FILTER_PRESETS_KEY) {
            Ok(Some(text)) if !text.trim().is_empty() => text,
            Ok(_) => return FilterPresetCollection::default(),
            Err(e) => {
                log::warn!("[flowdeck.filters] Failed to read presets: {}", e);
                return FilterPresetCollection::default();
            }
        };
        match serde_json::from_str::<FilterPresetCollection>(&text) {
            Ok(mut collection) => {
                for preset in &mut collection.presets {
                    preset.name = FilterPreset::sanitize_name(&preset.name);
                }
                collection
            }
            Err(e) => {
                log::warn!("[flowdeck.filters] Ignoring corrupt preset document: {}", e);
                FilterPresetCollection::default()
            }
        }
    }

    pub fn save(&self, collection: &FilterPresetCollection) -> Result<(), StorageError> {
        let json = serde_json::to_string_pretty(collection).map_err(|e| StorageError::Fault {
            key: FILTER_PRESETS_KEY.to_string(),
            message: e.to_string(),
        })?;
        storage::save_text(self.storage.as_ref(), FILTER_PRESETS_KEY, &json)
    }

    /// Update the preset `id` when given and present, otherwise add a new
    /// one. Returns `None` when the sanitized name is blank.
    pub fn upsert(
        &self,
        id: Option<&str>,
        name: &str,
        criteria: FilterCriteria,
    ) -> Result<Option<FilterPreset>, StorageError> {
        let name = FilterPreset::sanitize_name(name);
        if name.is_empty() {
            return Ok(None);
        }

        let mut collection = self.load();
        let now = Utc::now();
        let existing = id.and_then(|id| collection.presets.iter_mut().find(|p| p.id == id));
        let preset = match existing {
            Some(preset) => {
                preset.name = name;
                preset.criteria = criteria;
                preset.last_used_at = now;
                preset.clone()
            }
            None => {
                let preset = FilterPreset {
                    name,
                    criteria,
                    ..FilterPreset::default()
                };
                collection.presets.push(preset.clone());
                preset
            }
        };
        self.save(&collection)?;
        Ok(Some(preset))
    }

    /// Mark a preset as used now. Returns its criteria.
    pub fn touch(&self, id: &str) -> Result<Option<FilterCriteria>, StorageError> {
        let mut collection = self.load();
        let Some(preset) = collection.presets.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        preset.last_used_at = Utc::now();
        let criteria = preset.criteria.clone();
        self.save(&collection)?;
        Ok(Some(criteria))
    }

    pub fn remove(&self, id: &str) -> Result<bool, StorageError> {
        let mut collection = self.load();
        let before = collection.presets.len();
        collection.presets.retain(|p| p.id != id);
        if collection.presets.len() == before {
            return Ok(false);
        }
        self.save(&collection)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStateStorage;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn task(title: &str) -> Task {
        Task::new(title)
    }

    #[test]
    fn test_empty_criteria_matches_everything() {
        let criteria = FilterCriteria::default();
        assert!(!criteria.has_any_filter());
        assert!(task_matches(&task("x"), &criteria, Utc::now()));
    }

    #[test]
    fn test_text_query_fields() {
        let mut t = task("Write Release Notes");
        t.tags = Some("docs, urgent".into());
        t.assignee = Some("Lucy".into());
        t.work_item_number = 42;
        let now = Utc::now();

        let mut criteria = FilterCriteria {
            text_query: Some(" release ".into()),
            ..FilterCriteria::default()
        };
        assert!(task_matches(&t, &criteria, now));

        criteria.match_title = false;
        assert!(!task_matches(&t, &criteria, now));

        criteria.text_query = Some("DOCS".into());
        assert!(task_matches(&t, &criteria, now));
        criteria.match_tags = false;
        assert!(!task_matches(&t, &criteria, now));

        criteria.text_query = Some("lucy".into());
        assert!(task_matches(&t, &criteria, now));

        criteria.text_query = Some("42".into());
        assert!(task_matches(&t, &criteria, now));
        criteria.text_query = Some("43".into());
        assert!(!task_matches(&t, &criteria, now));
    }

    #[test]
    fn test_priority_overdue_and_blocked() {
        let now = date(2024, 6, 1, 0);
        let mut t = task("x");
        t.priority = Priority::High;
        t.planned_end_date = Some(date(2024, 5, 1, 0));

        let mut criteria = FilterCriteria {
            priorities: Some(vec![Priority::Urgent]),
            ..FilterCriteria::default()
        };
        assert!(!task_matches(&t, &criteria, now));
        criteria.priorities = Some(vec![Priority::High, Priority::Urgent]);
        assert!(task_matches(&t, &criteria, now));

        criteria.show_only_overdue = Some(true);
        assert!(task_matches(&t, &criteria, now));
        criteria.show_only_blocked = Some(true);
        assert!(!task_matches(&t, &criteria, now));
        t.is_blocked = true;
        assert!(task_matches(&t, &criteria, now));
    }

    #[test]
    fn test_date_ranges_are_inclusive_by_day() {
        let range = DateRange {
            from: Some(date(2024, 3, 1, 18)),
            to: Some(date(2024, 3, 10, 0)),
        };
        assert!(range.contains(Some(date(2024, 3, 1, 1))));
        assert!(range.contains(Some(date(2024, 3, 10, 23))));
        assert!(!range.contains(Some(date(2024, 3, 11, 0))));
        assert!(!range.contains(None));

        let mut t = task("x");
        let criteria = FilterCriteria {
            planned_start_range: Some(range),
            ..FilterCriteria::default()
        };
        assert!(!task_matches(&t, &criteria, Utc::now()));
        t.planned_start_date = Some(date(2024, 3, 5, 0));
        assert!(task_matches(&t, &criteria, Utc::now()));
    }

    #[test]
    fn test_assignee_ids() {
        let mut t = task("x");
        let criteria = FilterCriteria {
            assignee_ids: Some(vec!["local:u1".into()]),
            ..FilterCriteria::default()
        };
        assert!(!task_matches(&t, &criteria, Utc::now()));
        t.assignee_id = Some("local:u1".into());
        assert!(task_matches(&t, &criteria, Utc::now()));
    }

    #[test]
    fn test_column_inclusion() {
        let mut board = Board::new("b");
        board.columns.push(Column::new("Todo"));
        board.columns.push(Column::new("Archive"));
        board.archive_column_id = Some(board.columns[1].id.clone());

        let mut criteria = FilterCriteria::default();
        assert!(column_included(&board, &board.columns[0], &criteria));
        assert!(!column_included(&board, &board.columns[1], &criteria));

        criteria.exclude_archive = false;
        criteria.included_column_ids = Some(vec![board.columns[1].id.clone()]);
        assert!(!column_included(&board, &board.columns[0], &criteria));
        assert!(column_included(&board, &board.columns[1], &criteria));
        assert_eq!(filter_board(&board, &criteria, Utc::now()).len(), 1);
    }

    #[test]
    fn test_clear_resets_defaults() {
        let mut criteria = FilterCriteria {
            text_query: Some("x".into()),
            exclude_archive: false,
            match_title: false,
            ..FilterCriteria::default()
        };
        criteria.clear();
        assert_eq!(criteria, FilterCriteria::default());
    }

    #[test]
    fn test_preset_name_sanitizing() {
        assert_eq!(FilterPreset::sanitize_name("  My\u{0} filter  "), "My filter");
        assert_eq!(FilterPreset::sanitize_name(&"x".repeat(80)).len(), MAX_PRESET_NAME_LENGTH);
    }

    #[test]
    fn test_preset_store_lifecycle() {
        let storage = Arc::new(MemoryStateStorage::new());
        let store = FilterPresetStore::new(storage.clone());
        assert!(store.load().presets.is_empty());

        let criteria = FilterCriteria {
            show_only_blocked: Some(true),
            ..FilterCriteria::default()
        };
        let preset = store.upsert(None, " Blocked ", criteria.clone()).unwrap().unwrap();
        assert_eq!(preset.name, "Blocked");
        assert!(store.upsert(None, "   ", criteria.clone()).unwrap().is_none());

        let renamed = store
            .upsert(Some(&preset.id), "Blocked work", FilterCriteria::default())
            .unwrap()
            .unwrap();
        assert_eq!(renamed.id, preset.id);

        let loaded = store.load();
        assert_eq!(loaded.presets.len(), 1);
        assert_eq!(loaded.find(&preset.id).unwrap().name, "Blocked work");

        assert_eq!(store.touch(&preset.id).unwrap(), Some(FilterCriteria::default()));
        assert!(store.touch("missing").unwrap().is_none());
        assert!(store.remove(&preset.id).unwrap());
        assert!(!store.remove(&preset.id).unwrap());
    }

    #[test]
    fn test_corrupt_presets_load_empty() {
        let storage = Arc::new(MemoryStateStorage::new());
        storage::save_text(storage.as_ref(), FILTER_PRESETS_KEY, "{ not json").unwrap();
        let store = FilterPresetStore::new(storage);
        assert!(store.load().presets.is_empty());
    }
}

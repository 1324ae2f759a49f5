use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::migration::CURRENT_SCHEMA_VERSION;

/// Title used when a board has none (or only whitespace).
pub const UNTITLED_BOARD: &str = "Untitled Board";

/// Lane key for tasks that are not assigned to any lane.
pub const UNASSIGNED_LANE_ID: &str = "__unassigned__";

/// Extensible key/value payload carried by boards, lanes, columns and tasks.
pub type CustomFields = BTreeMap<String, Value>;

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    /// Accepts both the numeric and the named encoding. Unknown values fall
    /// back to `Normal` instead of failing the whole document.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(0) => Priority::Low,
                Some(2) => Priority::High,
                Some(3) => Priority::Urgent,
                _ => Priority::Normal,
            },
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "low" => Priority::Low,
                "high" => Priority::High,
                "urgent" => Priority::Urgent,
                _ => Priority::Normal,
            },
            _ => Priority::Normal,
        }
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(Self::from_value(&Value::deserialize(d)?))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupBy {
    #[default]
    None,
    Lane,
}

impl<'de> Deserialize<'de> for GroupBy {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(d)?;
        let lane = match &value {
            Value::Number(n) => n.as_i64() == Some(1),
            Value::String(s) => s.trim().eq_ignore_ascii_case("lane"),
            _ => false,
        };
        Ok(if lane { GroupBy::Lane } else { GroupBy::None })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub is_completed: bool,
}

impl Default for Subtask {
    fn default() -> Self {
        Self {
            id: new_id(),
            title: String::new(),
            is_completed: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    pub id: String,
    /// Sequential, board-unique display number. 0 means "not yet assigned".
    pub work_item_number: i32,
    pub title: String,
    pub description: String,
    #[serde(deserialize_with = "lenient::palette")]
    pub palette: String,

    #[serde(deserialize_with = "lenient::date", skip_serializing_if = "Option::is_none")]
    pub planned_start_date: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::date", skip_serializing_if = "Option::is_none")]
    pub planned_end_date: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::date", skip_serializing_if = "Option::is_none")]
    pub actual_start_date: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "lenient::date", skip_serializing_if = "Option::is_none")]
    pub actual_end_date: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_days: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_days: Option<f64>,

    pub priority: Priority,
    pub progress_percent: i32,
    /// Set when the task enters the board's done column. Never cleared on exit.
    #[serde(deserialize_with = "lenient::date", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Composite user id (`provider:raw`). Weak reference, cleared when the
    /// user disappears from the identity provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lane_id: Option<String>,

    pub is_blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocked_reason: Option<String>,
    #[serde(deserialize_with = "lenient::date", skip_serializing_if = "Option::is_none")]
    pub blocked_since: Option<DateTime<Utc>>,

    pub is_archived: bool,
    #[serde(deserialize_with = "lenient::date", skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_from_column_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived_from_index: Option<i32>,

    pub subtasks: Vec<Subtask>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<CustomFields>,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            id: new_id(),
            work_item_number: 0,
            title: String::new(),
            description: String::new(),
            palette: "default".to_string(),
            planned_start_date: None,
            planned_end_date: None,
            actual_start_date: None,
            actual_end_date: None,
            estimated_hours: None,
            actual_hours: None,
            estimated_days: None,
            actual_days: None,
            priority: Priority::Normal,
            progress_percent: 0,
            completed_at: None,
            assignee: None,
            assignee_id: None,
            tags: None,
            lane_id: None,
            is_blocked: false,
            blocked_reason: None,
            blocked_since: None,
            is_archived: false,
            archived_at: None,
            archived_from_column_id: None,
            archived_from_index: None,
            subtasks: Vec::new(),
            custom_fields: None,
        }
    }
}

impl Task {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Planned end passed and the task has not actually ended.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        matches!(self.planned_end_date, Some(end) if end < now) && self.actual_end_date.is_none()
    }

    /// Blocking stamps `blocked_since` once; unblocking clears reason and since.
    pub fn set_blocked(&mut self, blocked: bool, now: DateTime<Utc>) {
        if self.is_blocked == blocked {
            return;
        }
        self.is_blocked = blocked;
        if blocked {
            if self.blocked_since.is_none() {
                self.blocked_since = Some(now);
            }
        } else {
            self.blocked_since = None;
            self.blocked_reason = None;
        }
    }

    pub fn set_archived(&mut self, archived: bool, now: DateTime<Utc>) {
        if self.is_archived == archived {
            return;
        }
        self.is_archived = archived;
        self.archived_at = archived.then_some(now);
    }

    pub fn set_progress(&mut self, percent: i32) {
        self.progress_percent = percent.clamp(0, 100);
    }

    pub fn subtask_progress(&self) -> i32 {
        if self.subtasks.is_empty() {
            return 0;
        }
        let done = self.subtasks.iter().filter(|s| s.is_completed).count();
        (done * 100 / self.subtasks.len()) as i32
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Lane {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<CustomFields>,
}

impl Default for Lane {
    fn default() -> Self {
        Self {
            id: new_id(),
            title: String::new(),
            description: None,
            custom_fields: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Column {
    pub id: String,
    pub title: String,
    pub tasks: Vec<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wip_limit: Option<i32>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub lane_wip_limits: BTreeMap<String, Option<i32>>,
    pub is_collapsed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<CustomFields>,
}

impl Default for Column {
    fn default() -> Self {
        Self {
            id: new_id(),
            title: String::new(),
            tasks: Vec::new(),
            wip_limit: None,
            lane_wip_limits: BTreeMap::new(),
            is_collapsed: false,
            policy_text: None,
            custom_fields: None,
        }
    }
}

impl Column {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn is_wip_exceeded(&self) -> bool {
        matches!(self.wip_limit, Some(limit) if self.tasks.len() > limit.max(0) as usize)
    }

    /// "3/5" with a limit, "3" without.
    pub fn wip_display(&self) -> String {
        match self.wip_limit {
            Some(limit) => format!("{}/{}", self.tasks.len(), limit),
            None => self.tasks.len().to_string(),
        }
    }

    pub fn task_index(&self, task_id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == task_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Board {
    pub id: String,
    pub title: String,
    pub description: String,
    #[serde(deserialize_with = "lenient::required_date")]
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(deserialize_with = "lenient::date", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub lanes: Vec<Lane>,
    pub group_by: GroupBy,
    pub schema_version: i32,
    pub next_work_item_number: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_column_id: Option<String>,
    pub is_archive_column_hidden: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub done_column_id: Option<String>,
    pub auto_archive_done_enabled: bool,
    pub auto_archive_done_days: i32,
    pub columns: Vec<Column>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_fields: Option<CustomFields>,
}

impl Default for Board {
    fn default() -> Self {
        Self {
            id: new_id(),
            title: UNTITLED_BOARD.to_string(),
            description: String::new(),
            created_at: Utc::now(),
            created_by: String::new(),
            updated_at: None,
            tags: Vec::new(),
            lanes: Vec::new(),
            group_by: GroupBy::None,
            schema_version: CURRENT_SCHEMA_VERSION,
            next_work_item_number: 1,
            archive_column_id: None,
            is_archive_column_hidden: false,
            done_column_id: None,
            auto_archive_done_enabled: false,
            auto_archive_done_days: 14,
            columns: Vec::new(),
            custom_fields: None,
        }
    }
}

impl Board {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn column(&self, column_id: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    pub fn column_mut(&mut self, column_id: &str) -> Option<&mut Column> {
        self.columns.iter_mut().find(|c| c.id == column_id)
    }

    /// Locate a task: (column index, task index).
    pub fn find_task(&self, task_id: &str) -> Option<(usize, usize)> {
        self.columns.iter().enumerate().find_map(|(ci, col)| {
            col.task_index(task_id).map(|ti| (ci, ti))
        })
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.find_task(task_id)
            .map(|(ci, ti)| &self.columns[ci].tasks[ti])
    }

    pub fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        let (ci, ti) = self.find_task(task_id)?;
        Some(&mut self.columns[ci].tasks[ti])
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.columns.iter().flat_map(|c| c.tasks.iter())
    }

    pub fn tasks_mut(&mut self) -> impl Iterator<Item = &mut Task> {
        self.columns.iter_mut().flat_map(|c| c.tasks.iter_mut())
    }

    pub fn is_done_column(&self, column_id: &str) -> bool {
        matches!(self.done_column_id.as_deref(), Some(done) if !done.trim().is_empty() && done == column_id)
    }

    pub fn is_archive_column(&self, column_id: &str) -> bool {
        self.archive_column_id.as_deref() == Some(column_id)
    }

    /// Stamp `completed_at` when `column_id` is the done column.
    /// Returns true when the task was stamped.
    pub fn mark_completed_on_enter(&self, column_id: &str, task: &mut Task, now: DateTime<Utc>) -> bool {
        if !self.is_done_column(column_id) {
            return false;
        }
        task.completed_at = Some(now);
        true
    }
}

/// Summary info for a board in list responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardMetadata {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl BoardMetadata {
    pub fn fallback(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: UNTITLED_BOARD.to_string(),
            last_modified: None,
        }
    }
}

/// Tolerant decoders for values written by older or foreign clients.
pub(crate) mod lenient {
    use super::*;

    pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f") {
            return Some(naive.and_utc());
        }
        NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
    }

    pub fn date<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        let value = Option::<Value>::deserialize(d)?;
        Ok(match value {
            Some(Value::String(s)) => parse_date(&s),
            _ => None,
        })
    }

    pub fn required_date<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        Ok(date(d)?.unwrap_or_else(Utc::now))
    }

    pub fn palette<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(match value {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            _ => "default".to_string(),
        })
    }
}

/// Column and lane management on a board.
///
/// These edit structure directly and are not recorded in the undo history.

use crate::sanitize::{self, MAX_COLUMN_TITLE_LENGTH, MAX_LANE_TITLE_LENGTH};
use crate::types::{Board, Column, Lane, UNASSIGNED_LANE_ID};

fn clean_title(title: &str, max_chars: usize) -> String {
    sanitize::sanitize_required_text(title, max_chars, false)
}

/// Lane id with surrounding whitespace removed; `None` for blanks, `"0"`
/// and the unassigned marker.
pub fn normalize_lane_id(lane_id: Option<&str>) -> Option<&str> {
    let trimmed = lane_id?.trim();
    if trimmed.is_empty() || trimmed == "0" || trimmed == UNASSIGNED_LANE_ID {
        return None;
    }
    Some(trimmed)
}

/// Move the element at `from` to `to` (clamped). False when `from` is out of range.
fn move_within<T>(items: &mut Vec<T>, from: usize, to: usize) -> bool {
    if from >= items.len() {
        return false;
    }
    let to = to.min(items.len() - 1);
    if from != to {
        let item = items.remove(from);
        items.insert(to, item);
    }
    true
}

impl Board {
    pub fn column_index(&self, column_id: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.id == column_id)
    }

    /// Append a column. Returns its id.
    pub fn add_column(&mut self, title: &str) -> String {
        let index = self.columns.len();
        self.insert_column(title, index)
    }

    /// Insert a column at `index`, clamped to the column count. Returns its id.
    pub fn insert_column(&mut self, title: &str, index: usize) -> String {
        let column = Column::new(clean_title(title, MAX_COLUMN_TITLE_LENGTH));
        let id = column.id.clone();
        let index = index.min(self.columns.len());
        self.columns.insert(index, column);
        id
    }

    /// Remove a column with its tasks. Done and archive designations that
    /// pointed at it are cleared.
    pub fn remove_column(&mut self, column_id: &str) -> Option<Column> {
        let index = self.column_index(column_id)?;
        let column = self.columns.remove(index);
        if self.done_column_id.as_deref() == Some(column_id) {
            self.done_column_id = None;
        }
        if self.archive_column_id.as_deref() == Some(column_id) {
            self.archive_column_id = None;
        }
        log::debug!(
            "[flowdeck.layout] Removed column {} with {} tasks",
            column_id,
            column.tasks.len()
        );
        Some(column)
    }

    pub fn move_column(&mut self, column_id: &str, index: usize) -> bool {
        match self.column_index(column_id) {
            Some(from) => move_within(&mut self.columns, from, index),
            None => false,
        }
    }

    pub fn rename_column(&mut self, column_id: &str, title: &str) -> bool {
        match self.column_mut(column_id) {
            Some(column) => {
                column.title = clean_title(title, MAX_COLUMN_TITLE_LENGTH);
                true
            }
            None => false,
        }
    }

    pub fn lane(&self, lane_id: &str) -> Option<&Lane> {
        self.lanes.iter().find(|l| l.id == lane_id)
    }

    pub fn lane_index(&self, lane_id: &str) -> Option<usize> {
        self.lanes.iter().position(|l| l.id == lane_id)
    }

    pub fn add_lane(&mut self, title: &str) -> String {
        let index = self.lanes.len();
        self.insert_lane(title, index)
    }

    pub fn insert_lane(&mut self, title: &str, index: usize) -> String {
        let lane = Lane {
            title: clean_title(title, MAX_LANE_TITLE_LENGTH),
            ..Lane::default()
        };
        let id = lane.id.clone();
        let index = index.min(self.lanes.len());
        self.lanes.insert(index, lane);
        id
    }

    /// Remove a lane. Its tasks move to `fallback` when that lane exists,
    /// otherwise they become unassigned. Per-lane WIP limits for it are dropped.
    pub fn remove_lane(&mut self, lane_id: &str, fallback: Option<&str>) -> bool {
        let Some(index) = self.lane_index(lane_id) else {
            return false;
        };
        self.lanes.remove(index);

        let fallback = fallback
            .filter(|id| self.lane(id).is_some())
            .map(str::to_string);
        for task in self.tasks_mut() {
            if task.lane_id.as_deref().map(str::trim) == Some(lane_id) {
                task.lane_id = fallback.clone();
            }
        }
        for column in &mut self.columns {
            column.lane_wip_limits.remove(lane_id);
        }
        true
    }

    pub fn move_lane(&mut self, lane_id: &str, index: usize) -> bool {
        match self.lane_index(lane_id) {
            Some(from) => move_within(&mut self.lanes, from, index),
            None => false,
        }
    }

    pub fn rename_lane(&mut self, lane_id: &str, title: &str) -> bool {
        match self.lanes.iter_mut().find(|l| l.id == lane_id) {
            Some(lane) => {
                lane.title = clean_title(title, MAX_LANE_TITLE_LENGTH);
                true
            }
            None => false,
        }
    }

    /// Point a task at a lane, or clear it with `None`. False when the task
    /// or the lane does not exist.
    pub fn set_task_lane(&mut self, task_id: &str, lane_id: Option<&str>) -> bool {
        if let Some(lane_id) = lane_id {
            if self.lane(lane_id).is_none() {
                return false;
            }
        }
        match self.task_mut(task_id) {
            Some(task) => {
                task.lane_id = lane_id.map(str::to_string);
                true
            }
            None => false,
        }
    }
}

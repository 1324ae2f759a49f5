/// The closed set of board mutations that can be undone.
///
/// Commands address columns and tasks by id and capture everything they
/// need to reverse themselves when constructed (or on first execute for
/// values that only exist then, like an assigned work-item number).
/// Timestamps are taken once and reused on redo.

use chrono::{DateTime, Utc};

use super::Command;
use crate::numbering;
use crate::types::{Board, Task};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Column not found: {0}")]
    ColumnNotFound(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Board has no archive column")]
    NoArchiveColumn,

    #[error("Task {0} is already archived")]
    AlreadyArchived(String),

    #[error("Task {0} is not archived")]
    NotArchived(String),
}

fn column_index(board: &Board, column_id: &str) -> Option<usize> {
    board.columns.iter().position(|c| c.id == column_id)
}

fn locate(board: &Board, task_id: &str) -> Result<(usize, usize), CommandError> {
    board
        .find_task(task_id)
        .ok_or_else(|| CommandError::TaskNotFound(task_id.to_string()))
}

fn column_title(board: &Board, column_id: &str) -> Result<String, CommandError> {
    board
        .column(column_id)
        .map(|c| c.title.clone())
        .ok_or_else(|| CommandError::ColumnNotFound(column_id.to_string()))
}

/// Take a task out of whichever column holds it.
fn take_task(board: &mut Board, task_id: &str) -> Option<Task> {
    let (ci, ti) = board.find_task(task_id)?;
    Some(board.columns[ci].tasks.remove(ti))
}

fn insert_task(board: &mut Board, column_id: &str, index: usize, task: Task) -> Result<(), Task> {
    match board.column_mut(column_id) {
        Some(column) => {
            let index = index.min(column.tasks.len());
            column.tasks.insert(index, task);
            Ok(())
        }
        None => Err(task),
    }
}

/// Take a task from wherever it is and insert it into `column_id` at
/// `index` (after removal). False, with the board untouched, when either
/// the task or the column is missing.
fn return_task(board: &mut Board, task_id: &str, column_id: &str, index: usize) -> bool {
    let Some(ci) = column_index(board, column_id) else {
        return false;
    };
    let Some(task) = take_task(board, task_id) else {
        return false;
    };
    let tasks = &mut board.columns[ci].tasks;
    tasks.insert(index.min(tasks.len()), task);
    true
}

/// Move within or across columns. Within a column the target index refers
/// to the position before removal.
fn relocate(board: &mut Board, task_id: &str, target_column_id: &str, target_index: usize) -> bool {
    let Some((ci, ti)) = board.find_task(task_id) else {
        return false;
    };
    let Some(target_ci) = column_index(board, target_column_id) else {
        return false;
    };

    let task = board.columns[ci].tasks.remove(ti);
    let mut index = target_index;
    if ci == target_ci && ti < target_index {
        index -= 1;
    }
    let tasks = &mut board.columns[target_ci].tasks;
    tasks.insert(index.min(tasks.len()), task);
    true
}

fn stale(command: &str, task_id: &str) {
    log::warn!(
        "[flowdeck.history] {} skipped: task {} or its column no longer exists",
        command,
        task_id
    );
}

// ── Add ─────────────────────────────────────────────────────────────────────

pub struct AddTask {
    column_id: String,
    column_title: String,
    index: Option<usize>,
    task_id: String,
    title: String,
    /// Held while the task is off the board.
    task: Option<Task>,
    timestamp: DateTime<Utc>,
    previous_counter: i32,
    previous_number: i32,
    previous_completed_at: Option<DateTime<Utc>>,
}

impl AddTask {
    /// `index` defaults to the end of the column and is clamped on execute.
    pub fn new(board: &Board, column_id: &str, task: Task, index: Option<usize>) -> Result<Self, CommandError> {
        Ok(Self {
            column_title: column_title(board, column_id)?,
            column_id: column_id.to_string(),
            index,
            task_id: task.id.clone(),
            title: task.title.clone(),
            previous_counter: board.next_work_item_number,
            previous_number: task.work_item_number,
            previous_completed_at: task.completed_at,
            task: Some(task),
            timestamp: Utc::now(),
        })
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl Command for AddTask {
    type Target = Board;

    fn execute(&mut self, board: &mut Board) {
        let Some(mut task) = self.task.take() else {
            return;
        };
        if board.column(&self.column_id).is_none() {
            stale("Add", &self.task_id);
            self.task = Some(task);
            return;
        }

        self.previous_counter = board.next_work_item_number;
        self.previous_number = task.work_item_number;
        self.previous_completed_at = task.completed_at;

        numbering::ensure_task_number(board, &mut task);
        board.mark_completed_on_enter(&self.column_id, &mut task, self.timestamp);

        let index = self.index.unwrap_or(usize::MAX);
        if let Err(task) = insert_task(board, &self.column_id, index, task) {
            self.task = Some(task);
        }
    }

    fn undo(&mut self, board: &mut Board) {
        if self.task.is_some() {
            return;
        }
        let Some(mut task) = take_task(board, &self.task_id) else {
            stale("Undo add", &self.task_id);
            return;
        };
        task.work_item_number = self.previous_number;
        task.completed_at = self.previous_completed_at;
        board.next_work_item_number = self.previous_counter;
        self.task = Some(task);
    }

    fn description(&self) -> String {
        format!("Add '{}' to {}", self.title, self.column_title)
    }
}

// ── Delete ──────────────────────────────────────────────────────────────────

pub struct DeleteTask {
    column_id: String,
    index: usize,
    task_id: String,
    title: String,
    task: Option<Task>,
}

impl DeleteTask {
    pub fn new(board: &Board, task_id: &str) -> Result<Self, CommandError> {
        let (ci, ti) = locate(board, task_id)?;
        let column = &board.columns[ci];
        Ok(Self {
            column_id: column.id.clone(),
            index: ti,
            task_id: task_id.to_string(),
            title: column.tasks[ti].title.clone(),
            task: None,
        })
    }
}

impl Command for DeleteTask {
    type Target = Board;

    fn execute(&mut self, board: &mut Board) {
        if self.task.is_some() {
            return;
        }
        match take_task(board, &self.task_id) {
            Some(task) => self.task = Some(task),
            None => stale("Delete", &self.task_id),
        }
    }

    fn undo(&mut self, board: &mut Board) {
        let Some(task) = self.task.take() else {
            return;
        };
        if let Err(task) = insert_task(board, &self.column_id, self.index, task) {
            stale("Undo delete", &self.task_id);
            self.task = Some(task);
        }
    }

    fn description(&self) -> String {
        format!("Delete '{}'", self.title)
    }
}

// ── Move ────────────────────────────────────────────────────────────────────

pub struct MoveTask {
    task_id: String,
    title: String,
    source_column_id: String,
    source_index: usize,
    target_column_id: String,
    target_title: String,
    target_index: usize,
    /// Set when the move enters the done column from elsewhere.
    stamps_completion: bool,
    previous_completed_at: Option<DateTime<Utc>>,
    timestamp: DateTime<Utc>,
    applied: bool,
}

impl MoveTask {
    /// Within the same column `target_index` is the index before removal.
    pub fn new(
        board: &Board,
        task_id: &str,
        target_column_id: &str,
        target_index: usize,
    ) -> Result<Self, CommandError> {
        let (ci, ti) = locate(board, task_id)?;
        let source = &board.columns[ci];
        let task = &source.tasks[ti];
        Ok(Self {
            task_id: task_id.to_string(),
            title: task.title.clone(),
            source_column_id: source.id.clone(),
            source_index: ti,
            target_title: column_title(board, target_column_id)?,
            target_column_id: target_column_id.to_string(),
            target_index,
            stamps_completion: source.id != target_column_id && board.is_done_column(target_column_id),
            previous_completed_at: task.completed_at,
            timestamp: Utc::now(),
            applied: false,
        })
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl Command for MoveTask {
    type Target = Board;

    fn execute(&mut self, board: &mut Board) {
        if self.applied {
            return;
        }
        if !relocate(board, &self.task_id, &self.target_column_id, self.target_index) {
            stale("Move", &self.task_id);
            return;
        }
        if self.stamps_completion {
            if let Some(task) = board.task_mut(&self.task_id) {
                task.completed_at = Some(self.timestamp);
            }
        }
        self.applied = true;
    }

    fn undo(&mut self, board: &mut Board) {
        if !self.applied {
            return;
        }
        if !return_task(board, &self.task_id, &self.source_column_id, self.source_index) {
            stale("Undo move", &self.task_id);
            return;
        }
        if self.stamps_completion {
            if let Some(task) = board.task_mut(&self.task_id) {
                task.completed_at = self.previous_completed_at;
            }
        }
        self.applied = false;
    }

    fn description(&self) -> String {
        format!("Move '{}' to {}", self.title, self.target_title)
    }
}

// ── Edit ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct EditableFields {
    title: String,
    description: String,
    palette: String,
}

pub struct EditTask {
    task_id: String,
    old: EditableFields,
    new: EditableFields,
    applied: bool,
}

impl EditTask {
    /// `None` leaves the field unchanged.
    pub fn new(
        board: &Board,
        task_id: &str,
        title: Option<String>,
        description: Option<String>,
        palette: Option<String>,
    ) -> Result<Self, CommandError> {
        let (ci, ti) = locate(board, task_id)?;
        let task = &board.columns[ci].tasks[ti];
        let old = EditableFields {
            title: task.title.clone(),
            description: task.description.clone(),
            palette: task.palette.clone(),
        };
        let new = EditableFields {
            title: title.unwrap_or_else(|| old.title.clone()),
            description: description.unwrap_or_else(|| old.description.clone()),
            palette: palette.unwrap_or_else(|| old.palette.clone()),
        };
        Ok(Self {
            task_id: task_id.to_string(),
            old,
            new,
            applied: false,
        })
    }

    fn apply(&self, board: &mut Board, fields: &EditableFields) -> bool {
        let Some(task) = board.task_mut(&self.task_id) else {
            stale("Edit", &self.task_id);
            return false;
        };
        task.title = fields.title.clone();
        task.description = fields.description.clone();
        task.palette = fields.palette.clone();
        true
    }
}

impl Command for EditTask {
    type Target = Board;

    fn execute(&mut self, board: &mut Board) {
        if !self.applied && self.apply(board, &self.new) {
            self.applied = true;
        }
    }

    fn undo(&mut self, board: &mut Board) {
        if self.applied && self.apply(board, &self.old) {
            self.applied = false;
        }
    }

    fn description(&self) -> String {
        format!("Edit '{}'", self.old.title)
    }
}

// ── Block ───────────────────────────────────────────────────────────────────

pub struct SetBlocked {
    task_id: String,
    title: String,
    blocked: bool,
    reason: Option<String>,
    old_blocked: bool,
    old_reason: Option<String>,
    old_since: Option<DateTime<Utc>>,
    timestamp: DateTime<Utc>,
    applied: bool,
}

impl SetBlocked {
    /// `reason` only applies when blocking.
    pub fn new(board: &Board, task_id: &str, blocked: bool, reason: Option<String>) -> Result<Self, CommandError> {
        let (ci, ti) = locate(board, task_id)?;
        let task = &board.columns[ci].tasks[ti];
        Ok(Self {
            task_id: task_id.to_string(),
            title: task.title.clone(),
            blocked,
            reason,
            old_blocked: task.is_blocked,
            old_reason: task.blocked_reason.clone(),
            old_since: task.blocked_since,
            timestamp: Utc::now(),
            applied: false,
        })
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl Command for SetBlocked {
    type Target = Board;

    fn execute(&mut self, board: &mut Board) {
        if self.applied {
            return;
        }
        let Some(task) = board.task_mut(&self.task_id) else {
            stale("Block", &self.task_id);
            return;
        };
        task.set_blocked(self.blocked, self.timestamp);
        if self.blocked {
            if let Some(reason) = &self.reason {
                task.blocked_reason = Some(reason.clone());
            }
        }
        self.applied = true;
    }

    fn undo(&mut self, board: &mut Board) {
        if !self.applied {
            return;
        }
        let Some(task) = board.task_mut(&self.task_id) else {
            stale("Undo block", &self.task_id);
            return;
        };
        task.is_blocked = self.old_blocked;
        task.blocked_reason = self.old_reason.clone();
        task.blocked_since = self.old_since;
        self.applied = false;
    }

    fn description(&self) -> String {
        if self.blocked {
            format!("Block '{}'", self.title)
        } else {
            format!("Unblock '{}'", self.title)
        }
    }
}

// ── Archive ─────────────────────────────────────────────────────────────────

struct ArchiveState {
    is_archived: bool,
    archived_at: Option<DateTime<Utc>>,
    from_column_id: Option<String>,
    from_index: Option<i32>,
    completed_at: Option<DateTime<Utc>>,
}

impl ArchiveState {
    fn capture(task: &Task) -> Self {
        Self {
            is_archived: task.is_archived,
            archived_at: task.archived_at,
            from_column_id: task.archived_from_column_id.clone(),
            from_index: task.archived_from_index,
            completed_at: task.completed_at,
        }
    }

    fn restore(&self, task: &mut Task) {
        task.is_archived = self.is_archived;
        task.archived_at = self.archived_at;
        task.archived_from_column_id = self.from_column_id.clone();
        task.archived_from_index = self.from_index;
        task.completed_at = self.completed_at;
    }
}

pub struct ArchiveTask {
    task_id: String,
    title: String,
    archive: bool,
    source_column_id: String,
    source_index: usize,
    target_column_id: String,
    target_index: usize,
    stamps_completion: bool,
    old: ArchiveState,
    timestamp: DateTime<Utc>,
    applied: bool,
}

impl ArchiveTask {
    /// Move a task to the end of the board's archive column.
    pub fn archive(board: &Board, task_id: &str) -> Result<Self, CommandError> {
        let archive_id = board
            .archive_column_id
            .clone()
            .ok_or(CommandError::NoArchiveColumn)?;
        let archive_len = board
            .column(&archive_id)
            .map(|c| c.tasks.len())
            .ok_or_else(|| CommandError::ColumnNotFound(archive_id.clone()))?;
        let (ci, ti) = locate(board, task_id)?;
        let task = &board.columns[ci].tasks[ti];
        if task.is_archived {
            return Err(CommandError::AlreadyArchived(task_id.to_string()));
        }
        Ok(Self::build(board, ci, ti, archive_id, archive_len, true))
    }

    /// Return an archived task to the column and position it was archived
    /// from, falling back to the first non-archive column.
    pub fn unarchive(board: &Board, task_id: &str) -> Result<Self, CommandError> {
        let (ci, ti) = locate(board, task_id)?;
        let task = &board.columns[ci].tasks[ti];
        if !task.is_archived {
            return Err(CommandError::NotArchived(task_id.to_string()));
        }

        let remembered = task
            .archived_from_column_id
            .as_deref()
            .filter(|id| board.column(id).is_some() && !board.is_archive_column(id));
        let target_id = match remembered {
            Some(id) => id.to_string(),
            None => board
                .columns
                .iter()
                .find(|c| !board.is_archive_column(&c.id))
                .map(|c| c.id.clone())
                .ok_or_else(|| CommandError::ColumnNotFound("<non-archive>".to_string()))?,
        };
        let target_index = match (remembered, task.archived_from_index) {
            (Some(_), Some(index)) if index >= 0 => index as usize,
            _ => usize::MAX,
        };
        Ok(Self::build(board, ci, ti, target_id, target_index, false))
    }

    fn build(board: &Board, ci: usize, ti: usize, target_column_id: String, target_index: usize, archive: bool) -> Self {
        let source = &board.columns[ci];
        let task = &source.tasks[ti];
        Self {
            task_id: task.id.clone(),
            title: task.title.clone(),
            archive,
            source_column_id: source.id.clone(),
            source_index: ti,
            stamps_completion: source.id != target_column_id && board.is_done_column(&target_column_id),
            target_column_id,
            target_index,
            old: ArchiveState::capture(task),
            timestamp: Utc::now(),
            applied: false,
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

impl Command for ArchiveTask {
    type Target = Board;

    fn execute(&mut self, board: &mut Board) {
        if self.applied {
            return;
        }
        if !relocate(board, &self.task_id, &self.target_column_id, self.target_index) {
            stale("Archive", &self.task_id);
            return;
        }
        let moved = self.source_column_id != self.target_column_id;
        let Some(task) = board.task_mut(&self.task_id) else {
            return;
        };

        if self.archive {
            task.set_archived(true, self.timestamp);
            if !self.old.is_archived && moved {
                task.archived_from_column_id = Some(self.source_column_id.clone());
                task.archived_from_index = i32::try_from(self.source_index).ok();
            }
        } else {
            task.set_archived(false, self.timestamp);
            task.archived_from_column_id = None;
            task.archived_from_index = None;
        }
        if self.stamps_completion {
            task.completed_at = Some(self.timestamp);
        }
        self.applied = true;
    }

    fn undo(&mut self, board: &mut Board) {
        if !self.applied {
            return;
        }
        if !return_task(board, &self.task_id, &self.source_column_id, self.source_index) {
            stale("Undo archive", &self.task_id);
            return;
        }
        if let Some(task) = board.task_mut(&self.task_id) {
            self.old.restore(task);
        }
        self.applied = false;
    }

    fn description(&self) -> String {
        if self.archive {
            format!("Archive '{}'", self.title)
        } else {
            format!("Unarchive '{}'", self.title)
        }
    }
}

// ── Assign ──────────────────────────────────────────────────────────────────

pub struct AssignTask {
    task_id: String,
    title: String,
    assignee: Option<String>,
    assignee_id: Option<String>,
    old_assignee: Option<String>,
    old_assignee_id: Option<String>,
    applied: bool,
}

impl AssignTask {
    /// `None` for both clears the assignment.
    pub fn new(
        board: &Board,
        task_id: &str,
        assignee: Option<String>,
        assignee_id: Option<String>,
    ) -> Result<Self, CommandError> {
        let (ci, ti) = locate(board, task_id)?;
        let task = &board.columns[ci].tasks[ti];
        Ok(Self {
            task_id: task_id.to_string(),
            title: task.title.clone(),
            assignee,
            assignee_id,
            old_assignee: task.assignee.clone(),
            old_assignee_id: task.assignee_id.clone(),
            applied: false,
        })
    }
}

impl Command for AssignTask {
    type Target = Board;

    fn execute(&mut self, board: &mut Board) {
        if self.applied {
            return;
        }
        let Some(task) = board.task_mut(&self.task_id) else {
            stale("Assign", &self.task_id);
            return;
        };
        task.assignee = self.assignee.clone();
        task.assignee_id = self.assignee_id.clone();
        self.applied = true;
    }

    fn undo(&mut self, board: &mut Board) {
        if !self.applied {
            return;
        }
        let Some(task) = board.task_mut(&self.task_id) else {
            stale("Undo assign", &self.task_id);
            return;
        };
        task.assignee = self.old_assignee.clone();
        task.assignee_id = self.old_assignee_id.clone();
        self.applied = false;
    }

    fn description(&self) -> String {
        format!("Assign '{}'", self.title)
    }
}

// ── Closed set ──────────────────────────────────────────────────────────────

pub enum BoardCommand {
    Add(AddTask),
    Delete(DeleteTask),
    Move(MoveTask),
    Edit(EditTask),
    SetBlocked(SetBlocked),
    Archive(ArchiveTask),
    Assign(AssignTask),
}

macro_rules! dispatch {
    ($self:expr, $cmd:ident => $body:expr) => {
        match $self {
            BoardCommand::Add($cmd) => $body,
            BoardCommand::Delete($cmd) => $body,
            BoardCommand::Move($cmd) => $body,
            BoardCommand::Edit($cmd) => $body,
            BoardCommand::SetBlocked($cmd) => $body,
            BoardCommand::Archive($cmd) => $body,
            BoardCommand::Assign($cmd) => $body,
        }
    };
}

impl Command for BoardCommand {
    type Target = Board;

    fn execute(&mut self, board: &mut Board) {
        dispatch!(self, cmd => cmd.execute(board))
    }

    fn undo(&mut self, board: &mut Board) {
        dispatch!(self, cmd => cmd.undo(board))
    }

    fn description(&self) -> String {
        dispatch!(self, cmd => cmd.description())
    }
}

impl From<AddTask> for BoardCommand {
    fn from(cmd: AddTask) -> Self {
        BoardCommand::Add(cmd)
    }
}

impl From<DeleteTask> for BoardCommand {
    fn from(cmd: DeleteTask) -> Self {
        BoardCommand::Delete(cmd)
    }
}

impl From<MoveTask> for BoardCommand {
    fn from(cmd: MoveTask) -> Self {
        BoardCommand::Move(cmd)
    }
}

impl From<EditTask> for BoardCommand {
    fn from(cmd: EditTask) -> Self {
        BoardCommand::Edit(cmd)
    }
}

impl From<SetBlocked> for BoardCommand {
    fn from(cmd: SetBlocked) -> Self {
        BoardCommand::SetBlocked(cmd)
    }
}

impl From<ArchiveTask> for BoardCommand {
    fn from(cmd: ArchiveTask) -> Self {
        BoardCommand::Archive(cmd)
    }
}

impl From<AssignTask> for BoardCommand {
    fn from(cmd: AssignTask) -> Self {
        BoardCommand::Assign(cmd)
    }
}

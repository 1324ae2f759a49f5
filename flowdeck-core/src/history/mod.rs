/// Bounded undo/redo over reversible commands.
///
/// Two stacks: executing pushes onto undo and invalidates redo; undo moves the
/// top entry to redo; redo moves it back. At capacity the oldest undo entry is
/// evicted before the push.

pub mod commands;

use std::collections::VecDeque;

pub use commands::{
    AddTask, ArchiveTask, AssignTask, BoardCommand, CommandError, DeleteTask, EditTask, MoveTask,
    SetBlocked,
};

/// Default number of undoable commands kept.
pub const MAX_HISTORY_SIZE: usize = 50;

/// One reversible mutation of `Target`.
///
/// `undo` must exactly reverse `execute`, including side effects such as
/// number assignment or completion stamps. Both are idempotent: repeating
/// either without the other in between does nothing.
pub trait Command {
    type Target;

    fn execute(&mut self, target: &mut Self::Target);

    fn undo(&mut self, target: &mut Self::Target);

    fn description(&self) -> String;
}

/// Typed change notifications, dispatched in declaration order after every
/// mutating history operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryChange {
    CanUndo(bool),
    CanRedo(bool),
    UndoCount(usize),
    RedoCount(usize),
    NextUndoDescription(Option<String>),
    NextRedoDescription(Option<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

pub type Listener = Box<dyn FnMut(&HistoryChange) + Send>;

pub struct CommandHistory<C: Command> {
    undo_stack: VecDeque<C>,
    redo_stack: Vec<C>,
    capacity: usize,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl<C: Command> Default for CommandHistory<C> {
    fn default() -> Self {
        Self::with_capacity(MAX_HISTORY_SIZE)
    }
}

impl<C: Command> CommandHistory<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capacity below 1 is raised to 1.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            capacity: capacity.max(1),
            listeners: Vec::new(),
            next_subscription: 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Run the command now and record it. Clears the redo stack.
    pub fn execute(&mut self, mut command: C, target: &mut C::Target) {
        command.execute(target);

        while self.undo_stack.len() >= self.capacity {
            if let Some(evicted) = self.undo_stack.pop_front() {
                log::debug!("[flowdeck.history] Evicted '{}'", evicted.description());
            }
        }
        self.undo_stack.push_back(command);
        self.redo_stack.clear();
        self.notify();
    }

    /// Returns false (and changes nothing) when there is nothing to undo.
    pub fn undo(&mut self, target: &mut C::Target) -> bool {
        let Some(mut command) = self.undo_stack.pop_back() else {
            return false;
        };
        command.undo(target);
        self.redo_stack.push(command);
        self.notify();
        true
    }

    pub fn redo(&mut self, target: &mut C::Target) -> bool {
        let Some(mut command) = self.redo_stack.pop() else {
            return false;
        };
        command.execute(target);
        self.undo_stack.push_back(command);
        self.notify();
        true
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.notify();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    pub fn next_undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(|c| c.description())
    }

    pub fn next_redo_description(&self) -> Option<String> {
        self.redo_stack.last().map(|c| c.description())
    }

    pub fn subscribe(&mut self, listener: impl FnMut(&HistoryChange) + Send + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns false when the id was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    /// Current state as the notifications a listener would receive, in order.
    pub fn changes(&self) -> [HistoryChange; 6] {
        [
            HistoryChange::CanUndo(self.can_undo()),
            HistoryChange::CanRedo(self.can_redo()),
            HistoryChange::UndoCount(self.undo_count()),
            HistoryChange::RedoCount(self.redo_count()),
            HistoryChange::NextUndoDescription(self.next_undo_description()),
            HistoryChange::NextRedoDescription(self.next_redo_description()),
        ]
    }

    fn notify(&mut self) {
        if self.listeners.is_empty() {
            return;
        }
        let changes = self.changes();
        for (_, listener) in self.listeners.iter_mut() {
            for change in &changes {
                listener(change);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Adds `amount` to a counter.
    struct Add {
        amount: i32,
        applied: bool,
    }

    fn add(amount: i32) -> Add {
        Add { amount, applied: false }
    }

    impl Command for Add {
        type Target = i32;

        fn execute(&mut self, target: &mut i32) {
            if !self.applied {
                *target += self.amount;
                self.applied = true;
            }
        }

        fn undo(&mut self, target: &mut i32) {
            if self.applied {
                *target -= self.amount;
                self.applied = false;
            }
        }

        fn description(&self) -> String {
            format!("Add {}", self.amount)
        }
    }

    #[test]
    fn test_execute_undo_redo() {
        let mut value = 0;
        let mut history = CommandHistory::new();

        history.execute(add(2), &mut value);
        history.execute(add(3), &mut value);
        assert_eq!(value, 5);
        assert_eq!(history.next_undo_description().as_deref(), Some("Add 3"));

        assert!(history.undo(&mut value));
        assert_eq!(value, 2);
        assert_eq!(history.next_redo_description().as_deref(), Some("Add 3"));

        assert!(history.redo(&mut value));
        assert_eq!(value, 5);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_undo_on_empty_returns_false() {
        let mut value = 7;
        let mut history: CommandHistory<Add> = CommandHistory::new();
        assert!(!history.undo(&mut value));
        assert!(!history.redo(&mut value));
        assert_eq!(value, 7);
    }

    #[test]
    fn test_new_command_invalidates_redo() {
        let mut value = 0;
        let mut history = CommandHistory::new();
        history.execute(add(1), &mut value);
        history.undo(&mut value);
        assert!(history.can_redo());

        history.execute(add(10), &mut value);
        assert!(!history.can_redo());
        assert!(!history.redo(&mut value));
        assert_eq!(value, 10);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut value = 0;
        let mut history = CommandHistory::new();
        for i in 1..=(MAX_HISTORY_SIZE as i32 + 5) {
            history.execute(add(i), &mut value);
        }
        assert_eq!(history.undo_count(), MAX_HISTORY_SIZE);

        while history.undo(&mut value) {}
        // The first five additions (1..=5) are no longer undoable
        assert_eq!(value, 15);
    }

    #[test]
    fn test_custom_capacity() {
        let mut value = 0;
        let mut history = CommandHistory::with_capacity(0);
        assert_eq!(history.capacity(), 1);
        history.execute(add(1), &mut value);
        history.execute(add(2), &mut value);
        assert_eq!(history.undo_count(), 1);
        assert_eq!(history.next_undo_description().as_deref(), Some("Add 2"));
    }

    #[test]
    fn test_clear_empties_both_stacks() {
        let mut value = 0;
        let mut history = CommandHistory::new();
        history.execute(add(1), &mut value);
        history.execute(add(1), &mut value);
        history.undo(&mut value);
        history.clear();
        assert_eq!((history.undo_count(), history.redo_count()), (0, 0));
        assert_eq!(value, 1);
    }

    #[test]
    fn test_notifications_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut value = 0;
        let mut history = CommandHistory::new();
        let id = history.subscribe(move |change| sink.lock().unwrap().push(change.clone()));

        history.execute(add(4), &mut value);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                HistoryChange::CanUndo(true),
                HistoryChange::CanRedo(false),
                HistoryChange::UndoCount(1),
                HistoryChange::RedoCount(0),
                HistoryChange::NextUndoDescription(Some("Add 4".into())),
                HistoryChange::NextRedoDescription(None),
            ]
        );

        assert!(history.unsubscribe(id));
        assert!(!history.unsubscribe(id));
        history.undo(&mut value);
        assert_eq!(seen.lock().unwrap().len(), 6);
    }

    #[test]
    fn test_failed_undo_does_not_notify() {
        let count = Arc::new(Mutex::new(0));
        let sink = count.clone();
        let mut value = 0;
        let mut history: CommandHistory<Add> = CommandHistory::new();
        history.subscribe(move |_| *sink.lock().unwrap() += 1);
        history.undo(&mut value);
        assert_eq!(*count.lock().unwrap(), 0);
    }
}

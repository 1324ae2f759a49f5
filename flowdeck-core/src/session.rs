/// The active board and everything scoped to it.
///
/// A session owns the board being edited, its undo history and the attached
/// identity provider. Assignee refreshes are versioned: a refresh that
/// finishes after a newer one started, or after the provider was swapped,
/// drops its result.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast;

use crate::admin::GlobalAdmin;
use crate::history::{
    BoardCommand, CommandHistory, HistoryChange, Listener, SubscriptionId, MAX_HISTORY_SIZE,
};
use crate::numbering;
use crate::store::{BoardStore, StoreError};
use crate::types::Board;
use crate::users::{Cancellation, User, UserProvider, UsersChanged};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub history_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_capacity: MAX_HISTORY_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Users were fetched and applied; `cleared` assignee ids were removed.
    Applied { cleared: usize },
    /// A newer refresh or a provider swap superseded this one.
    Stale,
    /// The provider failed; board state is unchanged.
    Failed,
}

/// Drop every `assigneeId` not in `valid_ids`. An empty set clears them all.
/// Display names are kept. Returns how many ids were cleared.
pub fn clear_invalid_assignee_ids(board: &mut Board, valid_ids: &HashSet<String>) -> usize {
    let mut cleared = 0;
    for task in board.tasks_mut() {
        let Some(id) = task.assignee_id.as_deref() else {
            continue;
        };
        if id.trim().is_empty() {
            continue;
        }
        if valid_ids.is_empty() || !valid_ids.contains(id) {
            task.assignee_id = None;
            cleared += 1;
        }
    }
    cleared
}

fn valid_ids(users: &[User]) -> HashSet<String> {
    users
        .iter()
        .map(|u| u.id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

type SharedListener = Arc<Mutex<Listener>>;

pub struct BoardSession {
    board: Arc<Mutex<Board>>,
    history: Mutex<CommandHistory<BoardCommand>>,
    provider: Mutex<Option<Arc<dyn UserProvider>>>,
    refresh_version: AtomicU64,
    assignees: Mutex<Vec<User>>,
    listeners: Mutex<Vec<(SubscriptionId, SharedListener)>>,
    next_subscription: AtomicU64,
}

impl BoardSession {
    pub fn new(board: Board, config: &SessionConfig) -> Self {
        Self {
            board: Arc::new(Mutex::new(board)),
            history: Mutex::new(CommandHistory::with_capacity(config.history_capacity)),
            provider: Mutex::new(None),
            refresh_version: AtomicU64::new(0),
            assignees: Mutex::new(Vec::new()),
            listeners: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Shared handle to the active board.
    pub fn board(&self) -> Arc<Mutex<Board>> {
        self.board.clone()
    }

    pub fn with_board<R>(&self, f: impl FnOnce(&Board) -> R) -> R {
        f(&lock(&self.board))
    }

    // -- persistence --

    /// Replace the active board with the stored one. Clears history.
    /// `Ok(false)` when the board does not exist or failed validation.
    pub fn load(&self, store: &BoardStore, board_id: &str) -> Result<bool, StoreError> {
        let Some(mut board) = store.load_board(board_id)? else {
            return Ok(false);
        };
        let repaired = numbering::ensure_board_numbers(&mut board);
        if repaired > 0 {
            log::info!("[flowdeck.session] Repaired {} work item numbers on {}", repaired, board_id);
        }
        *lock(&self.board) = board;
        self.clear_history();
        Ok(true)
    }

    /// Persist the active board. Returns its id (assigned if it had none).
    pub fn save(&self, store: &BoardStore) -> Result<String, StoreError> {
        let mut board = lock(&self.board);
        store.save_board(&mut board)
    }

    // -- history --

    pub fn execute(&self, command: impl Into<BoardCommand>) {
        let changes = {
            let mut history = lock(&self.history);
            let mut board = lock(&self.board);
            history.execute(command.into(), &mut board);
            history.changes()
        };
        self.notify(&changes);
    }

    pub fn undo(&self) -> bool {
        let changes = {
            let mut history = lock(&self.history);
            let mut board = lock(&self.board);
            if !history.undo(&mut board) {
                return false;
            }
            history.changes()
        };
        self.notify(&changes);
        true
    }

    pub fn redo(&self) -> bool {
        let changes = {
            let mut history = lock(&self.history);
            let mut board = lock(&self.board);
            if !history.redo(&mut board) {
                return false;
            }
            history.changes()
        };
        self.notify(&changes);
        true
    }

    pub fn can_undo(&self) -> bool {
        lock(&self.history).can_undo()
    }

    pub fn can_redo(&self) -> bool {
        lock(&self.history).can_redo()
    }

    pub fn next_undo_description(&self) -> Option<String> {
        lock(&self.history).next_undo_description()
    }

    pub fn next_redo_description(&self) -> Option<String> {
        lock(&self.history).next_redo_description()
    }

    pub fn clear_history(&self) {
        let changes = {
            let mut history = lock(&self.history);
            history.clear();
            history.changes()
        };
        self.notify(&changes);
    }

    /// Listeners run after the session's locks are released, so they may
    /// query the session. A listener must not trigger another history
    /// operation on the same session.
    pub fn subscribe_history(
        &self,
        listener: impl FnMut(&HistoryChange) + Send + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        let listener: Listener = Box::new(listener);
        lock(&self.listeners).push((id, Arc::new(Mutex::new(listener))));
        id
    }

    pub fn unsubscribe_history(&self, id: SubscriptionId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn notify(&self, changes: &[HistoryChange]) {
        let listeners: Vec<SharedListener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            let mut guard = lock(&listener);
            let listener = &mut *guard;
            for change in changes {
                listener(change);
            }
        }
    }

    // -- identity --

    /// Returns false when `provider` is already the attached one.
    pub fn attach_provider(&self, provider: Option<Arc<dyn UserProvider>>) -> bool {
        let mut current = lock(&self.provider);
        let same = match (current.as_ref(), provider.as_ref()) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        if same {
            return false;
        }
        log::debug!(
            "[flowdeck.session] Attached provider {}",
            provider.as_ref().map_or("<none>", |p| p.provider_key())
        );
        *current = provider;
        true
    }

    pub fn provider(&self) -> Option<Arc<dyn UserProvider>> {
        lock(&self.provider).clone()
    }

    /// Change notifications from the attached provider, if any.
    pub fn users_changed(&self) -> Option<broadcast::Receiver<UsersChanged>> {
        lock(&self.provider).as_ref().map(|p| p.subscribe())
    }

    /// Users known from the last applied refresh.
    pub fn assignees(&self) -> Vec<User> {
        lock(&self.assignees).clone()
    }

    /// Re-fetch users and clear assignee ids that no longer resolve.
    pub async fn refresh_assignees(&self) -> RefreshOutcome {
        let version = self.refresh_version.fetch_add(1, Ordering::SeqCst) + 1;
        let Some(provider) = self.provider() else {
            let cleared = clear_invalid_assignee_ids(&mut lock(&self.board), &HashSet::new());
            lock(&self.assignees).clear();
            return RefreshOutcome::Applied { cleared };
        };

        let result = provider.get_all_users().await;

        let superseded = self.refresh_version.load(Ordering::SeqCst) != version;
        let swapped = !matches!(self.provider(), Some(current) if Arc::ptr_eq(&current, &provider));
        if superseded || swapped {
            log::debug!("[flowdeck.session] Discarding stale assignee refresh {}", version);
            return RefreshOutcome::Stale;
        }

        let users = match result {
            Ok(users) => users,
            Err(e) => {
                log::warn!("[flowdeck.session] Assignee refresh failed: {}", e);
                return RefreshOutcome::Failed;
            }
        };

        let cleared = clear_invalid_assignee_ids(&mut lock(&self.board), &valid_ids(&users));
        if cleared > 0 {
            log::info!("[flowdeck.session] Cleared {} stale assignee ids", cleared);
        }
        *lock(&self.assignees) = users;
        RefreshOutcome::Applied { cleared }
    }

    /// React to a provider's user set changing: re-run the admin bootstrap,
    /// then refresh assignees.
    pub async fn on_users_changed(&self, admin: Option<&GlobalAdmin>) -> RefreshOutcome {
        if let Some(admin) = admin {
            let provider = self.provider();
            admin
                .ensure_global_admin(provider.as_deref(), &Cancellation::new())
                .await;
        }
        self.refresh_assignees().await
    }
}

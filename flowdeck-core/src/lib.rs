/// Board state engine for Kanban boards.
///
/// Boards are persisted as JSON documents over a pluggable key/value
/// storage, sanitized and migrated on load, and edited through reversible
/// commands with bounded undo/redo.

pub mod admin;
pub mod filters;
pub mod history;
pub mod layout;
pub mod metrics;
pub mod migration;
pub mod numbering;
pub mod sanitize;
pub mod session;
pub mod settings;
pub mod storage;
pub mod store;
pub mod types;
pub mod users;

pub use admin::GlobalAdmin;
pub use metrics::{board_metrics, lane_metrics, BoardMetrics};
pub use session::{BoardSession, RefreshOutcome, SessionConfig};
pub use settings::{SettingsStore, UserSettings};
pub use storage::{local::FileStateStorage, memory::MemoryStateStorage, StateStorage, StorageError};
pub use store::{BoardStore, StoreError};
pub use types::{Board, BoardMetadata, Column, Lane, Priority, Subtask, Task};

/// Board persistence over a `StateStorage` backend.
///
/// One JSON document per board under `kanban.board.<id>`. Writes go to
/// `kanban.board.<id>.tmp` first and are renamed onto the real key, so a
/// crash mid-write leaves either the previous document or temp litter,
/// never a truncated primary key.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::migration::CURRENT_SCHEMA_VERSION;
use crate::sanitize;
use crate::storage::{self, StateStorage, StorageError, TEMP_SUFFIX};
use crate::types::{new_id, Board, BoardMetadata, UNTITLED_BOARD};

pub const BOARD_KEY_PREFIX: &str = "kanban.board";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub fn board_key(board_id: &str) -> String {
    format!("{}.{}", BOARD_KEY_PREFIX, board_id)
}

/// Board id encoded in a storage key, if the key is a board key with a valid id.
pub fn board_id_from_key(key: &str) -> Option<&str> {
    let id = key.strip_prefix(BOARD_KEY_PREFIX)?.strip_prefix('.')?;
    sanitize::is_valid_id(id).then_some(id)
}

#[derive(Clone)]
pub struct BoardStore {
    storage: Arc<dyn StateStorage>,
}

impl BoardStore {
    pub fn new(storage: Arc<dyn StateStorage>) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &Arc<dyn StateStorage> {
        &self.storage
    }

    /// Metadata for every readable board. Never fails: unreadable entries
    /// are skipped.
    pub fn list_boards(&self) -> Vec<BoardMetadata> {
        let root = format!("{}.", BOARD_KEY_PREFIX);
        let keys = match self.storage.get_keys(&root) {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("[flowdeck.store] Failed to list boards: {}", e);
                return Vec::new();
            }
        };

        let mut boards = Vec::new();
        for key in keys {
            if key.ends_with(TEMP_SUFFIX) {
                continue;
            }
            let Some(board_id) = board_id_from_key(&key) else {
                log::debug!("[flowdeck.store] Skipping key with invalid board id: {}", key);
                continue;
            };
            let json = match storage::load_text(self.storage.as_ref(), &key) {
                Ok(Some(json)) if !json.trim().is_empty() => json,
                Ok(_) => continue,
                Err(e) => {
                    log::debug!("[flowdeck.store] Skipping unreadable board {}: {}", board_id, e);
                    continue;
                }
            };
            match sanitize::try_build_board_metadata(&json, board_id) {
                Some(meta) => boards.push(meta),
                None => log::debug!("[flowdeck.store] Skipping invalid board {}", board_id),
            }
        }
        boards
    }

    /// `Ok(None)` for invalid ids, absent keys and content that fails
    /// sanitization. Errors only on storage faults.
    pub fn load_board(&self, board_id: &str) -> Result<Option<Board>, StoreError> {
        if !sanitize::is_valid_id(board_id) {
            return Ok(None);
        }
        let Some(json) = storage::load_text(self.storage.as_ref(), &board_key(board_id))? else {
            return Ok(None);
        };
        if json.trim().is_empty() {
            return Ok(None);
        }

        let Some(mut board) = sanitize::try_load_from_json(&json) else {
            log::debug!("[flowdeck.store] Board {} failed validation", board_id);
            return Ok(None);
        };
        if board.id != board_id {
            log::info!(
                "[flowdeck.store] Board id {} does not match key, healing to {}",
                board.id,
                board_id
            );
            board.id = board_id.to_string();
        }
        Ok(Some(board))
    }

    /// Persist a board. Assigns a fresh id when the current one is invalid and
    /// stamps the current schema version. Returns the id written.
    pub fn save_board(&self, board: &mut Board) -> Result<String, StoreError> {
        if !sanitize::is_valid_id(&board.id) {
            board.id = new_id();
        }
        board.schema_version = CURRENT_SCHEMA_VERSION;

        let json = serde_json::to_string_pretty(board)?;
        let key = board_key(&board.id);
        let temp_key = format!("{}{}", key, TEMP_SUFFIX);

        storage::save_text(self.storage.as_ref(), &temp_key, &json)?;
        self.storage.rename(&temp_key, &key)?;
        log::debug!("[flowdeck.store] Saved board {}", board.id);
        Ok(board.id.clone())
    }

    /// Idempotent. `Ok(false)` when the id is invalid.
    pub fn delete_board(&self, board_id: &str) -> Result<bool, StoreError> {
        if !sanitize::is_valid_id(board_id) {
            return Ok(false);
        }
        self.storage.delete(&board_key(board_id))?;
        log::info!("[flowdeck.store] Deleted board {}", board_id);
        Ok(true)
    }

    /// Retitle a stored board without making it active. `Ok(false)` when the
    /// board cannot be loaded.
    pub fn rename_board(&self, board_id: &str, title: &str) -> Result<bool, StoreError> {
        let Some(mut board) = self.load_board(board_id)? else {
            return Ok(false);
        };
        let title = sanitize::sanitize_required_text(title, sanitize::MAX_BOARD_TITLE_LENGTH, false);
        board.title = if title.is_empty() {
            UNTITLED_BOARD.to_string()
        } else {
            title
        };
        self.save_board(&mut board)?;
        log::info!("[flowdeck.store] Renamed board {} to {:?}", board_id, board.title);
        Ok(true)
    }

    /// Copy a stored board under a fresh id and a title no other board uses.
    /// Returns the new id, or `None` when the source cannot be loaded.
    pub fn duplicate_board(&self, board_id: &str) -> Result<Option<String>, StoreError> {
        let Some(mut board) = self.load_board(board_id)? else {
            return Ok(None);
        };
        let existing: HashSet<String> = self
            .list_boards()
            .into_iter()
            .map(|meta| meta.title.trim().to_lowercase())
            .filter(|title| !title.is_empty())
            .collect();
        board.title = duplicate_title(&board.title, &existing);
        board.id = new_id();
        board.created_at = Utc::now();
        board.updated_at = None;
        let id = self.save_board(&mut board)?;
        log::info!("[flowdeck.store] Duplicated board {} as {}", board_id, id);
        Ok(Some(id))
    }

    /// The stored document verbatim, provided it is still safe JSON.
    pub fn export_board(&self, board_id: &str) -> Result<Option<String>, StoreError> {
        if !sanitize::is_valid_id(board_id) {
            return Ok(None);
        }
        let Some(content) = storage::load_text(self.storage.as_ref(), &board_key(board_id))? else {
            return Ok(None);
        };
        if !is_exportable(&content) {
            log::warn!("[flowdeck.store] Refusing to export unsafe content for board {}", board_id);
            return Ok(None);
        }
        Ok(Some(content))
    }

    /// Temp keys left next to existing boards by interrupted saves.
    pub fn orphaned_temp_keys(&self) -> Result<Vec<String>, StoreError> {
        let root = format!("{}.", BOARD_KEY_PREFIX);
        let mut orphans = Vec::new();
        for key in self.storage.get_keys(&root)? {
            let temp = format!("{}{}", key, TEMP_SUFFIX);
            if !self.storage.load_lines(&temp)?.is_empty() {
                orphans.push(temp);
            }
        }
        Ok(orphans)
    }
}

/// `title` without a trailing ` (N)`, then the first of `title`,
/// `title (1)`, `title (2)`... not in `existing` (lowercased).
fn duplicate_title(title: &str, existing: &HashSet<String>) -> String {
    let mut base = strip_copy_suffix(title.trim());
    if base.is_empty() {
        base = UNTITLED_BOARD;
    }
    if !existing.contains(&base.to_lowercase()) {
        return base.to_string();
    }
    (1u32..)
        .map(|n| format!("{} ({})", base, n))
        .find(|candidate| !existing.contains(&candidate.to_lowercase()))
        .unwrap_or_else(|| base.to_string())
}

fn strip_copy_suffix(title: &str) -> &str {
    let Some(inner) = title.strip_suffix(')') else {
        return title;
    };
    match inner.rfind(" (") {
        Some(start) if start > 0 => {
            let digits = &inner[start + 2..];
            if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                &title[..start]
            } else {
                title
            }
        }
        _ => title,
    }
}

fn is_exportable(content: &str) -> bool {
    sanitize::is_safe_json_content(content)
        && matches!(serde_json::from_str::<Value>(content), Ok(Value::Object(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::FileStateStorage;
    use crate::storage::memory::MemoryStateStorage;
    use crate::types::{Column, Task};
    use tempfile::TempDir;

    fn sample_board() -> Board {
        let mut board = Board::new("Release");
        let mut todo = Column::new("Todo");
        let mut task = Task::new("Write notes");
        task.work_item_number = 1;
        todo.tasks.push(task);
        board.columns.push(todo);
        board.columns.push(Column::new("Done"));
        board.done_column_id = Some(board.columns[1].id.clone());
        board.next_work_item_number = 2;
        board
    }

    fn memory_store() -> (Arc<MemoryStateStorage>, BoardStore) {
        let storage = Arc::new(MemoryStateStorage::new());
        let store = BoardStore::new(storage.clone());
        (storage, store)
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = BoardStore::new(Arc::new(FileStateStorage::new(dir.path())));

        let mut board = sample_board();
        let id = store.save_board(&mut board).unwrap();
        let loaded = store.load_board(&id).unwrap().unwrap();
        assert_eq!(loaded, board);
    }

    #[test]
    fn test_save_assigns_id_and_schema() {
        let (storage, store) = memory_store();
        let mut board = sample_board();
        board.id = "not-a-uuid".into();
        board.schema_version = 0;

        let id = store.save_board(&mut board).unwrap();
        assert!(sanitize::is_valid_id(&id));
        assert_eq!(board.id, id);
        assert_eq!(board.schema_version, CURRENT_SCHEMA_VERSION);
        assert!(storage.contains_key(&board_key(&id)));
        assert!(!storage.contains_key(&format!("{}.tmp", board_key(&id))));
    }

    #[test]
    fn test_crash_before_rename_keeps_previous_document() {
        let (storage, store) = memory_store();
        let mut board = sample_board();
        let id = store.save_board(&mut board).unwrap();

        board.title = "Renamed".into();
        storage.fail_next_rename();
        assert!(matches!(store.save_board(&mut board), Err(StoreError::Storage(_))));

        let loaded = store.load_board(&id).unwrap().unwrap();
        assert_eq!(loaded.title, "Release");
        assert_eq!(store.list_boards().len(), 1);
        assert_eq!(store.orphaned_temp_keys().unwrap(), vec![format!("{}.tmp", board_key(&id))]);
    }

    #[test]
    fn test_load_heals_mismatched_id() {
        let (storage, store) = memory_store();
        let mut board = sample_board();
        let stored_under = new_id();
        let json = serde_json::to_string(&board).unwrap();
        storage::save_text(storage.as_ref(), &board_key(&stored_under), &json).unwrap();

        let loaded = store.load_board(&stored_under).unwrap().unwrap();
        assert_eq!(loaded.id, stored_under);
        board.id = stored_under;
        assert_eq!(loaded, board);
    }

    #[test]
    fn test_load_soft_failures() {
        let (storage, store) = memory_store();
        assert!(store.load_board("../etc").unwrap().is_none());
        assert!(store.load_board(&new_id()).unwrap().is_none());

        let id = new_id();
        storage::save_text(storage.as_ref(), &board_key(&id), "{ broken").unwrap();
        assert!(store.load_board(&id).unwrap().is_none());
    }

    #[test]
    fn test_load_surfaces_storage_fault() {
        let (storage, store) = memory_store();
        storage.set_fail_reads(true);
        assert!(matches!(store.load_board(&new_id()), Err(StoreError::Storage(_))));
        // Listing never fails
        assert!(store.list_boards().is_empty());
    }

    #[test]
    fn test_list_skips_invalid_entries() {
        let (storage, store) = memory_store();
        let mut board = sample_board();
        let id = store.save_board(&mut board).unwrap();

        storage::save_text(storage.as_ref(), "kanban.board.not-an-id", "{}").unwrap();
        storage::save_text(storage.as_ref(), &board_key(&new_id()), "garbage").unwrap();
        storage::save_text(storage.as_ref(), &format!("{}.tmp", board_key(&new_id())), "{}").unwrap();
        storage::save_text(storage.as_ref(), "kanban.admin.global", "u1").unwrap();

        let boards = store.list_boards();
        assert_eq!(boards.len(), 1);
        assert_eq!(boards[0].id, id);
        assert_eq!(boards[0].title, "Release");
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (_, store) = memory_store();
        let mut board = sample_board();
        let id = store.save_board(&mut board).unwrap();

        assert!(store.delete_board(&id).unwrap());
        assert!(store.delete_board(&id).unwrap());
        assert!(store.load_board(&id).unwrap().is_none());
        assert!(!store.delete_board("bad id").unwrap());
    }

    #[test]
    fn test_export_returns_stored_text() {
        let (storage, store) = memory_store();
        let mut board = sample_board();
        let id = store.save_board(&mut board).unwrap();

        let exported = store.export_board(&id).unwrap().unwrap();
        let value: Value = serde_json::from_str(&exported).unwrap();
        assert_eq!(value["title"], "Release");

        let other = new_id();
        storage::save_text(storage.as_ref(), &board_key(&other), "[1, 2, 3]").unwrap();
        assert!(store.export_board(&other).unwrap().is_none());
        assert!(store.export_board("nope").unwrap().is_none());
    }
    #[test]
    fn test_non_canonical_id_is_replaced_and_listed() {
        let dir = TempDir::new().unwrap();
        let store = BoardStore::new(Arc::new(FileStateStorage::new(dir.path())));
        let mut board = sample_board();
        board.id = format!("urn:uuid:{}", new_id());

        let id = store.save_board(&mut board).unwrap();
        assert!(!id.starts_with("urn:"));
        let listed: Vec<String> = store.list_boards().into_iter().map(|b| b.id).collect();
        assert_eq!(listed, vec![id.clone()]);
        assert!(store.load_board(&id).unwrap().is_some());

        let braced = format!("{{{}}}", id);
        assert!(store.load_board(&braced).unwrap().is_none());
    }

    #[test]
    fn test_newer_schema_is_neither_listed_nor_loaded() {
        let (storage, store) = memory_store();
        let id = new_id();
        storage::save_text(storage.as_ref(), &board_key(&id), r#"{"title":"Future","schemaVersion":3}"#)
            .unwrap();

        assert!(store.list_boards().is_empty());
        assert!(store.load_board(&id).unwrap().is_none());
    }

    #[test]
    fn test_rename_board() {
        let (_, store) = memory_store();
        let mut board = sample_board();
        let id = store.save_board(&mut board).unwrap();

        assert!(store.rename_board(&id, "  Launch\u{7} ").unwrap());
        assert_eq!(store.load_board(&id).unwrap().unwrap().title, "Launch");
        assert!(store.rename_board(&id, "   ").unwrap());
        assert_eq!(store.list_boards()[0].title, UNTITLED_BOARD);
        assert!(!store.rename_board(&new_id(), "Nope").unwrap());
    }

    #[test]
    fn test_duplicate_board() {
        let (_, store) = memory_store();
        let mut board = sample_board();
        let id = store.save_board(&mut board).unwrap();

        let first = store.duplicate_board(&id).unwrap().unwrap();
        let second = store.duplicate_board(&first).unwrap().unwrap();
        assert_ne!(first, id);

        let copy = store.load_board(&first).unwrap().unwrap();
        assert_eq!(copy.title, "Release (1)");
        assert_eq!(copy.next_work_item_number, board.next_work_item_number);
        assert_eq!(copy.tasks().count(), 1);
        assert_eq!(store.load_board(&second).unwrap().unwrap().title, "Release (2)");
        assert_eq!(store.list_boards().len(), 3);
        assert!(store.duplicate_board(&new_id()).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_title() {
        let existing: HashSet<String> = ["plan", "plan (1)"].iter().map(|s| s.to_string()).collect();
        assert_eq!(duplicate_title("Plan", &existing), "Plan (2)");
        assert_eq!(duplicate_title("Plan (1)", &existing), "Plan (2)");
        assert_eq!(duplicate_title("Other", &existing), "Other");
        assert_eq!(duplicate_title("Sprint (x)", &existing), "Sprint (x)");
        assert_eq!(duplicate_title("  ", &existing), UNTITLED_BOARD);
    }
}

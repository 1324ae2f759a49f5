/// Per-user preferences persisted next to the boards.
///
/// Settings for a signed-in user live under `kanban.user.settings.<userId>`.
/// Without a user the shared `kanban.settings` key is used, and a user's
/// first load adopts whatever that shared key holds.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::sanitize;
use crate::storage::{self, StateStorage};
use crate::store::{BoardStore, StoreError};
use crate::types::Board;

pub const LEGACY_SETTINGS_KEY: &str = "kanban.settings";
pub const USER_SETTINGS_KEY_PREFIX: &str = "kanban.user.settings";

pub const DEFAULT_COMPACT_CARD_COUNT: i32 = 3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddCardPlacement {
    Top,
    #[default]
    Bottom,
}

impl<'de> Deserialize<'de> for AddCardPlacement {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(d)?;
        let top = match &value {
            Value::Number(n) => n.as_i64() == Some(0),
            Value::String(s) => s.trim().eq_ignore_ascii_case("top"),
            _ => false,
        };
        Ok(if top { AddCardPlacement::Top } else { AddCardPlacement::Bottom })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserSettings {
    pub confirm_column_removals: bool,
    pub confirm_card_removals: bool,
    pub auto_save_after_edits: bool,
    pub auto_expand_card_details: bool,
    pub enable_undo_redo: bool,
    pub add_card_placement: AddCardPlacement,
    pub compact_manual_card_count: i32,
    pub show_welcome_message: bool,
    pub welcome_message_title: String,
    pub welcome_message_subtitle: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_board_id: Option<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            confirm_column_removals: true,
            confirm_card_removals: true,
            auto_save_after_edits: true,
            auto_expand_card_details: true,
            enable_undo_redo: false,
            add_card_placement: AddCardPlacement::Bottom,
            compact_manual_card_count: DEFAULT_COMPACT_CARD_COUNT,
            show_welcome_message: true,
            welcome_message_title: String::new(),
            welcome_message_subtitle: String::new(),
            last_board_id: None,
        }
    }
}

/// Storage key for `user_id`'s settings; the shared key when there is no user.
pub fn settings_key(user_id: Option<&str>) -> String {
    match user_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => storage::build_scoped_key(USER_SETTINGS_KEY_PREFIX, &[id])
            .unwrap_or_else(|_| LEGACY_SETTINGS_KEY.to_string()),
        None => LEGACY_SETTINGS_KEY.to_string(),
    }
}

#[derive(Clone)]
pub struct SettingsStore {
    storage: Arc<dyn StateStorage>,
}

impl SettingsStore {
    pub fn new(storage: Arc<dyn StateStorage>) -> Self {
        Self { storage }
    }

    /// Stored settings, or defaults when nothing usable is stored. A user
    /// with no settings of their own inherits the shared ones, which are
    /// then written under the user's key.
    pub fn load(&self, user_id: Option<&str>) -> Result<UserSettings, StoreError> {
        let key = settings_key(user_id);
        if let Some(settings) = self.read(&key)? {
            return Ok(settings);
        }
        if key == LEGACY_SETTINGS_KEY {
            return Ok(UserSettings::default());
        }
        match self.read(LEGACY_SETTINGS_KEY)? {
            Some(legacy) => {
                log::info!("[flowdeck.settings] Migrating shared settings to {}", key);
                self.write(&key, &legacy)?;
                Ok(legacy)
            }
            None => Ok(UserSettings::default()),
        }
    }

    pub fn save(&self, user_id: Option<&str>, settings: &UserSettings) -> Result<(), StoreError> {
        self.write(&settings_key(user_id), settings)
    }

    /// Remember `board_id` as the board to reopen. No write when unchanged.
    pub fn record_last_board(&self, user_id: Option<&str>, board_id: &str) -> Result<(), StoreError> {
        if !sanitize::is_valid_id(board_id) {
            return Ok(());
        }
        let mut settings = self.load(user_id)?;
        if settings.last_board_id.as_deref() == Some(board_id) {
            return Ok(());
        }
        settings.last_board_id = Some(board_id.to_string());
        self.save(user_id, &settings)
    }

    /// Drop the remembered board if it is `board_id`. Returns true when cleared.
    pub fn forget_board(&self, user_id: Option<&str>, board_id: &str) -> Result<bool, StoreError> {
        let mut settings = self.load(user_id)?;
        if settings.last_board_id.as_deref() != Some(board_id) {
            return Ok(false);
        }
        settings.last_board_id = None;
        self.save(user_id, &settings)?;
        Ok(true)
    }

    /// The remembered board, if it still loads.
    pub fn load_last_board(&self, store: &BoardStore, user_id: Option<&str>) -> Result<Option<Board>, StoreError> {
        let Some(board_id) = self.load(user_id)?.last_board_id else {
            return Ok(None);
        };
        let board = store.load_board(&board_id)?;
        if board.is_none() {
            log::debug!("[flowdeck.settings] Last board {} is gone", board_id);
        }
        Ok(board)
    }

    fn read(&self, key: &str) -> Result<Option<UserSettings>, StoreError> {
        let Some(json) = storage::load_text(self.storage.as_ref(), key)? else {
            return Ok(None);
        };
        if !sanitize::is_safe_json_content(&json) {
            log::warn!("[flowdeck.settings] Ignoring unsafe settings in {}", key);
            return Ok(None);
        }
        match serde_json::from_str(&json) {
            Ok(settings) => Ok(Some(settings)),
            Err(e) => {
                log::warn!("[flowdeck.settings] Failed to parse {}: {}", key, e);
                Ok(None)
            }
        }
    }

    fn write(&self, key: &str, settings: &UserSettings) -> Result<(), StoreError> {
        let json = serde_json::to_string_pretty(settings)?;
        storage::save_text(self.storage.as_ref(), key, &json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::local::FileStateStorage;
    use crate::storage::memory::MemoryStateStorage;
    use tempfile::TempDir;

    fn settings_store() -> (Arc<MemoryStateStorage>, SettingsStore) {
        let storage = Arc::new(MemoryStateStorage::new());
        (storage.clone(), SettingsStore::new(storage))
    }

    #[test]
    fn test_settings_key() {
        assert_eq!(settings_key(None), LEGACY_SETTINGS_KEY);
        assert_eq!(settings_key(Some("  ")), LEGACY_SETTINGS_KEY);
        assert_eq!(settings_key(Some("local:u1")), "kanban.user.settings.local:u1");
    }

    #[test]
    fn test_defaults_when_missing_or_invalid() {
        let (storage, settings) = settings_store();
        assert_eq!(settings.load(Some("u1")).unwrap(), UserSettings::default());

        storage::save_text(storage.as_ref(), "kanban.user.settings.u1", "{ nope").unwrap();
        assert_eq!(settings.load(Some("u1")).unwrap(), UserSettings::default());
    }

    #[test]
    fn test_partial_document_and_numeric_placement() {
        let (storage, settings) = settings_store();
        storage::save_text(
            storage.as_ref(),
            LEGACY_SETTINGS_KEY,
            r#"{"enableUndoRedo":true,"addCardPlacement":0,"unknownField":1}"#,
        )
        .unwrap();

        let loaded = settings.load(None).unwrap();
        assert!(loaded.enable_undo_redo);
        assert_eq!(loaded.add_card_placement, AddCardPlacement::Top);
        assert!(loaded.confirm_card_removals);
        assert_eq!(loaded.compact_manual_card_count, DEFAULT_COMPACT_CARD_COUNT);
    }

    #[test]
    fn test_user_inherits_shared_settings_once() {
        let (storage, settings) = settings_store();
        let shared = UserSettings {
            show_welcome_message: false,
            ..Default::default()
        };
        settings.save(None, &shared).unwrap();

        let loaded = settings.load(Some("local:u1")).unwrap();
        assert!(!loaded.show_welcome_message);
        assert!(storage.contains_key("kanban.user.settings.local:u1"));

        settings.save(None, &UserSettings::default()).unwrap();
        assert!(!settings.load(Some("local:u1")).unwrap().show_welcome_message);
    }

    #[test]
    fn test_users_are_isolated() {
        let dir = TempDir::new().unwrap();
        let settings = SettingsStore::new(Arc::new(FileStateStorage::new(dir.path())));
        let mut mine = UserSettings::default();
        mine.welcome_message_title = "Hello".into();
        settings.save(Some("local:a"), &mine).unwrap();

        assert_eq!(settings.load(Some("local:a")).unwrap().welcome_message_title, "Hello");
        assert_eq!(settings.load(Some("local:b")).unwrap().welcome_message_title, "");
    }

    #[test]
    fn test_last_board_tracking() {
        let (storage, settings) = settings_store();
        let store = BoardStore::new(storage.clone());
        assert!(settings.load_last_board(&store, Some("u1")).unwrap().is_none());

        let mut board = Board::new("Roadmap");
        let id = store.save_board(&mut board).unwrap();
        settings.record_last_board(Some("u1"), &id).unwrap();
        settings.record_last_board(Some("u1"), "not-an-id").unwrap();
        assert_eq!(settings.load(Some("u1")).unwrap().last_board_id.as_deref(), Some(id.as_str()));

        let last = settings.load_last_board(&store, Some("u1")).unwrap().unwrap();
        assert_eq!(last.title, "Roadmap");

        store.delete_board(&id).unwrap();
        assert!(settings.load_last_board(&store, Some("u1")).unwrap().is_none());
        assert!(!settings.forget_board(Some("u1"), "other").unwrap());
        assert!(settings.forget_board(Some("u1"), &id).unwrap());
        assert_eq!(settings.load(Some("u1")).unwrap().last_board_id, None);
    }
}

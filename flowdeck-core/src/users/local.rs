use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Cancellation, IdentityError, User, UserProvider, UsersChanged};
use crate::storage::{StateStorage, StorageError};
use crate::types::new_id;

pub const LOCAL_PROVIDER_KEY: &str = "local";

/// Storage key holding the raw id of this machine's user.
pub const LOCAL_USER_ID_KEY: &str = "FlowKanban.LocalUserId";

const DEMO_USER_NAMES: [&str; 10] = [
    "Sam", "Dario", "Max", "Demis", "Adam", "Lucy", "Anita", "Sue", "Eric", "Forrest",
];

/// In-process provider representing the machine's user, plus any users
/// added at runtime.
pub struct LocalUserProvider {
    users: Mutex<Vec<User>>,
    current: User,
    changed: broadcast::Sender<UsersChanged>,
}

impl LocalUserProvider {
    /// The local user's id is created once and persisted; later instances
    /// over the same storage reuse it.
    pub fn new(storage: Arc<dyn StateStorage>, include_demo_users: bool) -> Result<Self, StorageError> {
        let raw_id = load_or_create_user_id(storage.as_ref())?;
        let current = User::new(LOCAL_PROVIDER_KEY, raw_id, system_user_name());

        let mut users = vec![current.clone()];
        if include_demo_users {
            users.extend(
                DEMO_USER_NAMES
                    .iter()
                    .map(|name| User::new(LOCAL_PROVIDER_KEY, new_id(), *name)),
            );
        }

        let (changed, _) = broadcast::channel(16);
        Ok(Self {
            users: Mutex::new(users),
            current,
            changed,
        })
    }

    pub fn current_user(&self) -> &User {
        &self.current
    }

    pub fn users(&self) -> Vec<User> {
        self.users.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn user_by_raw_id(&self, raw_id: &str) -> Option<User> {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|u| u.raw_id == raw_id)
            .cloned()
    }

    /// Case-insensitive match on display name or email.
    pub fn search_users(&self, query: &str, max_results: usize) -> Vec<User> {
        let needle = query.to_lowercase();
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|u| {
                u.display_name.to_lowercase().contains(&needle)
                    || u.email.as_deref().is_some_and(|e| e.to_lowercase().contains(&needle))
            })
            .take(max_results)
            .cloned()
            .collect()
    }

    pub fn add_user(&self, display_name: &str, email: Option<&str>) -> User {
        let mut user = User::new(LOCAL_PROVIDER_KEY, new_id(), display_name);
        user.email = email.map(str::to_string);
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(user.clone());
        self.notify();
        user
    }

    /// The current user cannot be removed.
    pub fn remove_user(&self, raw_id: &str) -> bool {
        if raw_id == self.current.raw_id {
            return false;
        }
        let removed = {
            let mut users = self.users.lock().unwrap_or_else(PoisonError::into_inner);
            let before = users.len();
            users.retain(|u| u.raw_id != raw_id);
            users.len() != before
        };
        if removed {
            self.notify();
        }
        removed
    }

    fn notify(&self) {
        // No receivers is fine
        let _ = self.changed.send(UsersChanged);
    }
}

#[async_trait]
impl UserProvider for LocalUserProvider {
    fn provider_key(&self) -> &str {
        LOCAL_PROVIDER_KEY
    }

    async fn get_all_users(&self) -> Result<Vec<User>, IdentityError> {
        Ok(self.users())
    }

    async fn get_current_user(&self, cancel: &Cancellation) -> Result<Option<User>, IdentityError> {
        if cancel.is_cancelled() {
            return Err(IdentityError::Cancelled);
        }
        Ok(Some(self.current.clone()))
    }

    fn subscribe(&self) -> broadcast::Receiver<UsersChanged> {
        self.changed.subscribe()
    }
}

fn load_or_create_user_id(storage: &dyn StateStorage) -> Result<String, StorageError> {
    let stored = storage.load_lines(LOCAL_USER_ID_KEY)?;
    if let Some(id) = stored.first().map(|line| line.trim()).filter(|id| !id.is_empty()) {
        return Ok(id.to_string());
    }
    let id = new_id();
    storage.save_lines(LOCAL_USER_ID_KEY, std::slice::from_ref(&id))?;
    log::info!("[flowdeck.users] Created local user id {}", id);
    Ok(id)
}

fn system_user_name() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "Local User".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStateStorage;

    fn storage() -> Arc<MemoryStateStorage> {
        Arc::new(MemoryStateStorage::new())
    }

    #[test]
    fn test_local_id_is_stable_across_instances() {
        let storage = storage();
        let first = LocalUserProvider::new(storage.clone(), false).unwrap();
        let second = LocalUserProvider::new(storage.clone(), false).unwrap();
        assert_eq!(first.current_user().id, second.current_user().id);
        assert!(first.current_user().id.starts_with("local:"));
        assert!(storage.contains_key(LOCAL_USER_ID_KEY));
    }

    #[test]
    fn test_demo_users() {
        let provider = LocalUserProvider::new(storage(), true).unwrap();
        let users = provider.users();
        assert_eq!(users.len(), 1 + DEMO_USER_NAMES.len());
        assert!(users.iter().any(|u| u.display_name == "Lucy"));
        assert_eq!(provider.search_users("LU", 5).len(), 1);
    }

    #[test]
    fn test_storage_failure_surfaces() {
        let storage = storage();
        storage.set_fail_writes(true);
        assert!(LocalUserProvider::new(storage, false).is_err());
    }

    #[tokio::test]
    async fn test_add_and_remove_broadcast_changes() {
        let provider = LocalUserProvider::new(storage(), false).unwrap();
        let mut changes = provider.subscribe();

        let user = provider.add_user("Ada", Some("ada@example.com"));
        assert_eq!(changes.recv().await.unwrap(), UsersChanged);
        assert_eq!(provider.get_all_users().await.unwrap().len(), 2);
        assert_eq!(provider.user_by_raw_id(&user.raw_id), Some(user.clone()));

        let current = provider.current_user().raw_id.clone();
        assert!(!provider.remove_user(&current));
        assert!(provider.remove_user(&user.raw_id));
        assert_eq!(changes.recv().await.unwrap(), UsersChanged);
        assert!(!provider.remove_user(&user.raw_id));
    }

    #[tokio::test]
    async fn test_current_user_respects_cancellation() {
        let provider = LocalUserProvider::new(storage(), false).unwrap();
        let cancel = Cancellation::new();
        assert!(provider.get_current_user(&cancel).await.unwrap().is_some());
        cancel.cancel();
        assert!(matches!(
            provider.get_current_user(&cancel).await,
            Err(IdentityError::Cancelled)
        ));
    }
}

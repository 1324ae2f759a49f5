/// Global-admin bootstrap.
///
/// The first user resolved from an identity provider becomes the permanent
/// global admin. The id is stored as a single trimmed line; once present it
/// is never replaced.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::storage::{self, StateStorage};
use crate::users::{Cancellation, UserProvider};

pub const GLOBAL_ADMIN_KEY: &str = "kanban.admin.global";

pub struct GlobalAdmin {
    storage: Arc<dyn StateStorage>,
    bootstrapping: AtomicBool,
}

/// Clears the in-process flag however the bootstrap exits.
struct BootstrapGuard<'a>(&'a AtomicBool);

impl Drop for BootstrapGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl GlobalAdmin {
    pub fn new(storage: Arc<dyn StateStorage>) -> Self {
        Self {
            storage,
            bootstrapping: AtomicBool::new(false),
        }
    }

    /// Stored admin id. Read failures are logged and treated as absent.
    pub fn global_admin_id(&self) -> Option<String> {
        match storage::load_text(self.storage.as_ref(), GLOBAL_ADMIN_KEY) {
            Ok(text) => text
                .map(|t| t.trim().to_string())
                .filter(|id| !id.is_empty()),
            Err(e) => {
                log::warn!("[flowdeck.admin] Failed to read global admin: {}", e);
                None
            }
        }
    }

    pub fn has_global_admin(&self) -> bool {
        self.global_admin_id().is_some()
    }

    pub fn is_bootstrapping(&self) -> bool {
        self.bootstrapping.load(Ordering::Acquire)
    }

    /// Assign the current user as global admin if nobody is yet.
    ///
    /// A call made while another bootstrap is in flight returns at once.
    /// Failures are logged and swallowed. Returns the admin id afterwards.
    pub async fn ensure_global_admin(
        &self,
        provider: Option<&dyn UserProvider>,
        cancel: &Cancellation,
    ) -> Option<String> {
        if self.is_bootstrapping() {
            return self.global_admin_id();
        }
        if let Some(existing) = self.global_admin_id() {
            return Some(existing);
        }
        let provider = provider?;

        if self
            .bootstrapping
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.global_admin_id();
        }
        let _guard = BootstrapGuard(&self.bootstrapping);

        // Another process may have written it while we were checking
        if let Some(existing) = self.global_admin_id() {
            return Some(existing);
        }

        let user = match cancel.guard(provider.get_current_user(cancel)).await {
            Ok(Some(user)) => user,
            Ok(None) => return None,
            Err(e) => {
                log::warn!("[flowdeck.admin] Global admin bootstrap failed: {}", e);
                return None;
            }
        };
        let id = user.id.trim();
        if id.is_empty() {
            return None;
        }

        if let Err(e) = storage::save_text(self.storage.as_ref(), GLOBAL_ADMIN_KEY, id) {
            log::warn!("[flowdeck.admin] Failed to persist global admin: {}", e);
            return None;
        }
        log::info!("[flowdeck.admin] Assigned global admin {}", id);
        Some(id.to_string())
    }

    /// Runs the bootstrap first, so the very first viewer becomes admin.
    pub async fn is_current_user_global_admin(
        &self,
        provider: Option<&dyn UserProvider>,
        cancel: &Cancellation,
    ) -> bool {
        self.ensure_global_admin(provider, cancel).await;

        let Some(admin_id) = self.global_admin_id() else {
            return false;
        };
        let Some(provider) = provider else {
            return false;
        };
        match cancel.guard(provider.get_current_user(cancel)).await {
            Ok(Some(user)) => user.id.trim() == admin_id,
            Ok(None) => false,
            Err(e) => {
                log::debug!("[flowdeck.admin] Current user lookup failed: {}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStateStorage;
    use crate::users::{IdentityError, User, UsersChanged};
    use async_trait::async_trait;
    use tokio::sync::{broadcast, Notify};

    /// Provider with a fixed current user, optionally held until released.
    struct FixedProvider {
        user: Option<User>,
        gate: Option<Arc<Notify>>,
        changed: broadcast::Sender<UsersChanged>,
    }

    impl FixedProvider {
        fn new(raw_id: &str) -> Self {
            Self {
                user: Some(User::new("local", raw_id, raw_id)),
                gate: None,
                changed: broadcast::channel(1).0,
            }
        }

        fn gated(raw_id: &str, gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new(raw_id)
            }
        }
    }

    #[async_trait]
    impl UserProvider for FixedProvider {
        fn provider_key(&self) -> &str {
            "local"
        }

        async fn get_all_users(&self) -> Result<Vec<User>, IdentityError> {
            Ok(self.user.iter().cloned().collect())
        }

        async fn get_current_user(&self, _cancel: &Cancellation) -> Result<Option<User>, IdentityError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            Ok(self.user.clone())
        }

        fn subscribe(&self) -> broadcast::Receiver<UsersChanged> {
            self.changed.subscribe()
        }
    }

    fn admin() -> (Arc<MemoryStateStorage>, GlobalAdmin) {
        let storage = Arc::new(MemoryStateStorage::new());
        (storage.clone(), GlobalAdmin::new(storage))
    }

    #[tokio::test]
    async fn test_first_user_becomes_admin_permanently() {
        let (_, admin) = admin();
        let cancel = Cancellation::new();
        let u1 = FixedProvider::new("u1");
        let u2 = FixedProvider::new("u2");

        assert!(admin.is_current_user_global_admin(Some(&u1), &cancel).await);
        assert_eq!(admin.global_admin_id().as_deref(), Some("local:u1"));

        assert_eq!(
            admin.ensure_global_admin(Some(&u2), &cancel).await.as_deref(),
            Some("local:u1")
        );
        assert!(!admin.is_current_user_global_admin(Some(&u2), &cancel).await);
        assert!(admin.is_current_user_global_admin(Some(&u1), &cancel).await);
    }

    #[tokio::test]
    async fn test_stored_id_is_trimmed() {
        let (storage, admin) = admin();
        storage::save_text(storage.as_ref(), GLOBAL_ADMIN_KEY, "  local:u9 \n").unwrap();
        assert_eq!(admin.global_admin_id().as_deref(), Some("local:u9"));
    }

    #[tokio::test]
    async fn test_no_provider_or_no_user_assigns_nobody() {
        let (_, admin) = admin();
        let cancel = Cancellation::new();
        assert!(admin.ensure_global_admin(None, &cancel).await.is_none());

        let nobody = FixedProvider {
            user: None,
            ..FixedProvider::new("x")
        };
        assert!(!admin.is_current_user_global_admin(Some(&nobody), &cancel).await);
        assert!(!admin.has_global_admin());
    }

    #[tokio::test]
    async fn test_cancelled_bootstrap_resets_flag() {
        let (_, admin) = admin();
        let cancel = Cancellation::new();
        cancel.cancel();
        let u1 = FixedProvider::new("u1");

        assert!(admin.ensure_global_admin(Some(&u1), &cancel).await.is_none());
        assert!(!admin.is_bootstrapping());
        assert!(admin
            .ensure_global_admin(Some(&u1), &Cancellation::new())
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_write_failure_is_swallowed() {
        let (storage, admin) = admin();
        storage.set_fail_writes(true);
        let u1 = FixedProvider::new("u1");
        assert!(admin.ensure_global_admin(Some(&u1), &Cancellation::new()).await.is_none());
        assert!(!admin.is_bootstrapping());
    }

    #[tokio::test]
    async fn test_concurrent_bootstrap_returns_immediately() {
        let (_, admin) = admin();
        let admin = Arc::new(admin);
        let gate = Arc::new(Notify::new());
        let slow = Arc::new(FixedProvider::gated("u1", gate.clone()));

        let first = {
            let admin = admin.clone();
            let slow = slow.clone();
            tokio::spawn(async move {
                let provider: &dyn UserProvider = slow.as_ref();
                admin.ensure_global_admin(Some(provider), &Cancellation::new()).await
            })
        };
        while !admin.is_bootstrapping() {
            tokio::task::yield_now().await;
        }

        let u2 = FixedProvider::new("u2");
        assert!(admin.ensure_global_admin(Some(&u2), &Cancellation::new()).await.is_none());
        assert!(!admin.has_global_admin());

        gate.notify_one();
        assert_eq!(first.await.unwrap().as_deref(), Some("local:u1"));
        assert_eq!(admin.global_admin_id().as_deref(), Some("local:u1"));
    }
}

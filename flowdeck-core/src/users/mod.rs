/// User identities and the provider seam.
///
/// User ids are composite: `<provider>:<raw>`. Tasks reference users only by
/// that composite id (`assigneeId`), so ids from a detached provider can be
/// detected and cleared.

pub mod local;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

pub use local::LocalUserProvider;

pub const USER_ID_DELIMITER: char = ':';

/// Compose `<provider>:<raw>`. A blank provider key yields the raw id.
pub fn compose_user_id(provider_key: &str, raw_id: &str) -> String {
    if provider_key.is_empty() {
        return raw_id.to_string();
    }
    format!("{}{}{}", provider_key, USER_ID_DELIMITER, raw_id)
}

/// Split a composite id. Ids without a provider prefix return `(None, id)`.
pub fn parse_user_id(id: &str) -> (Option<&str>, &str) {
    match id.find(USER_ID_DELIMITER) {
        Some(index) if index > 0 => (Some(&id[..index]), &id[index + 1..]),
        _ => (None, id),
    }
}

pub fn is_composite_id(id: &str) -> bool {
    matches!(id.find(USER_ID_DELIMITER), Some(index) if index > 0 && index < id.len() - 1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub provider_key: String,
    pub raw_id: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl User {
    pub fn new(provider_key: &str, raw_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        let raw_id = raw_id.into();
        Self {
            id: compose_user_id(provider_key, &raw_id),
            provider_key: provider_key.to_string(),
            raw_id,
            display_name: display_name.into(),
            email: None,
        }
    }
}

/// Broadcast whenever a provider's user set changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsersChanged;

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("Identity lookup cancelled")]
    Cancelled,

    #[error("Identity provider error: {0}")]
    Provider(String),
}

/// Cloneable cancellation signal. All clones observe the same flag.
#[derive(Clone)]
pub struct Cancellation {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for Cancellation {
    fn default() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as any clone, so this only ends on cancel
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `future` unless cancellation wins the race.
    pub async fn guard<T, F>(&self, future: F) -> Result<T, IdentityError>
    where
        F: Future<Output = Result<T, IdentityError>>,
    {
        if self.is_cancelled() {
            return Err(IdentityError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(IdentityError::Cancelled),
            result = future => result,
        }
    }
}

/// Source of users for assignment and admin bootstrap.
#[async_trait]
pub trait UserProvider: Send + Sync {
    /// Prefix of every composite id this provider issues.
    fn provider_key(&self) -> &str;

    async fn get_all_users(&self) -> Result<Vec<User>, IdentityError>;

    /// `Ok(None)` when nobody is signed in.
    async fn get_current_user(&self, cancel: &Cancellation) -> Result<Option<User>, IdentityError>;

    fn subscribe(&self) -> broadcast::Receiver<UsersChanged>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_compose_and_parse() {
        assert_eq!(compose_user_id("local", "u1"), "local:u1");
        assert_eq!(compose_user_id("", "u1"), "u1");
        assert_eq!(parse_user_id("local:u1"), (Some("local"), "u1"));
        assert_eq!(parse_user_id("ldap:a:b"), (Some("ldap"), "a:b"));
        assert_eq!(parse_user_id(":u1"), (None, ":u1"));
        assert_eq!(parse_user_id("plain"), (None, "plain"));
    }

    #[test]
    fn test_is_composite_id() {
        assert!(is_composite_id("local:u1"));
        assert!(!is_composite_id("local:"));
        assert!(!is_composite_id(":u1"));
        assert!(!is_composite_id(""));
    }

    #[test]
    fn test_user_new_composes_id() {
        let user = User::new("local", "abc", "Sam");
        assert_eq!(user.id, "local:abc");
        assert_eq!(user.raw_id, "abc");
    }

    #[tokio::test]
    async fn test_guard_passes_through_result() {
        let cancel = Cancellation::new();
        let value = cancel.guard(async { Ok::<_, IdentityError>(5) }).await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_guard_observes_cancellation() {
        let cancel = Cancellation::new();
        let clone = cancel.clone();
        clone.cancel();
        assert!(cancel.is_cancelled());
        let result = cancel.guard(async { Ok::<_, IdentityError>(()) }).await;
        assert!(matches!(result, Err(IdentityError::Cancelled)));
    }

    #[tokio::test]
    async fn test_guard_cancels_pending_future() {
        let cancel = Cancellation::new();
        let trigger = cancel.clone();
        let pending = async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok::<_, IdentityError>(())
        };
        let (result, _) = tokio::join!(cancel.guard(pending), async move {
            tokio::task::yield_now().await;
            trigger.cancel();
        });
        assert!(matches!(result, Err(IdentityError::Cancelled)));
    }
}

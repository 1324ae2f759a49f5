/// In-memory state storage.
///
/// Used by tests and embedders without a filesystem. Supports fault
/// injection so crash windows and I/O faults can be reproduced.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{is_temp_key, StateStorage, StorageError};

#[derive(Default)]
pub struct MemoryStateStorage {
    entries: Mutex<BTreeMap<String, Vec<String>>>,
    fail_next_rename: AtomicBool,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl MemoryStateStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `rename` fails without touching either key, simulating a
    /// crash between the temp write and the rename.
    pub fn fail_next_rename(&self) {
        self.fail_next_rename.store(true, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Raw access that bypasses temp-key filtering.
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries().contains_key(key)
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, Vec<String>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fault(key: &str, message: &str) -> StorageError {
        StorageError::Fault {
            key: key.to_string(),
            message: message.to_string(),
        }
    }
}

impl StateStorage for MemoryStateStorage {
    fn get_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::fault(prefix, "injected read fault"));
        }
        Ok(self
            .entries()
            .keys()
            .filter(|k| k.starts_with(prefix) && !is_temp_key(k))
            .cloned()
            .collect())
    }

    fn load_lines(&self, key: &str) -> Result<Vec<String>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Self::fault(key, "injected read fault"));
        }
        Ok(self.entries().get(key).cloned().unwrap_or_default())
    }

    fn save_lines(&self, key: &str, lines: &[String]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::fault(key, "injected write fault"));
        }
        self.entries().insert(key.to_string(), lines.to_vec());
        Ok(())
    }

    fn rename(&self, source: &str, target: &str) -> Result<(), StorageError> {
        if self.fail_next_rename.swap(false, Ordering::SeqCst) {
            return Err(Self::fault(source, "injected rename fault"));
        }
        let mut entries = self.entries();
        if let Some(lines) = entries.remove(source) {
            entries.insert(target.to_string(), lines);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Self::fault(key, "injected write fault"));
        }
        self.entries().remove(key);
        Ok(())
    }
}

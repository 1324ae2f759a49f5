pub mod local;
pub mod memory;

/// Abstract key/value backend for persisted state.
/// Implementations: FileStateStorage (one file per key), MemoryStateStorage.
///
/// Values are stored as ordered lines. An empty result from `load_lines`
/// means the key is absent.
pub trait StateStorage: Send + Sync {
    /// Keys starting with `prefix` (empty prefix lists everything).
    fn get_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    fn load_lines(&self, key: &str) -> Result<Vec<String>, StorageError>;

    fn save_lines(&self, key: &str, lines: &[String]) -> Result<(), StorageError>;

    /// Atomically replace `target` with `source`. Missing source is a no-op.
    fn rename(&self, source: &str, target: &str) -> Result<(), StorageError>;

    /// Idempotent: deleting an absent key succeeds.
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),

    #[error("Storage fault on {key}: {message}")]
    Fault { key: String, message: String },
}

/// Suffix marking an in-progress write. Keys ending with it are never listed.
pub const TEMP_SUFFIX: &str = ".tmp";

pub fn is_temp_key(key: &str) -> bool {
    key.ends_with(TEMP_SUFFIX)
}

/// Build `base.seg1.seg2`, skipping blank segments.
pub fn build_scoped_key(base: &str, segments: &[&str]) -> Result<String, StorageError> {
    let base = base.trim();
    if base.is_empty() {
        return Err(StorageError::InvalidKey(base.to_string()));
    }
    let mut key = base.to_string();
    for segment in segments.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
        key.push('.');
        key.push_str(segment);
    }
    Ok(key)
}

/// Split text into lines on `\r\n` or `\n`.
pub fn split_lines(text: &str) -> Vec<String> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect()
}

pub fn join_lines(lines: &[String]) -> String {
    lines.join("\n")
}

/// Load a key as newline-joined text. `None` when absent.
pub fn load_text(storage: &dyn StateStorage, key: &str) -> Result<Option<String>, StorageError> {
    let lines = storage.load_lines(key)?;
    if lines.is_empty() {
        return Ok(None);
    }
    Ok(Some(join_lines(&lines)))
}

pub fn save_text(storage: &dyn StateStorage, key: &str, text: &str) -> Result<(), StorageError> {
    storage.save_lines(key, &split_lines(text))
}

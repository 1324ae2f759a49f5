/// Local filesystem state storage.
///
/// One file per key under a base directory:
/// - file name is the key with characters unsafe for file names replaced by `_`,
///   plus the `.state` extension
/// - atomic writes (write to sibling .tmp, fsync, rename, fsync directory)
/// - keys ending in `.tmp` are write-in-progress litter and never listed

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use super::{is_temp_key, StateStorage, StorageError};

const STATE_EXTENSION: &str = "state";

pub struct FileStateStorage {
    base_dir: PathBuf,
}

impl FileStateStorage {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Map a key to its backing file. Separators and other characters that are
    /// invalid in file names collapse to `_`, so a key can never escape the
    /// base directory.
    pub fn file_path(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();
        self.base_dir.join(format!("{}.{}", safe, STATE_EXTENSION))
    }

    /// Atomic write with fsync: write to .tmp, fsync, rename, fsync directory.
    fn atomic_write(path: &Path, content: &str) -> Result<(), std::io::Error> {
        let tmp_path = path.with_extension("state.tmp");
        let mut file = fs::File::create(&tmp_path)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Self::sync_dir(path);
        Ok(())
    }

    fn sync_dir(path: &Path) {
        if let Some(dir) = path.parent() {
            if let Ok(d) = fs::File::open(dir) {
                let _ = d.sync_all();
            }
        }
    }

    fn check_key(key: &str) -> Result<(), StorageError> {
        if key.trim().is_empty() {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(())
    }
}

impl StateStorage for FileStateStorage {
    fn get_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(STATE_EXTENSION) {
                continue;
            }
            let Some(key) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if key.trim().is_empty() || is_temp_key(key) || !key.starts_with(prefix) {
                continue;
            }
            keys.push(key.to_string());
        }
        keys.sort();
        Ok(keys)
    }

    fn load_lines(&self, key: &str) -> Result<Vec<String>, StorageError> {
        Self::check_key(key)?;
        match fs::read_to_string(self.file_path(key)) {
            Ok(content) => Ok(content.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn save_lines(&self, key: &str, lines: &[String]) -> Result<(), StorageError> {
        Self::check_key(key)?;
        fs::create_dir_all(&self.base_dir)?;
        let mut content = lines.join("\n");
        content.push('\n');
        Self::atomic_write(&self.file_path(key), &content)?;
        Ok(())
    }

    fn rename(&self, source: &str, target: &str) -> Result<(), StorageError> {
        Self::check_key(source)?;
        Self::check_key(target)?;
        let source_path = self.file_path(source);
        if !source_path.exists() {
            return Ok(());
        }
        // rename(2) replaces an existing target atomically on the same filesystem
        let target_path = self.file_path(target);
        fs::rename(&source_path, &target_path)?;
        Self::sync_dir(&target_path);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        Self::check_key(key)?;
        match fs::remove_file(self.file_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

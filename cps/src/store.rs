//! Core JsonStore implementation

use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::now_ms;

/// Extension used for record files
const RECORD_EXTENSION: &str = "json";

/// Extension used for in-flight temp files (never listed)
const TEMP_EXTENSION: &str = "tmp";

/// Disambiguates temp files written concurrently from one process
static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// A record that can be kept in a [`JsonStore`]
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    /// Storage key; one file per key
    fn key(&self) -> &str;

    /// Last modification time (Unix milliseconds)
    fn updated_at(&self) -> i64;

    /// Whether an age-based sweep may delete this record
    fn is_sweepable(&self) -> bool {
        false
    }
}

/// Directory-backed store holding one JSON file per record key
pub struct JsonStore<R> {
    dir: PathBuf,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for JsonStore<R> {
    fn clone(&self) -> Self {
        Self {
            dir: self.dir.clone(),
            _record: PhantomData,
        }
    }
}

impl<R> std::fmt::Debug for JsonStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonStore").field("dir", &self.dir).finish()
    }
}

impl<R: Record> JsonStore<R> {
    /// Open (or create) a store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        debug!(?dir, "JsonStore::open: called");
        std::fs::create_dir_all(&dir).map_err(|source| StoreError::Init {
            path: dir.clone(),
            source,
        })?;
        info!(dir = %dir.display(), "Opened record store");
        Ok(Self {
            dir,
            _record: PhantomData,
        })
    }

    /// Directory holding the record files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file that holds `key`
    ///
    /// Bytes outside `[A-Za-z0-9._-]` are written as `%XX`, so distinct keys
    /// never share a file.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", encode_key(key), RECORD_EXTENSION))
    }

    async fn ensure_dir(&self) -> StoreResult<()> {
        debug!(dir = ?self.dir, "JsonStore::ensure_dir: called");
        fs::create_dir_all(&self.dir).await.map_err(|source| StoreError::Io {
            path: self.dir.clone(),
            source,
        })
    }

    /// Serialize `record` and atomically replace the file for its key
    pub async fn write(&self, record: &R) -> StoreResult<PathBuf> {
        let key = record.key();
        debug!(%key, "JsonStore::write: called");
        self.ensure_dir().await?;

        let final_path = self.path_for(key);
        if let Some(stored_key) = foreign_key::<R>(&final_path, key).await {
            return Err(StoreError::KeyConflict {
                key: key.to_string(),
                stored_key,
                path: final_path,
            });
        }

        let json = serde_json::to_string_pretty(record).map_err(|source| StoreError::Serialize {
            key: key.to_string(),
            source,
        })?;

        let file_name = final_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp_path = self.dir.join(format!(
            ".{}.{}.{}.{}",
            file_name,
            std::process::id(),
            TEMP_SEQ.fetch_add(1, Ordering::Relaxed),
            TEMP_EXTENSION
        ));

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| StoreError::Io { path, source }
        };

        let mut file = fs::File::create(&temp_path).await.map_err(io_err(&temp_path))?;
        file.write_all(json.as_bytes()).await.map_err(io_err(&temp_path))?;
        file.sync_all().await.map_err(io_err(&temp_path))?;
        drop(file);

        if let Err(source) = fs::rename(&temp_path, &final_path).await {
            debug!(?temp_path, "JsonStore::write: rename failed, removing temp file");
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Io {
                path: final_path,
                source,
            });
        }

        debug!(path = ?final_path, "JsonStore::write: record written");
        Ok(final_path)
    }

    /// Read the record for `key`, or `None` when no file exists
    pub async fn read(&self, key: &str) -> StoreResult<Option<R>> {
        debug!(%key, "JsonStore::read: called");
        let path = self.path_for(key);
        match read_record::<R>(&path).await? {
            Some(record) if record.key() == key => Ok(Some(record)),
            Some(record) => {
                warn!(%key, stored_key = %record.key(), "Record file holds a different key, ignoring");
                Ok(None)
            }
            None => {
                debug!(%key, "JsonStore::read: no record file");
                Ok(None)
            }
        }
    }

    /// Whether a file exists for `key`
    pub async fn exists(&self, key: &str) -> bool {
        debug!(%key, "JsonStore::exists: called");
        fs::try_exists(self.path_for(key)).await.unwrap_or(false)
    }

    /// Enumerate every readable record
    ///
    /// Unreadable or corrupt files are logged and skipped. A missing
    /// directory lists as empty.
    pub async fn list(&self) -> StoreResult<Vec<R>> {
        debug!(dir = ?self.dir, "JsonStore::list: called");
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("JsonStore::list: directory does not exist");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.dir.clone(),
                    source,
                });
            }
        };

        let mut records = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, dir = %self.dir.display(), "Failed to read directory entry, stopping scan");
                    break;
                }
            };

            let path = entry.path();
            if path.extension().map(|e| e != RECORD_EXTENSION).unwrap_or(true) {
                debug!(?path, "JsonStore::list: skipping non-record file");
                continue;
            }

            match read_record::<R>(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    debug!(?path, "JsonStore::list: file vanished during scan");
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        category = e.category(),
                        severity = %e.severity(),
                        "Skipping unreadable record"
                    );
                }
            }
        }

        debug!(count = records.len(), "JsonStore::list: returning records");
        Ok(records)
    }

    /// Remove the record for `key`; returns whether a file was removed
    ///
    /// A file holding some other key is left alone.
    pub async fn delete(&self, key: &str) -> StoreResult<bool> {
        debug!(%key, "JsonStore::delete: called");
        let path = self.path_for(key);
        if let Some(stored_key) = foreign_key::<R>(&path, key).await {
            warn!(%key, %stored_key, "Record file holds a different key, not deleting");
            return Ok(false);
        }

        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(%key, "JsonStore::delete: removed");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(%key, "JsonStore::delete: nothing to remove");
                Ok(false)
            }
            Err(source) => Err(StoreError::Io { path, source }),
        }
    }

    /// Delete sweepable records last modified more than `max_age` ago
    ///
    /// Returns the keys that were removed.
    pub async fn sweep(&self, max_age: Duration) -> StoreResult<Vec<String>> {
        debug!(?max_age, "JsonStore::sweep: called");
        let cutoff = now_ms() - i64::try_from(max_age.as_millis()).unwrap_or(i64::MAX);

        let mut removed = Vec::new();
        for record in self.list().await? {
            if !record.is_sweepable() || record.updated_at() >= cutoff {
                continue;
            }
            match self.delete(record.key()).await {
                Ok(true) => removed.push(record.key().to_string()),
                Ok(false) => {}
                Err(e) => {
                    warn!(key = %record.key(), error = %e, "Failed to sweep record");
                }
            }
        }

        if !removed.is_empty() {
            info!(count = removed.len(), "Swept old records");
        }
        Ok(removed)
    }
}

/// File stem for `key`: safe bytes kept, everything else (including `%`) as `%XX`
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.') {
            out.push(char::from(byte));
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

/// Key stored in the file at `path` when it parses and differs from `key`
async fn foreign_key<R: Record>(path: &Path, key: &str) -> Option<String> {
    match read_record::<R>(path).await {
        Ok(Some(stored)) if stored.key() != key => Some(stored.key().to_string()),
        _ => None,
    }
}

async fn read_record<R: Record>(path: &Path) -> StoreResult<Option<R>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        key: String,
        body: String,
        done: bool,
        updated_at: i64,
    }

    impl Note {
        fn new(key: &str, body: &str) -> Self {
            Self {
                key: key.to_string(),
                body: body.to_string(),
                done: false,
                updated_at: now_ms(),
            }
        }
    }

    impl Record for Note {
        fn key(&self) -> &str {
            &self.key
        }

        fn updated_at(&self) -> i64 {
            self.updated_at
        }

        fn is_sweepable(&self) -> bool {
            self.done
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let temp = tempdir().unwrap();
        let store: JsonStore<Note> = JsonStore::open(temp.path()).unwrap();

        let note = Note::new("task-1", "hello");
        store.write(&note).await.unwrap();

        let loaded = store.read("task-1").await.unwrap();
        assert_eq!(loaded, Some(note));
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let temp = tempdir().unwrap();
        let store: JsonStore<Note> = JsonStore::open(temp.path()).unwrap();

        assert!(store.read("nope").await.unwrap().is_none());
        assert!(!store.exists("nope").await);
    }

    #[tokio::test]
    async fn test_overwrite_keeps_single_file() {
        let temp = tempdir().unwrap();
        let store: JsonStore<Note> = JsonStore::open(temp.path()).unwrap();

        store.write(&Note::new("task-1", "first")).await.unwrap();
        store.write(&Note::new("task-1", "second")).await.unwrap();

        let loaded = store.read("task-1").await.unwrap().unwrap();
        assert_eq!(loaded.body, "second");

        let files: Vec<_> = std::fs::read_dir(temp.path()).unwrap().collect();
        assert_eq!(files.len(), 1, "no temp files or duplicates should remain");
    }

    #[tokio::test]
    async fn test_corrupt_file_is_read_error() {
        let temp = tempdir().unwrap();
        let store: JsonStore<Note> = JsonStore::open(temp.path()).unwrap();

        std::fs::write(store.path_for("broken"), "{not json").unwrap();

        let result = store.read("broken").await;
        assert!(matches!(result, Err(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_list_skips_foreign_and_corrupt_files() {
        let temp = tempdir().unwrap();
        let store: JsonStore<Note> = JsonStore::open(temp.path()).unwrap();

        store.write(&Note::new("a", "1")).await.unwrap();
        store.write(&Note::new("b", "2")).await.unwrap();
        std::fs::write(temp.path().join("README.txt"), "ignore me").unwrap();
        std::fs::write(temp.path().join("bad.json"), "[").unwrap();

        let mut keys: Vec<_> = store.list().await.unwrap().into_iter().map(|n| n.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_list_missing_directory_is_empty() {
        let temp = tempdir().unwrap();
        let store: JsonStore<Note> = JsonStore::open(temp.path().join("sub")).unwrap();
        std::fs::remove_dir(temp.path().join("sub")).unwrap();

        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_recreates_missing_directory() {
        let temp = tempdir().unwrap();
        let dir = temp.path().join("checkpoints");
        let store: JsonStore<Note> = JsonStore::open(&dir).unwrap();
        std::fs::remove_dir(&dir).unwrap();

        store.write(&Note::new("a", "1")).await.unwrap();
        assert!(store.exists("a").await);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let temp = tempdir().unwrap();
        let store: JsonStore<Note> = JsonStore::open(temp.path()).unwrap();

        store.write(&Note::new("a", "1")).await.unwrap();
        assert!(store.delete("a").await.unwrap());
        assert!(!store.delete("a").await.unwrap());
        assert!(!store.delete("never-existed").await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_only_old_sweepable_records() {
        let temp = tempdir().unwrap();
        let store: JsonStore<Note> = JsonStore::open(temp.path()).unwrap();

        let ten_days_ms = 10 * 24 * 3600 * 1000;

        let mut old_done = Note::new("old-done", "x");
        old_done.done = true;
        old_done.updated_at = now_ms() - ten_days_ms;

        let mut old_open = Note::new("old-open", "x");
        old_open.updated_at = now_ms() - ten_days_ms;

        let mut fresh_done = Note::new("fresh-done", "x");
        fresh_done.done = true;

        for note in [&old_done, &old_open, &fresh_done] {
            store.write(note).await.unwrap();
        }

        let removed = store.sweep(Duration::from_secs(7 * 24 * 3600)).await.unwrap();
        assert_eq!(removed, vec!["old-done".to_string()]);
        assert!(store.exists("old-open").await);
        assert!(store.exists("fresh-done").await);
    }

    #[tokio::test]
    async fn test_keys_are_escaped_for_file_names() {
        let temp = tempdir().unwrap();
        let store: JsonStore<Note> = JsonStore::open(temp.path()).unwrap();

        assert_eq!(store.path_for("web/task 1").file_name().unwrap(), "web%2Ftask%201.json");
        assert_eq!(store.path_for("100%").file_name().unwrap(), "100%25.json");
        assert_eq!(store.path_for("T-1.a_b").file_name().unwrap(), "T-1.a_b.json");
    }

    #[tokio::test]
    async fn test_similar_keys_keep_separate_records() {
        let temp = tempdir().unwrap();
        let store: JsonStore<Note> = JsonStore::open(temp.path()).unwrap();

        store.write(&Note::new("web/task 1", "slash")).await.unwrap();
        store.write(&Note::new("web_task_1", "underscore")).await.unwrap();
        store.write(&Note::new("web%2Ftask%201", "literal")).await.unwrap();

        assert_eq!(store.read("web/task 1").await.unwrap().unwrap().body, "slash");
        assert_eq!(store.read("web_task_1").await.unwrap().unwrap().body, "underscore");
        assert_eq!(store.read("web%2Ftask%201").await.unwrap().unwrap().body, "literal");

        assert!(store.delete("web_task_1").await.unwrap());
        let mut keys: Vec<_> = store.list().await.unwrap().into_iter().map(|n| n.key).collect();
        keys.sort();
        assert_eq!(keys, vec!["web%2Ftask%201", "web/task 1"]);
    }

    #[tokio::test]
    async fn test_foreign_record_file_is_never_overwritten_or_deleted() {
        let temp = tempdir().unwrap();
        let store: JsonStore<Note> = JsonStore::open(temp.path()).unwrap();

        // A file left under "a"'s name that belongs to another key
        let foreign = serde_json::to_string(&Note::new("other", "keep me")).unwrap();
        std::fs::write(store.path_for("a"), foreign).unwrap();

        let result = store.write(&Note::new("a", "x")).await;
        assert!(matches!(result, Err(StoreError::KeyConflict { .. })));
        assert!(!store.delete("a").await.unwrap());

        let raw = std::fs::read_to_string(store.path_for("a")).unwrap();
        assert!(raw.contains("keep me"));
        assert!(store.read("a").await.unwrap().is_none());
    }

    #[test]
    fn test_open_fails_when_path_is_a_file() {
        let temp = tempdir().unwrap();
        let file = temp.path().join("blocker");
        std::fs::write(&file, "x").unwrap();

        let result: StoreResult<JsonStore<Note>> = JsonStore::open(&file);
        let err = result.unwrap_err();
        assert!(matches!(err, StoreError::Init { .. }));
        assert!(!err.is_recoverable());
    }
}

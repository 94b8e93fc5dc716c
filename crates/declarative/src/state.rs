//! State store - last-applied resource state
//!
//! The store is the source of truth for diffing. It is written only by the
//! executor, one record at a time, after the provider confirmed the change.

use crate::error::StateError;
use crate::reference::Reference;
use crate::types::{Attributes, Outputs};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Persisted state of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Attributes as last applied, with references resolved
    #[serde(default)]
    pub attributes: Attributes,
    /// Identifier assigned by the provider at creation
    pub provider_id: String,
    #[serde(default)]
    pub outputs: Outputs,
    /// Resources this one depended on when it was last applied
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub applied_at: DateTime<Utc>,
}

impl StateRecord {
    /// Look up an output; `id` falls back to the provider identifier
    pub fn output(&self, key: &str) -> Option<Value> {
        match self.outputs.get(key) {
            Some(value) => Some(value.clone()),
            None if key == "id" => Some(Value::String(self.provider_id.clone())),
            None => None,
        }
    }
}

/// All records of one environment, keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub records: BTreeMap<String, StateRecord>,
}

impl StateSnapshot {
    pub fn get(&self, name: &str) -> Option<&StateRecord> {
        self.records.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn insert(&mut self, record: StateRecord) {
        self.records.insert(record.name.clone(), record);
    }

    pub fn remove(&mut self, name: &str) -> Option<StateRecord> {
        self.records.remove(name)
    }

    /// Resolve a reference against recorded outputs
    pub fn lookup(&self, reference: &Reference) -> Option<Value> {
        self.get(&reference.resource)
            .and_then(|record| record.output(&reference.output))
    }
}

/// Persistence abstraction over a file tree, database row or remote object.
///
/// Implementations perform no provider I/O. `commit` must never leave a
/// single record partially written.
pub trait StateStore: Send + Sync {
    /// Last snapshot, or an empty one on first run
    fn load(&self) -> Result<StateSnapshot, StateError>;

    /// Persist one record, replacing any previous version
    fn commit(&self, record: &StateRecord) -> Result<(), StateError>;

    /// Forget a record once the provider confirmed deletion
    fn remove(&self, name: &str) -> Result<(), StateError>;
}

/// In-memory store for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<String, StateRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with an existing snapshot
    pub fn with_snapshot(snapshot: StateSnapshot) -> Self {
        Self {
            records: Mutex::new(snapshot.records),
        }
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<String, StateRecord>>, StateError> {
        self.records
            .lock()
            .map_err(|_| StateError::Other("memory store lock poisoned".to_string()))
    }
}

impl StateStore for MemoryStore {
    fn load(&self) -> Result<StateSnapshot, StateError> {
        Ok(StateSnapshot {
            records: self.records()?.clone(),
        })
    }

    fn commit(&self, record: &StateRecord) -> Result<(), StateError> {
        self.records()?.insert(record.name.clone(), record.clone());
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StateError> {
        self.records()?.remove(name);
        Ok(())
    }
}

/// One JSON file per resource under `<root>/<environment>/resources/`
#[derive(Debug, Clone)]
pub struct FileStore {
    environment: String,
    dir: PathBuf,
}

impl FileStore {
    /// Store for `environment` below a state root directory
    pub fn new(root: impl AsRef<Path>, environment: impl Into<String>) -> Self {
        let environment = environment.into();
        let dir = root.as_ref().join(&environment);
        Self { environment, dir }
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Directory holding this environment's state
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lock file guarding this environment
    pub fn lock_path(&self) -> PathBuf {
        self.dir.join(".lock")
    }

    fn resources_dir(&self) -> PathBuf {
        self.dir.join("resources")
    }

    fn record_path(&self, name: &str) -> PathBuf {
        self.resources_dir().join(format!("{name}.json"))
    }

    /// Take the environment lock, failing if another run holds it.
    ///
    /// The lock is released when the guard is dropped.
    pub fn lock(&self) -> Result<StateLock, StateError> {
        fs::create_dir_all(&self.dir).map_err(|source| StateError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.lock_path();
        let holder = format!("pid {} since {}", std::process::id(), Utc::now().to_rfc3339());

        match fs::OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(holder.as_bytes())
                    .map_err(|source| StateError::Io {
                        path: path.clone(),
                        source,
                    })?;
                log::debug!("Acquired state lock {}", path.display());
                Ok(StateLock { path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path).unwrap_or_else(|_| "unknown".to_string());
                Err(StateError::Locked {
                    environment: self.environment.clone(),
                    holder: holder.trim().to_string(),
                    path,
                })
            }
            Err(source) => Err(StateError::Io { path, source }),
        }
    }

    /// Remove a lock left behind by a run that never released it.
    ///
    /// Returns the recorded holder, or `None` when the environment was not locked.
    pub fn force_unlock(&self) -> Result<Option<String>, StateError> {
        let path = self.lock_path();
        let holder = match fs::read_to_string(&path) {
            Ok(holder) => holder.trim().to_string(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StateError::Io { path, source }),
        };
        fs::remove_file(&path).map_err(|source| StateError::Io {
            path: path.clone(),
            source,
        })?;
        log::warn!("Removed state lock {} held by {holder}", path.display());
        Ok(Some(holder))
    }
}

impl StateStore for FileStore {
    fn load(&self) -> Result<StateSnapshot, StateError> {
        let dir = self.resources_dir();
        if !dir.exists() {
            log::debug!("No state at {}, starting empty", dir.display());
            return Ok(StateSnapshot::default());
        }

        let entries = fs::read_dir(&dir).map_err(|source| StateError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut snapshot = StateSnapshot::default();
        for entry in entries {
            let entry = entry.map_err(|source| StateError::Io {
                path: dir.clone(),
                source,
            })?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path).map_err(|source| StateError::Io {
                path: path.clone(),
                source,
            })?;
            let record: StateRecord = serde_json::from_str(&content)
                .map_err(|source| StateError::Corrupt { path, source })?;
            snapshot.insert(record);
        }

        log::debug!(
            "Loaded {} state records for environment '{}'",
            snapshot.len(),
            self.environment
        );
        Ok(snapshot)
    }

    fn commit(&self, record: &StateRecord) -> Result<(), StateError> {
        let dir = self.resources_dir();
        fs::create_dir_all(&dir).map_err(|source| StateError::Io {
            path: dir.clone(),
            source,
        })?;

        let path = self.record_path(&record.name);
        let content = serde_json::to_vec_pretty(record).map_err(|source| StateError::Corrupt {
            path: path.clone(),
            source,
        })?;

        // Write beside the target, then rename over it
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|source| StateError::Io {
            path: dir.clone(),
            source,
        })?;
        tmp.write_all(&content)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|source| StateError::Io {
                path: tmp.path().to_path_buf(),
                source,
            })?;
        tmp.persist(&path).map_err(|e| StateError::Io {
            path: path.clone(),
            source: e.error,
        })?;

        log::debug!("Committed state for '{}'", record.name);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<(), StateError> {
        let path = self.record_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {
                log::debug!("Removed state for '{name}'");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StateError::Io { path, source }),
        }
    }
}

/// Guard for an environment lock file
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            log::warn!("Failed to release state lock {}: {}", self.path.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(name: &str) -> StateRecord {
        let mut attributes = Attributes::new();
        attributes.insert("cidr".into(), json!("10.0.0.0/16"));
        attributes.insert("tags".into(), json!({"env": "prod", "n": [1, 2, null]}));
        let mut outputs = Outputs::new();
        outputs.insert("arn".into(), json!("arn:local:network/abc"));
        StateRecord {
            name: name.to_string(),
            resource_type: "network".into(),
            attributes,
            provider_id: format!("{name}-0001"),
            outputs,
            depends_on: vec!["account".into()],
            applied_at: Utc::now(),
        }
    }

    #[test]
    fn test_file_store_empty_on_first_run() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path(), "dev");
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_commit_then_load() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path(), "dev");
        let committed = record("network");
        store.commit(&committed).unwrap();

        let snapshot = store.load().unwrap();
        assert_eq!(snapshot.get("network"), Some(&committed));
        assert!(tmp.path().join("dev/resources/network.json").exists());
    }

    #[test]
    fn test_file_store_environments_isolated() {
        let tmp = TempDir::new().unwrap();
        FileStore::new(tmp.path(), "dev").commit(&record("network")).unwrap();
        assert!(FileStore::new(tmp.path(), "prod").load().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_commit_replaces() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path(), "dev");
        let mut rec = record("network");
        store.commit(&rec).unwrap();
        rec.attributes.insert("cidr".into(), json!("10.1.0.0/16"));
        store.commit(&rec).unwrap();

        let snapshot = store.load().unwrap();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get("network").unwrap().attributes["cidr"], json!("10.1.0.0/16"));
    }

    #[test]
    fn test_file_store_remove() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path(), "dev");
        store.commit(&record("network")).unwrap();
        store.remove("network").unwrap();
        assert!(store.load().unwrap().is_empty());
        // Removing twice is fine
        store.remove("network").unwrap();
    }

    #[test]
    fn test_file_store_rejects_corrupt_record() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path(), "dev");
        fs::create_dir_all(tmp.path().join("dev/resources")).unwrap();
        fs::write(tmp.path().join("dev/resources/bad.json"), "{ not json").unwrap();
        assert!(matches!(store.load(), Err(StateError::Corrupt { .. })));
    }

    #[test]
    fn test_lock_is_exclusive() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path(), "dev");
        let guard = store.lock().unwrap();
        assert!(matches!(store.lock(), Err(StateError::Locked { .. })));
        drop(guard);
        assert!(store.lock().is_ok());
    }

    #[test]
    fn test_force_unlock_clears_stale_lock() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path(), "dev");
        assert_eq!(store.force_unlock().unwrap(), None);

        // A crashed run never drops its guard
        std::mem::forget(store.lock().unwrap());
        assert!(matches!(store.lock(), Err(StateError::Locked { .. })));

        let holder = store.force_unlock().unwrap().unwrap();
        assert!(holder.starts_with(&format!("pid {}", std::process::id())));
        assert!(store.lock().is_ok());
    }

    #[test]
    fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let committed = record("db");
        store.commit(&committed).unwrap();
        assert_eq!(store.load().unwrap().get("db"), Some(&committed));
        store.remove("db").unwrap();
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_record_output_falls_back_to_id() {
        let rec = record("network");
        assert_eq!(rec.output("id"), Some(json!("network-0001")));
        assert_eq!(rec.output("arn"), Some(json!("arn:local:network/abc")));
        assert_eq!(rec.output("missing"), None);
    }

    #[test]
    fn test_snapshot_lookup() {
        let mut snapshot = StateSnapshot::default();
        snapshot.insert(record("network"));
        assert_eq!(
            snapshot.lookup(&Reference::new("network", "id")),
            Some(json!("network-0001"))
        );
        assert_eq!(snapshot.lookup(&Reference::new("db", "id")), None);
    }
}

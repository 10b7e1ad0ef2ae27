//! Non-volatile storage for the steering middle calibration.
//!
//! The store holds small integers by key. A read of [`ERASED`] means the
//! slot was never written, which is handled exactly like a missing key.

use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::Result;

/// Value of a never-written slot.
pub const ERASED: i32 = 0xFFFF;

/// Key of the persisted steering middle.
pub const STEERING_MIDDLE_KEY: &str = "steering_middle";

/// Small key/value store that survives restarts.
#[cfg_attr(test, mockall::automock)]
pub trait NonVolatileStore: Send {
    /// Reads `key`; `Ok(None)` when absent.
    fn load(&self, key: &str) -> Result<Option<i32>>;

    fn store(&mut self, key: &str, value: i32) -> Result<()>;
}

/// JSON object file, rewritten whole on every store.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, Value>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.path)?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }
}

impl NonVolatileStore for JsonFileStore {
    fn load(&self, key: &str) -> Result<Option<i32>> {
        let values = self.read_all()?;
        Ok(values
            .get(key)
            .and_then(Value::as_i64)
            .and_then(|v| i32::try_from(v).ok()))
    }

    fn store(&mut self, key: &str, value: i32) -> Result<()> {
        let mut values = self.read_all().unwrap_or_default();
        values.insert(key.to_string(), Value::from(value));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_string_pretty(&values)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!("Stored {}={} in {}", key, value, self.path.display());
        Ok(())
    }
}

/// Loads the steering middle, writing `default` when the slot is missing,
/// erased or unreadable.
pub fn load_steering_middle(store: &mut dyn NonVolatileStore, default: i32) -> i32 {
    match store.load(STEERING_MIDDLE_KEY) {
        Ok(Some(value)) if value != ERASED => return value,
        Ok(_) => warn!("No steering calibration stored, using default {}", default),
        Err(e) => warn!("Failed to read steering calibration ({}), using default {}", e, default),
    }

    save_steering_middle(store, default);
    default
}

/// Persists the steering middle. Failures are logged, never fatal.
pub fn save_steering_middle(store: &mut dyn NonVolatileStore, value: i32) {
    if let Err(e) = store.store(STEERING_MIDDLE_KEY, value) {
        warn!("Failed to store steering calibration {}: {}", value, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RcLinkError;
    use mockall::predicate::eq;
    use tempfile::TempDir;

    // ==================== JsonFileStore Tests ====================

    #[test]
    fn test_missing_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("calibration.json"));
        assert_eq!(store.load(STEERING_MIDDLE_KEY).unwrap(), None);
    }

    #[test]
    fn test_store_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("calibration.json");
        let mut store = JsonFileStore::new(&path);

        store.store(STEERING_MIDDLE_KEY, 87).unwrap();
        store.store("other", -3).unwrap();

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.load(STEERING_MIDDLE_KEY).unwrap(), Some(87));
        assert_eq!(reopened.load("other").unwrap(), Some(-3));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calibration.json");
        fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load(STEERING_MIDDLE_KEY), Err(RcLinkError::Json(_))));
    }

    #[test]
    fn test_store_overwrites_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calibration.json");
        fs::write(&path, "garbage").unwrap();

        let mut store = JsonFileStore::new(&path);
        store.store(STEERING_MIDDLE_KEY, 90).unwrap();
        assert_eq!(store.load(STEERING_MIDDLE_KEY).unwrap(), Some(90));
    }

    // ==================== Calibration Load Tests ====================

    #[test]
    fn test_load_existing_middle() {
        let mut store = MockNonVolatileStore::new();
        store.expect_load()
            .with(eq(STEERING_MIDDLE_KEY))
            .returning(|_| Ok(Some(95)));
        store.expect_store().never();

        assert_eq!(load_steering_middle(&mut store, 90), 95);
    }

    #[test]
    fn test_erased_slot_writes_default() {
        let mut store = MockNonVolatileStore::new();
        store.expect_load().returning(|_| Ok(Some(ERASED)));
        store.expect_store()
            .with(eq(STEERING_MIDDLE_KEY), eq(90))
            .times(1)
            .returning(|_, _| Ok(()));

        assert_eq!(load_steering_middle(&mut store, 90), 90);
    }

    #[test]
    fn test_missing_slot_writes_default() {
        let mut store = MockNonVolatileStore::new();
        store.expect_load().returning(|_| Ok(None));
        store.expect_store()
            .with(eq(STEERING_MIDDLE_KEY), eq(90))
            .times(1)
            .returning(|_, _| Ok(()));

        assert_eq!(load_steering_middle(&mut store, 90), 90);
    }

    #[test]
    fn test_store_failure_is_not_fatal() {
        let mut store = MockNonVolatileStore::new();
        store.expect_load()
            .returning(|_| Err(RcLinkError::Channel("flash unavailable".to_string())));
        store.expect_store()
            .returning(|_, _| Err(RcLinkError::Channel("flash unavailable".to_string())));

        assert_eq!(load_steering_middle(&mut store, 90), 90);
    }

    #[test]
    fn test_load_with_file_store_persists_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("calibration.json");
        let mut store = JsonFileStore::new(&path);

        assert_eq!(load_steering_middle(&mut store, 90), 90);
        assert_eq!(store.load(STEERING_MIDDLE_KEY).unwrap(), Some(90));

        save_steering_middle(&mut store, 84);
        assert_eq!(load_steering_middle(&mut store, 90), 84);
    }
}

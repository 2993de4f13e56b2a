//! Task persistence providers

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use super::Task;
use crate::{Error, Result};

/// Durable storage for the task collection
///
/// The store hands over whole snapshots; implementations are plain blob stores.
pub trait TaskPersistence: Send + Sync {
    /// Load all persisted tasks
    ///
    /// # Errors
    ///
    /// Returns error if stored data exists but cannot be read
    fn load_tasks(&self) -> Result<Vec<Task>>;

    /// Replace the persisted tasks with `tasks`
    ///
    /// # Errors
    ///
    /// Returns error if the tasks cannot be written
    fn save_tasks(&self, tasks: &[Task]) -> Result<()>;
}

/// JSON file in the data directory
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `tasks.json` inside `data_dir`
    #[must_use]
    pub fn in_dir(data_dir: &Path) -> Self {
        Self::new(data_dir.join("tasks.json"))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TaskPersistence for JsonFilePersistence {
    fn load_tasks(&self) -> Result<Vec<Task>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|e| {
            Error::Persistence(format!("failed to parse {}: {e}", self.path.display()))
        })
    }

    fn save_tasks(&self, tasks: &[Task]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Write-then-rename so a crash never leaves a truncated file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(tasks)?)?;
        std::fs::rename(&tmp, &self.path)?;

        tracing::trace!(path = %self.path.display(), count = tasks.len(), "tasks saved");
        Ok(())
    }
}

/// Volatile persistence, used for tests and `--no-persist` style setups
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    tasks: Mutex<Vec<Task>>,
    saves: Mutex<usize>,
}

impl MemoryPersistence {
    /// Seed with existing tasks
    #[must_use]
    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
            saves: Mutex::new(0),
        }
    }

    /// Number of saves performed
    #[must_use]
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Last saved tasks
    #[must_use]
    pub fn saved(&self) -> Vec<Task> {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl TaskPersistence for MemoryPersistence {
    fn load_tasks(&self) -> Result<Vec<Task>> {
        Ok(self.saved())
    }

    fn save_tasks(&self, tasks: &[Task]) -> Result<()> {
        *self.tasks.lock().unwrap_or_else(PoisonError::into_inner) = tasks.to_vec();
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::tasks::TaskStore;

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let p = JsonFilePersistence::in_dir(dir.path());
        assert!(p.load_tasks().unwrap().is_empty());
    }

    #[test]
    fn file_round_trip_through_store() {
        let dir = tempfile::tempdir().unwrap();
        let p = Arc::new(JsonFilePersistence::in_dir(dir.path()));

        let store = TaskStore::new(p.clone()).unwrap();
        let task = store.add("persist me", Some("2024-05-01")).unwrap();

        let reopened = TaskStore::new(p).unwrap();
        let loaded = reopened.get(task.id()).unwrap();
        assert_eq!(loaded, task);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let p = JsonFilePersistence::in_dir(dir.path());
        std::fs::write(p.path(), "{not json").unwrap();
        assert!(matches!(p.load_tasks(), Err(Error::Persistence(_))));
    }

    #[test]
    fn memory_persistence_counts_saves() {
        let p = Arc::new(MemoryPersistence::default());
        let store = TaskStore::new(p.clone()).unwrap();
        store.append(vec![Task::new("a", Utc::now())]).unwrap();
        store.update("missing", |_| {}).unwrap();
        assert_eq!(p.save_count(), 1);
        assert_eq!(p.saved().len(), 1);
    }
}

//! In-memory task store with copy-on-write snapshots

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;

use super::persist::{MemoryPersistence, TaskPersistence};
use super::{Task, noon_local};
use crate::Result;

/// Read-only point-in-time view of the task collection
pub type Snapshot = Arc<Vec<Task>>;

/// Authoritative task collection
///
/// Mutations clone the current vector, apply the change and swap the new
/// vector in under the write lock, so they are serialized against each other
/// and readers only ever see whole batches.
#[derive(Clone)]
pub struct TaskStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    tasks: RwLock<Snapshot>,
    persist_lock: Mutex<()>,
    persistence: Arc<dyn TaskPersistence>,
}

impl TaskStore {
    /// Create a store seeded from `persistence`
    ///
    /// # Errors
    ///
    /// Returns error if the persisted tasks cannot be loaded
    pub fn new(persistence: Arc<dyn TaskPersistence>) -> Result<Self> {
        let tasks = persistence.load_tasks()?;
        tracing::debug!(count = tasks.len(), "task store loaded");

        Ok(Self {
            inner: Arc::new(StoreInner {
                tasks: RwLock::new(Arc::new(tasks)),
                persist_lock: Mutex::new(()),
                persistence,
            }),
        })
    }

    /// Create an empty store that is not backed by durable storage
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            inner: Arc::new(StoreInner {
                tasks: RwLock::new(Arc::new(Vec::new())),
                persist_lock: Mutex::new(()),
                persistence: Arc::new(MemoryPersistence::default()),
            }),
        }
    }

    /// Current snapshot
    #[must_use]
    pub fn list(&self) -> Snapshot {
        Arc::clone(
            &self
                .inner
                .tasks
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }

    /// Tasks whose local creation date matches `date`
    #[must_use]
    pub fn list_for_date(&self, date: &str) -> Vec<Task> {
        self.list()
            .iter()
            .filter(|t| t.matches_date(date))
            .cloned()
            .collect()
    }

    /// Look up a task by id
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Task> {
        self.list().iter().find(|t| t.id() == id).cloned()
    }

    /// Append tasks as one batch
    ///
    /// # Errors
    ///
    /// Returns error if the new state cannot be persisted
    pub fn append(&self, tasks: Vec<Task>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let count = tasks.len();
        self.mutate(|all| all.extend(tasks));
        tracing::debug!(count, "tasks appended");
        self.persist()
    }

    /// Add a single task created by the user, dated noon local on `date`
    ///
    /// Falls back to the current instant when `date` is absent or unparseable.
    ///
    /// # Errors
    ///
    /// Returns error if the new state cannot be persisted
    pub fn add(&self, content: &str, date: Option<&str>) -> Result<Task> {
        let created_at = date.and_then(noon_local).unwrap_or_else(Utc::now);
        let task = Task::new(content, created_at);
        self.append(vec![task.clone()])?;
        Ok(task)
    }

    /// Apply `mutator` to the task with `id`
    ///
    /// Returns `false` if no task has that id.
    ///
    /// # Errors
    ///
    /// Returns error if the new state cannot be persisted
    pub fn update<F>(&self, id: &str, mutator: F) -> Result<bool>
    where
        F: FnOnce(&mut Task),
    {
        let found = self.mutate(|all| {
            all.iter_mut().find(|t| t.id() == id).map(mutator).is_some()
        });
        if found {
            self.persist()?;
        }
        Ok(found)
    }

    /// Apply `mutator` to every task as one batch
    ///
    /// `mutator` returns whether it changed the task; the new state is
    /// persisted only if something changed. Returns the number of changed tasks.
    ///
    /// # Errors
    ///
    /// Returns error if the new state cannot be persisted
    pub fn update_each<F>(&self, mut mutator: F) -> Result<usize>
    where
        F: FnMut(&mut Task) -> bool,
    {
        let changed = self.mutate(|all| {
            all.iter_mut()
                .fold(0, |n, t| if mutator(t) { n + 1 } else { n })
        });
        if changed > 0 {
            self.persist()?;
        }
        Ok(changed)
    }

    /// Remove the task with `id`
    ///
    /// # Errors
    ///
    /// Returns error if the new state cannot be persisted
    pub fn remove(&self, id: &str) -> Result<bool> {
        let removed = self.mutate(|all| {
            let before = all.len();
            all.retain(|t| t.id() != id);
            all.len() != before
        });
        if removed {
            tracing::debug!(id, "task removed");
            self.persist()?;
        }
        Ok(removed)
    }

    /// Flip a task between pending and done
    ///
    /// # Errors
    ///
    /// Returns error if the new state cannot be persisted
    pub fn toggle_status(&self, id: &str) -> Result<bool> {
        self.update(id, |t| t.status = t.status.toggled())
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Task>) -> R) -> R {
        let mut guard = self
            .inner
            .tasks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut next = Vec::clone(&guard);
        let result = f(&mut next);
        *guard = Arc::new(next);
        result
    }

    fn persist(&self) -> Result<()> {
        // Always writes the latest snapshot, so saves can't land out of order
        let _guard = self
            .inner
            .persist_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let snapshot = self.list();
        self.inner.persistence.save_tasks(&snapshot)
    }
}

impl std::fmt::Debug for TaskStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskStore")
            .field("tasks", &self.list().len())
            .finish_non_exhaustive()
    }
}

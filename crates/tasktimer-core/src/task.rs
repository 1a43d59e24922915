//! Tasks and the store that owns them.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{CoreError, LedgerError, ValidationError};

/// A task the user can time.
///
/// `id` is assigned by the [`TaskStore`]; `0` means the task has not been
/// saved yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub sort_order: i64,
}

impl Task {
    /// A new, unsaved task.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: String::new(),
            sort_order: 0,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_sort_order(mut self, sort_order: i64) -> Self {
        self.sort_order = sort_order;
        self
    }

    /// Whether storage has assigned this task an identity.
    pub fn is_persisted(&self) -> bool {
        self.id > 0
    }

    /// Checks the task can be written to a store.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyTaskName);
        }
        Ok(())
    }
}

/// Durable catalog of tasks.
///
/// The timing engine only ever reads task identity; everything else here
/// serves the task list and editing surfaces.
pub trait TaskStore: Send + Sync {
    /// Insert the task if it has no id, otherwise update it in place.
    /// Returns the stored task with its id filled in.
    fn save_task(&self, task: &Task) -> Result<Task, CoreError>;

    /// Remove a task together with its timings.
    fn delete_task(&self, task_id: i64) -> Result<(), LedgerError>;

    fn get_task(&self, task_id: i64) -> Result<Option<Task>, LedgerError>;

    /// All tasks ordered by sort order, then name.
    fn list_tasks(&self) -> Result<Vec<Task>, LedgerError>;

    /// Bumped whenever tasks or timings change.
    fn changes(&self) -> watch::Receiver<u64>;
}

/// Ordering used by every task listing.
pub fn sort_tasks(tasks: &mut [Task]) {
    tasks.sort_by(|a, b| {
        a.sort_order
            .cmp(&b.sort_order)
            .then_with(|| a.name.cmp(&b.name))
    });
}

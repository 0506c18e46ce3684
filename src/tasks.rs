//! Task list capability surface

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A single task on the list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRecord {
    pub id: Uuid,
    pub text: String,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

/// Operations the voice session may perform on the task list
///
/// Calls are synchronous and always succeed from the caller's side.
pub trait TaskSurface: Send + Sync {
    /// Add a task and return it
    fn create(&self, text: &str) -> TaskRecord;

    /// Delete a task by id; unknown ids are ignored
    fn delete(&self, id: Uuid);

    /// All tasks, oldest first
    fn list_all(&self) -> Vec<TaskRecord>;

    /// Remove every task
    fn clear_all(&self);
}

/// In-memory task list
#[derive(Debug, Default)]
pub struct TaskList {
    tasks: Mutex<Vec<TaskRecord>>,
}

impl TaskList {
    /// Create an empty list
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskSurface for TaskList {
    fn create(&self, text: &str) -> TaskRecord {
        let task = TaskRecord {
            id: Uuid::new_v4(),
            text: text.to_string(),
            completed: false,
            created_at: Utc::now(),
        };
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task.clone());
        }
        tracing::debug!(id = %task.id, text = %task.text, "task created");
        task
    }

    fn delete(&self, id: Uuid) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| t.id != id);
        }
        tracing::debug!(%id, "task deleted");
    }

    fn list_all(&self) -> Vec<TaskRecord> {
        self.tasks
            .lock()
            .map(|tasks| tasks.clone())
            .unwrap_or_default()
    }

    fn clear_all(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.clear();
        }
        tracing::debug!("tasks cleared");
    }
}

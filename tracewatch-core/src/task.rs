//! Live task reconciliation
//!
//! The task feed is simpler than the trace feed: the producer sends a whole
//! list snapshot on open, then single-task updates and removals. The tracker
//! reconciles by id, preserving arrival order for display. Removed tasks are
//! gone; there is no historical retention.

use std::collections::HashMap;

use chrono::Utc;
use serde_json::Value;

use crate::protocol::ServerMessage;
use crate::types::{Task, TaskState};

/// Reconciles a live set of tasks against snapshots and per-task events.
#[derive(Debug, Default)]
pub struct TaskTracker {
    /// Display order: ids in order of first sight (or snapshot order).
    order: Vec<String>,
    tasks: HashMap<String, Task>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    /// Tracked tasks in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.order.iter().filter_map(|id| self.tasks.get(id))
    }

    /// Replace the entire tracked set and its ordering.
    pub fn set_all(&mut self, tasks: Vec<Task>) {
        self.order.clear();
        self.tasks.clear();
        for task in tasks {
            let task = admit(task);
            self.order.push(task.id.clone());
            self.tasks.insert(task.id.clone(), task);
        }
    }

    /// Insert a new task or update a known one in place.
    ///
    /// Identity is preserved: a known task keeps its position and its id,
    /// only the mutable fields move. `end_time` is stamped exactly once, the
    /// first time the state lands on a terminal value, and never re-derived.
    pub fn upsert(&mut self, task: Task) {
        match self.tasks.get_mut(&task.id) {
            Some(existing) => {
                let turned_terminal = existing.end_time.is_none() && task.state.is_terminal();
                existing.name = task.name;
                existing.description = task.description;
                existing.application = task.application;
                existing.user = task.user;
                existing.state = task.state;
                existing.progress = task.progress;
                existing.start_time = task.start_time;
                if turned_terminal {
                    existing.end_time = Some(Utc::now());
                }
            }
            None => {
                let task = admit(task);
                self.order.push(task.id.clone());
                self.tasks.insert(task.id.clone(), task);
            }
        }
    }

    /// Remove by id; a no-op when the id is unknown.
    pub fn remove(&mut self, task_id: &str) -> bool {
        if self.tasks.remove(task_id).is_none() {
            return false;
        }
        self.order.retain(|id| id != task_id);
        true
    }

    /// Fold one task-feed message in. Returns whether the tracked set
    /// changed.
    pub fn apply_message(&mut self, msg: &Value) -> bool {
        match ServerMessage::classify(msg) {
            Some(ServerMessage::TaskList(tasks)) => {
                self.set_all(tasks);
                true
            }
            Some(ServerMessage::TaskUpdated(task)) => {
                self.upsert(*task);
                true
            }
            Some(ServerMessage::TaskRemoved(id)) => self.remove(&id),
            _ => false,
        }
    }

    /// Count of tasks currently in a given state.
    pub fn count_in_state(&self, state: &TaskState) -> usize {
        self.iter().filter(|t| t.state == *state).count()
    }
}

/// Normalize a task on first sight: one that arrives already terminal gets
/// its end time stamped now, once.
fn admit(mut task: Task) -> Task {
    if task.end_time.is_none() && task.state.is_terminal() {
        task.end_time = Some(Utc::now());
    }
    task
}

//! Executes tool invocations against the task store

use chrono::Utc;
use serde_json::{Value, json};

use super::{AddTasksArgs, GetTasksArgs, ToolCall, UpdatePrioritiesArgs};
use crate::live::protocol::{FunctionCall, FunctionResponse};
use crate::tasks::{Task, TaskStatus, TaskStore, noon_local};
use crate::{Error, Result};

/// Response for one invocation plus whether the store changed
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchOutcome {
    pub response: FunctionResponse,
    pub mutated: bool,
}

/// Maps tool invocations to task store operations
///
/// Every invocation gets a response, including unknown tools and failed
/// executions, so the remote side is never left waiting on an id.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    store: TaskStore,
}

impl ToolDispatcher {
    #[must_use]
    pub const fn new(store: TaskStore) -> Self {
        Self { store }
    }

    #[must_use]
    pub const fn store(&self) -> &TaskStore {
        &self.store
    }

    /// Parse and execute one invocation
    #[must_use]
    pub fn dispatch(&self, call: &FunctionCall) -> DispatchOutcome {
        let result = ToolCall::parse(&call.name, &call.args).and_then(|tool| self.execute(&tool));

        let (response, mutated) = match result {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(tool = %call.name, id = %call.id, error = %e, "tool invocation failed");
                let message = match e {
                    Error::Tool(msg) => msg,
                    other => other.to_string(),
                };
                (json!({ "error": message }), false)
            }
        };

        tracing::debug!(tool = %call.name, id = %call.id, mutated, "tool dispatched");

        DispatchOutcome {
            response: FunctionResponse {
                id: call.id.clone(),
                name: call.name.clone(),
                response,
            },
            mutated,
        }
    }

    /// Execute a parsed invocation, returning the response payload and
    /// whether the store changed
    ///
    /// # Errors
    ///
    /// Returns error if a store mutation cannot be persisted
    pub fn execute(&self, call: &ToolCall) -> Result<(Value, bool)> {
        match call {
            ToolCall::AddTasks(args) => self.add_tasks(args),
            ToolCall::GetTasks(args) => Ok((self.get_tasks(args), false)),
            ToolCall::UpdatePriorities(args) => self.update_priorities(args),
        }
    }

    fn add_tasks(&self, args: &AddTasksArgs) -> Result<(Value, bool)> {
        let now = Utc::now();

        let tasks: Vec<Task> = args
            .new_tasks()
            .iter()
            .filter_map(|new| {
                let Some(content) = new.content.as_deref().filter(|c| !c.trim().is_empty()) else {
                    tracing::warn!("skipping new task without content");
                    return None;
                };

                let created_at = match new.date.as_deref().filter(|d| !d.trim().is_empty()) {
                    Some(date) => noon_local(date).unwrap_or_else(|| {
                        tracing::warn!(date, "unparseable task date, using current time");
                        now
                    }),
                    None => now,
                };

                let status = new
                    .status
                    .as_deref()
                    .and_then(TaskStatus::from_str_value)
                    .unwrap_or_default();

                Some(Task::new(content, created_at).with_status(status))
            })
            .collect();

        let added = tasks.len();
        self.store.append(tasks)?;
        if added > 0 {
            tracing::info!(count = added, "tasks added");
        }

        Ok((json!({ "result": "ok" }), added > 0))
    }

    fn get_tasks(&self, args: &GetTasksArgs) -> Value {
        let snapshot = self.store.list();
        let filter = args.date_filter();

        let tasks: Vec<Value> = snapshot
            .iter()
            .filter(|t| filter.is_none_or(|date| t.matches_date(date)))
            .map(|t| {
                json!({
                    "id": t.id(),
                    "content": t.content,
                    "status": t.status.as_str(),
                    "priority": t.priority.as_str(),
                    "date": t.local_date(),
                })
            })
            .collect();

        json!({
            "tasks": tasks,
            "context_date": filter.unwrap_or("today"),
        })
    }

    fn update_priorities(&self, args: &UpdatePrioritiesArgs) -> Result<(Value, bool)> {
        let updates = args.priorities();

        let changed = if updates.is_empty() {
            0
        } else {
            self.store.update_each(|task| {
                match updates.iter().find(|u| u.id == task.id()) {
                    Some(u) if task.priority != u.priority => {
                        task.priority = u.priority;
                        true
                    }
                    _ => false,
                }
            })?
        };

        if changed > 0 {
            tracing::info!(count = changed, "task priorities updated");
        }

        Ok((json!({ "result": "priorities updated" }), changed > 0))
    }
}

//! Remote tool invocations against the task store
//!
//! Every declared tool is one [`ToolCall`] variant; parsing an invocation is
//! the only place names are matched, and unknown names are an explicit error.

mod dispatch;
mod schema;

use serde::Deserialize;
use serde_json::Value;

use crate::tasks::TaskPriority;
use crate::{Error, Result};

pub use dispatch::{DispatchOutcome, ToolDispatcher};
pub use schema::function_declarations;

/// Names of the declared tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    AddTasks,
    GetTasks,
    UpdatePriorities,
}

impl ToolName {
    pub const ALL: [Self; 3] = [Self::AddTasks, Self::GetTasks, Self::UpdatePriorities];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AddTasks => "add-tasks",
            Self::GetTasks => "get-tasks",
            Self::UpdatePriorities => "update-priorities",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

impl std::fmt::Display for ToolName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    AddTasks(AddTasksArgs),
    GetTasks(GetTasksArgs),
    UpdatePriorities(UpdatePrioritiesArgs),
}

impl ToolCall {
    /// Parse a named invocation with JSON arguments
    ///
    /// Missing or `null` arguments are treated as an empty object.
    ///
    /// # Errors
    ///
    /// Returns error if the name is not a declared tool or the arguments
    /// don't match its schema
    pub fn parse(name: &str, args: &Value) -> Result<Self> {
        let tool =
            ToolName::from_name(name).ok_or_else(|| Error::Tool(format!("unknown tool: {name}")))?;

        let args = if args.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            args.clone()
        };

        let invalid = |e: serde_json::Error| Error::Tool(format!("{tool}: invalid arguments: {e}"));

        Ok(match tool {
            ToolName::AddTasks => Self::AddTasks(serde_json::from_value(args).map_err(invalid)?),
            ToolName::GetTasks => Self::GetTasks(serde_json::from_value(args).map_err(invalid)?),
            ToolName::UpdatePriorities => {
                Self::UpdatePriorities(serde_json::from_value(args).map_err(invalid)?)
            }
        })
    }

    #[must_use]
    pub const fn name(&self) -> ToolName {
        match self {
            Self::AddTasks(_) => ToolName::AddTasks,
            Self::GetTasks(_) => ToolName::GetTasks,
            Self::UpdatePriorities(_) => ToolName::UpdatePriorities,
        }
    }
}

/// Arguments of `add-tasks`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AddTasksArgs {
    #[serde(default)]
    new_tasks: Option<Vec<NewTask>>,
}

impl AddTasksArgs {
    #[must_use]
    pub fn new(new_tasks: Vec<NewTask>) -> Self {
        Self {
            new_tasks: Some(new_tasks),
        }
    }

    #[must_use]
    pub fn new_tasks(&self) -> &[NewTask] {
        self.new_tasks.as_deref().unwrap_or_default()
    }
}

/// One task to create
///
/// Entries without content are skipped by the dispatcher rather than failing
/// the whole invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewTask {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Arguments of `get-tasks`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GetTasksArgs {
    #[serde(default)]
    pub date: Option<String>,
}

impl GetTasksArgs {
    /// The date filter, if a non-empty one was given
    #[must_use]
    pub fn date_filter(&self) -> Option<&str> {
        self.date.as_deref().map(str::trim).filter(|d| !d.is_empty())
    }
}

/// Arguments of `update-priorities`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UpdatePrioritiesArgs {
    #[serde(default)]
    priorities: Option<Vec<PriorityUpdate>>,
}

impl UpdatePrioritiesArgs {
    #[must_use]
    pub fn new(priorities: Vec<PriorityUpdate>) -> Self {
        Self {
            priorities: Some(priorities),
        }
    }

    #[must_use]
    pub fn priorities(&self) -> &[PriorityUpdate] {
        self.priorities.as_deref().unwrap_or_default()
    }
}

/// New priority for one task
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PriorityUpdate {
    pub id: String,
    pub priority: TaskPriority,
}

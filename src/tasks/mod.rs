//! Task model and the authoritative task store
//!
//! Tasks are created by the user or by the remote `add-tasks` tool, mutated by
//! local toggles or `update-priorities`, and deleted only locally.

mod persist;
mod store;

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub use persist::{JsonFilePersistence, MemoryPersistence, TaskPersistence};
pub use store::{Snapshot, TaskStore};

/// Completion status of a task
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Done,
}

impl TaskStatus {
    /// Parse a loosely formatted status string
    #[must_use]
    pub fn from_str_value(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" | "todo" | "open" => Some(Self::Pending),
            "done" | "completed" | "complete" => Some(Self::Done),
            _ => None,
        }
    }

    /// The other status
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::Pending => Self::Done,
            Self::Done => Self::Pending,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Done => "done",
        }
    }
}

/// Priority assigned by the remote model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskPriority {
    High,
    Medium,
    Low,
    #[default]
    Normal,
}

impl TaskPriority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Normal => "Normal",
        }
    }
}

/// A single task
///
/// `id` and `created_at` are fixed at construction and only readable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    id: String,
    pub content: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub priority: TaskPriority,
    created_at: DateTime<Utc>,
}

impl Task {
    /// Create a pending, normal-priority task with a fresh id
    #[must_use]
    pub fn new(content: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            status: TaskStatus::Pending,
            priority: TaskPriority::Normal,
            created_at,
        }
    }

    /// Set the initial status
    #[must_use]
    pub const fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Local calendar date of `created_at` (`YYYY-MM-DD`)
    #[must_use]
    pub fn local_date(&self) -> String {
        local_date(&self.created_at)
    }

    /// Whether the local calendar date of this task starts with `date`
    #[must_use]
    pub fn matches_date(&self, date: &str) -> bool {
        self.local_date().starts_with(date)
    }
}

/// Format a timestamp as a local calendar date (`YYYY-MM-DD`)
#[must_use]
pub fn local_date(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d").to_string()
}

/// Today's local calendar date (`YYYY-MM-DD`)
#[must_use]
pub fn today_local() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

/// Noon local time on `date` (`YYYY-MM-DD`), as UTC
///
/// Returns `None` if the date cannot be parsed.
#[must_use]
pub fn noon_local(date: &str) -> Option<DateTime<Utc>> {
    let day = NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").ok()?;
    let noon = day.and_hms_opt(12, 0, 0)?;
    Local
        .from_local_datetime(&noon)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

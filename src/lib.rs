//! FocusUp - voice-driven task assistant
//!
//! The user talks to a remote speech model over a real-time session; the
//! model listens, answers with synthesized speech and manipulates the task
//! list through a small set of tools.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Frontend                         │
//! │        CLI status line  │  transcript  │  tasks      │
//! └────────────────────┬────────────────────────────────┘
//!                      │ SessionEvent
//! ┌────────────────────▼────────────────────────────────┐
//! │                 SessionManager                       │
//! │   state machine  │  retry  │  driver loop            │
//! └───────┬──────────────────┬──────────────────┬───────┘
//!         │                  │                  │
//! ┌───────▼──────┐  ┌────────▼───────┐  ┌───────▼───────┐
//! │    voice     │  │  live link     │  │ tools → tasks │
//! │ capture/play │  │  (WebSocket)   │  │  TaskStore    │
//! └──────────────┘  └────────────────┘  └───────────────┘
//! ```

pub mod config;
pub mod error;
pub mod live;
pub mod setup;
pub mod tasks;
pub mod tools;
pub mod voice;

pub use config::{Config, CredentialProvider};
pub use error::{Error, Result};
pub use live::{
    Collaborators, SessionConfig, SessionEvent, SessionManager, SessionState, SessionStatus,
};
pub use tasks::{Task, TaskPriority, TaskStatus, TaskStore};
pub use tools::ToolDispatcher;

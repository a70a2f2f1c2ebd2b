// ABOUTME: Task log sink used to report agent execution progress
// ABOUTME: Trait seam for durable task logs plus a tracing-backed implementation

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{error, info};

#[derive(Error, Debug)]
pub enum TaskLogError {
    #[error("Task log sink unavailable: {0}")]
    Unavailable(String),

    #[error("Task log write failed: {0}")]
    WriteFailed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Info,
    Command,
    Error,
    Success,
}

impl fmt::Display for LogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogKind::Info => "info",
            LogKind::Command => "command",
            LogKind::Error => "error",
            LogKind::Success => "success",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Error,
}

/// Append-only log of a single task's progress
pub trait TaskLogger: Send + Sync {
    fn append(&self, kind: LogKind, message: &str) -> Result<(), TaskLogError>;

    fn update_progress(&self, percent: u8, message: &str) -> Result<(), TaskLogError>;

    fn update_status(&self, status: TaskStatus, message: Option<&str>) -> Result<(), TaskLogError>;
}

/// Writes task logs as structured tracing events
#[derive(Debug, Clone)]
pub struct TracingTaskLogger {
    task_id: String,
}

impl TracingTaskLogger {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }
}

impl TaskLogger for TracingTaskLogger {
    fn append(&self, kind: LogKind, message: &str) -> Result<(), TaskLogError> {
        match kind {
            LogKind::Error => error!(task_id = %self.task_id, kind = %kind, "{}", message),
            _ => info!(task_id = %self.task_id, kind = %kind, "{}", message),
        }
        Ok(())
    }

    fn update_progress(&self, percent: u8, message: &str) -> Result<(), TaskLogError> {
        info!(task_id = %self.task_id, progress = percent.min(100), "{}", message);
        Ok(())
    }

    fn update_status(&self, status: TaskStatus, message: Option<&str>) -> Result<(), TaskLogError> {
        info!(
            task_id = %self.task_id,
            status = ?status,
            "{}",
            message.unwrap_or("Task status updated")
        );
        Ok(())
    }
}

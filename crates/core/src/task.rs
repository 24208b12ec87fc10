// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One unit of scan work and its lifecycle.

use std::fmt;

/// Lifecycle of a task. The completion path is monotone
/// (`Scheduled → Running → Downloading → Completed`); any non-terminal
/// state may fall back to `Interrupted` when the owning agent drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Scheduled,
    Running,
    Interrupted,
    Downloading,
    Completed,
}

impl TaskStatus {
    /// Stable byte used by the snapshot codec.
    pub fn code(self) -> u8 {
        match self {
            TaskStatus::Scheduled => 0,
            TaskStatus::Running => 1,
            TaskStatus::Interrupted => 2,
            TaskStatus::Downloading => 3,
            TaskStatus::Completed => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(TaskStatus::Scheduled),
            1 => Some(TaskStatus::Running),
            2 => Some(TaskStatus::Interrupted),
            3 => Some(TaskStatus::Downloading),
            4 => Some(TaskStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Scheduled => write!(f, "scheduled"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Interrupted => write!(f, "interrupted"),
            TaskStatus::Downloading => write!(f, "downloading"),
            TaskStatus::Completed => write!(f, "completed"),
        }
    }
}

/// A `(stage, options, target)` triple handed to one agent.
///
/// Equality considers the triple only, never the status; two tasks for the
/// same target are the same piece of work regardless of how far along the
/// current attempt is.
#[derive(Debug, Clone)]
pub struct Task {
    stage: String,
    options: String,
    target: String,
    status: TaskStatus,
}

impl Task {
    pub fn new(
        stage: impl Into<String>,
        options: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            options: options.into(),
            target: target.into(),
            status: TaskStatus::Scheduled,
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn stage(&self) -> &str {
        &self.stage
    }

    pub fn options(&self) -> &str {
        &self.options
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }
}

impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.stage == other.stage && self.options == other.options && self.target == other.target
    }
}

impl Eq for Task {}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} [{}]", self.stage, self.target, self.status)
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;

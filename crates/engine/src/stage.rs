// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One logical scan pass over a target list.

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

use dn_core::Task;

use crate::cursor::{Cursor, CursorError, CursorState};
use crate::optimize::{OptimizeError, TargetOptimizer};
use crate::reports;

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error("stage {stage}: {source}")]
    Results {
        stage: String,
        source: OptimizeError,
    },
}

/// What happens when a stage finishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageKind {
    /// Host discovery: collected reports are parsed for live hosts, and the
    /// optimizer writes the live-target list downstream stages consume.
    Discovery { live_targets: PathBuf },
    /// A plain scan pass; finishing needs no post-processing.
    Scan,
}

/// Serializable stage record, used by the snapshot codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageState {
    pub name: String,
    pub options: String,
    pub kind: StageKind,
    pub finished: u64,
    pub failed: bool,
    pub cursor: CursorState,
}

/// One configured pass over a target list, tracking per-target completion.
#[derive(Debug)]
pub struct Stage {
    name: String,
    options: String,
    kind: StageKind,
    cursor: Cursor,
    finished: u64,
    failed: bool,
}

impl Stage {
    pub fn new(
        name: impl Into<String>,
        options: impl Into<String>,
        targets: impl Into<PathBuf>,
        kind: StageKind,
    ) -> Self {
        Self {
            name: name.into(),
            options: options.into(),
            kind,
            cursor: Cursor::new(targets.into()),
            finished: 0,
            failed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &str {
        &self.options
    }

    pub fn is_discovery(&self) -> bool {
        matches!(self.kind, StageKind::Discovery { .. })
    }

    /// Targets in this stage's list; 0 until the cursor has been opened.
    pub fn target_count(&self) -> u64 {
        self.cursor.line_count()
    }

    pub fn finished_count(&self) -> u64 {
        self.finished
    }

    /// True once every dispensed target has completed, or the stage failed
    /// and was abandoned.
    pub fn is_finished(&self) -> bool {
        self.failed || (self.cursor.is_counted() && self.finished == self.cursor.line_count())
    }

    /// Next scheduled task, or `None` when the target list is exhausted.
    ///
    /// A cursor failure (for instance a target file that vanished between a
    /// snapshot and its restore) marks the stage finished-with-error; the
    /// context then advances past it.
    pub fn next_task(&mut self) -> Result<Option<Task>, StageError> {
        if self.failed {
            return Ok(None);
        }
        match self.cursor.read_line() {
            Ok(Some(target)) => Ok(Some(Task::new(&self.name, &self.options, target))),
            Ok(None) => Ok(None),
            Err(e) => {
                self.failed = true;
                Err(e.into())
            }
        }
    }

    /// The only mutator of the finished counter.
    pub fn increment_finished(&mut self) {
        self.finished += 1;
    }

    /// Release the cursor's file handle (stage end or snapshot).
    pub fn close(&mut self) {
        self.cursor.close();
    }

    /// Stage-type hook invoked when the stage finishes. Discovery parses
    /// its collected reports and writes the live-target list; plain scan
    /// stages do nothing.
    pub fn process_results(&self, reports_dir: &Path) -> Result<(), StageError> {
        let StageKind::Discovery { live_targets } = &self.kind else {
            return Ok(());
        };

        let hosts = reports::hosts_up(reports_dir, &self.name);
        info!(
            stage = %self.name,
            hosts = hosts.len(),
            "discovery finished, writing live targets"
        );
        TargetOptimizer::new(live_targets)
            .save(&hosts)
            .map_err(|source| StageError::Results {
                stage: self.name.clone(),
                source,
            })
    }

    pub fn state(&self) -> StageState {
        StageState {
            name: self.name.clone(),
            options: self.options.clone(),
            kind: self.kind.clone(),
            finished: self.finished,
            failed: self.failed,
            cursor: self.cursor.state(),
        }
    }

    pub fn restore(state: StageState) -> Self {
        Self {
            name: state.name,
            options: state.options,
            kind: state.kind,
            cursor: Cursor::restore(state.cursor),
            finished: state.finished,
            failed: state.failed,
        }
    }
}

#[cfg(test)]
#[path = "stage_tests.rs"]
mod tests;

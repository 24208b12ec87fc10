// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The coordinator's scheduling state.
//!
//! A single `Context` is shared by every agent session behind a mutex; it
//! dispenses tasks from the ordered stage pipeline, tracks which agent
//! holds which task, re-queues interrupted work, and snapshots itself so a
//! stopped scan resumes where it left off.

use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

use dn_core::{ServerConfig, Task, TaskStatus};

use crate::snapshot::{self, SnapshotError};
use crate::stage::{Stage, StageKind};

/// Handle shared by the listener, the sessions, and the display task.
pub type SharedContext = Arc<Mutex<Context>>;

/// Ordered pipeline of stages plus the task ledger across agents.
#[derive(Debug)]
pub struct Context {
    /// Stages not yet started, in plan order.
    pub(crate) stages: VecDeque<Stage>,
    /// Stages that have been activated, keyed by name.
    pub(crate) active_stages: IndexMap<String, Stage>,
    /// Name of the stage currently dispensing tasks.
    pub(crate) current: Option<String>,
    /// Task currently out with each agent (`ip:port`).
    pub(crate) active: HashMap<String, Task>,
    /// Interrupted tasks to re-dispense before pulling from the cursor.
    pub(crate) pending: VecDeque<Task>,
    pub(crate) reports_dir: PathBuf,
    /// Total configured stages, activated or not.
    pub(crate) stage_total: usize,
}

impl Context {
    /// Build a fresh context from the configured scan plan.
    pub fn new(cfg: &ServerConfig) -> Self {
        let stages: VecDeque<Stage> = cfg
            .stages
            .iter()
            .map(|plan| {
                if plan.is_discovery() {
                    Stage::new(
                        &plan.name,
                        &plan.options,
                        &cfg.queue_path,
                        StageKind::Discovery {
                            live_targets: cfg.live_targets_path.clone(),
                        },
                    )
                } else {
                    Stage::new(
                        &plan.name,
                        &plan.options,
                        &cfg.live_targets_path,
                        StageKind::Scan,
                    )
                }
            })
            .collect();
        let stage_total = stages.len();
        Self {
            stages,
            active_stages: IndexMap::new(),
            current: None,
            active: HashMap::new(),
            pending: VecDeque::new(),
            reports_dir: cfg.common.reports_dir.clone(),
            stage_total,
        }
    }

    pub fn into_shared(self) -> SharedContext {
        Arc::new(Mutex::new(self))
    }

    /// Hand out the next `(target, options)` pair for `agent`.
    ///
    /// An agent that still holds a task gets the same pair again (redelivery
    /// after a reconnect is idempotent). Interrupted tasks are re-dispensed
    /// before the current stage's cursor advances. `None` means either the
    /// scan is over (`is_finished`) or Discovery is still in flight and the
    /// agent should back off.
    pub fn pop(&mut self, agent: &str) -> Option<(String, String)> {
        if let Some(task) = self.active.get_mut(agent) {
            task.set_status(TaskStatus::Scheduled);
            return Some((task.target().to_string(), task.options().to_string()));
        }

        if let Some(mut task) = self.pending.pop_front() {
            task.set_status(TaskStatus::Scheduled);
            let pair = (task.target().to_string(), task.options().to_string());
            self.active.insert(agent.to_string(), task);
            return Some(pair);
        }

        loop {
            let name = match self.current.clone() {
                Some(name) => name,
                None => self.activate_next()?,
            };
            let Some(stage) = self.active_stages.get_mut(&name) else {
                return None;
            };
            match stage.next_task() {
                Ok(Some(task)) => {
                    let pair = (task.target().to_string(), task.options().to_string());
                    self.active.insert(agent.to_string(), task);
                    return Some(pair);
                }
                Ok(None) => {
                    if stage.is_discovery() && !stage.is_finished() {
                        // Other agents are still working the gate; the
                        // caller tells this one to back off.
                        return None;
                    }
                    self.close_stage(&name, true);
                }
                Err(e) => {
                    error!(stage = %name, error = %e, "stage failed, advancing past it");
                    self.close_stage(&name, false);
                }
            }
        }
    }

    /// Move the next configured stage into the active map.
    fn activate_next(&mut self) -> Option<String> {
        let stage = self.stages.pop_front()?;
        let name = stage.name().to_string();
        info!(stage = %name, "stage started");
        self.active_stages.insert(name.clone(), stage);
        self.current = Some(name.clone());
        Some(name)
    }

    fn close_stage(&mut self, name: &str, process: bool) {
        if let Some(stage) = self.active_stages.get_mut(name) {
            if process {
                if let Err(e) = stage.process_results(&self.reports_dir) {
                    error!(stage = %name, error = %e, "post-processing failed");
                }
            }
            stage.close();
        }
        self.current = None;
    }

    /// The agent acknowledged the command; the scan is underway.
    pub fn running(&mut self, agent: &str) {
        match self.active.get_mut(agent) {
            Some(task) => task.set_status(TaskStatus::Running),
            None => warn!(agent, "running update for unknown agent"),
        }
    }

    /// The agent started a report transfer.
    pub fn downloading(&mut self, agent: &str) {
        match self.active.get_mut(agent) {
            Some(task) => task.set_status(TaskStatus::Downloading),
            None => warn!(agent, "downloading update for unknown agent"),
        }
    }

    /// The report was received and verified; the task leaves the ledger.
    pub fn completed(&mut self, agent: &str) {
        let Some(mut task) = self.active.remove(agent) else {
            warn!(agent, "completed update for unknown agent");
            return;
        };
        task.set_status(TaskStatus::Completed);
        match self.active_stages.get_mut(task.stage()) {
            Some(stage) => {
                stage.increment_finished();
                info!(
                    agent,
                    stage = task.stage(),
                    target = task.target(),
                    "task completed"
                );
            }
            None => warn!(agent, stage = task.stage(), "completed task for unknown stage"),
        }
    }

    /// The agent dropped; its task goes back on the queue.
    pub fn interrupted(&mut self, agent: &str) {
        let Some(mut task) = self.active.remove(agent) else {
            warn!(agent, "interrupted update for unknown agent");
            return;
        };
        info!(agent, target = task.target(), "task interrupted");
        task.set_status(TaskStatus::Interrupted);
        self.pending.push_back(task);
    }

    /// Open the report sink for `agent`'s current task, named
    /// `<stage>-<filename>` under the reports directory.
    pub fn get_report(&mut self, agent: &str, filename: &str) -> Option<std::fs::File> {
        let Some(task) = self.active.get(agent) else {
            warn!(agent, filename, "report from agent with no active task");
            return None;
        };
        // Only the basename; the sink must stay inside the reports dir.
        let Some(name) = Path::new(filename).file_name().and_then(|n| n.to_str()) else {
            warn!(agent, filename, "rejecting report filename");
            return None;
        };
        let path = self.reports_dir.join(format!("{}-{}", task.stage(), name));
        match std::fs::File::create(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                error!(agent, path = %path.display(), error = %e, "cannot open report sink");
                None
            }
        }
    }

    /// `(stages left, pending tasks, completion %)` for the display.
    pub fn ctx_status(&self) -> (usize, usize, f64) {
        let targets: u64 = self.active_stages.values().map(Stage::target_count).sum();
        let finished: u64 = self
            .active_stages
            .values()
            .map(Stage::finished_count)
            .sum();
        let pct = if targets == 0 {
            0.0
        } else {
            finished as f64 * 100.0 / targets as f64
        };
        (self.stages.len(), self.pending.len(), pct)
    }

    /// `(stage, targets, finished, completion %)` per activated stage.
    pub fn active_stages_status(&self) -> Vec<(String, u64, u64, f64)> {
        self.active_stages
            .values()
            .map(|stage| {
                let targets = stage.target_count();
                let finished = stage.finished_count();
                let pct = if targets == 0 {
                    0.0
                } else {
                    finished as f64 * 100.0 / targets as f64
                };
                (stage.name().to_string(), targets, finished, pct)
            })
            .collect()
    }

    /// `(agent, stage, status, target)` per task out with an agent.
    pub fn tasks_status(&self) -> Vec<(String, String, String, String)> {
        let mut rows: Vec<_> = self
            .active
            .iter()
            .map(|(agent, task)| {
                (
                    agent.clone(),
                    task.stage().to_string(),
                    task.status().to_string(),
                    task.target().to_string(),
                )
            })
            .collect();
        rows.sort();
        rows
    }

    /// The scan is over: every configured stage was activated and finished,
    /// and no task is out with an agent or waiting for one.
    pub fn is_finished(&self) -> bool {
        self.stages.is_empty()
            && self.active_stages.len() == self.stage_total
            && self.active.is_empty()
            && self.pending.is_empty()
            && self.active_stages.values().all(Stage::is_finished)
    }

    /// Write a resumable snapshot. Tasks still out with agents flip to
    /// `Interrupted` and join the pending queue first; open cursors are
    /// released.
    pub fn snapshot(&mut self, path: &Path) -> Result<(), SnapshotError> {
        for (_, mut task) in self.active.drain() {
            task.set_status(TaskStatus::Interrupted);
            self.pending.push_back(task);
        }
        for stage in self.active_stages.values_mut() {
            stage.close();
        }
        info!(path = %path.display(), pending = self.pending.len(), "writing snapshot");
        snapshot::save(path, self)
    }

    /// Rebuild a context from a snapshot file.
    pub fn restore(path: &Path) -> Result<Self, SnapshotError> {
        let ctx = snapshot::load(path)?;
        info!(
            path = %path.display(),
            pending = ctx.pending.len(),
            current = ctx.current.as_deref().unwrap_or("-"),
            "restored snapshot"
        );
        Ok(ctx)
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;

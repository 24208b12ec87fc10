// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The local scan executor.
//!
//! The coordinator's probe logic lives entirely in nmap; this module only
//! runs the command line against a target and produces a report file with
//! a known name. The two-phase API mirrors the wire protocol: `spawn`
//! returns once the scanner process has started (the caller then reports
//! success upstream), `wait` produces the finished [`Report`].

use sha2::{Digest, Sha512};
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// Scanner binary. Options come from the coordinator per stage.
const SCANNER: &str = "nmap";

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to start scanner: {0}")]
    Spawn(std::io::Error),

    #[error("scanner exited with {0}")]
    ScannerFailed(std::process::ExitStatus),

    #[error("report {path}: {source}")]
    Report {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("report {0} exceeds the transfer size limit")]
    ReportTooLarge(PathBuf),
}

/// A finished scan, ready to stream back to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    /// Report basename under the reports directory.
    pub filename: String,
    /// Lower-case hex SHA-512 of the file bytes.
    pub hash: String,
    pub size: u32,
}

/// Runs scans and names their reports.
#[derive(Debug)]
pub struct ScanRunner {
    program: String,
    outdir: PathBuf,
}

impl ScanRunner {
    pub fn new(outdir: impl Into<PathBuf>) -> Self {
        Self {
            program: SCANNER.to_string(),
            outdir: outdir.into(),
        }
    }

    /// Swap the scanner binary (tests use a stub).
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Start a scan of `target`. Returns as soon as the scanner process is
    /// running; the report is collected with [`RunningScan::wait`].
    pub async fn spawn(&self, target: &str, options: &str) -> Result<RunningScan, ScanError> {
        let filename = self.report_name(target);
        let path = self.outdir.join(&filename);

        let mut cmd = Command::new(&self.program);
        cmd.args(options.split_whitespace())
            .arg("-oX")
            .arg(&path)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        let child = cmd.spawn().map_err(ScanError::Spawn)?;
        info!(target, options, report = %filename, "scan started");
        Ok(RunningScan {
            child,
            path,
            filename,
        })
    }

    /// Report name for a target: slashes become dashes, `.xml` appended,
    /// and a numeric prefix disambiguates an existing name.
    fn report_name(&self, target: &str) -> String {
        let base = format!("{}.xml", target.replace('/', "-"));
        if !self.outdir.join(&base).exists() {
            return base;
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{n}-{base}");
            if !self.outdir.join(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

/// A scanner process underway. Dropping it kills the scanner.
#[derive(Debug)]
pub struct RunningScan {
    child: Child,
    path: PathBuf,
    filename: String,
}

impl RunningScan {
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Wait for the scanner to exit and hash the report it produced.
    pub async fn wait(mut self) -> Result<Report, ScanError> {
        let status = self.child.wait().await.map_err(ScanError::Spawn)?;
        if !status.success() {
            return Err(ScanError::ScannerFailed(status));
        }
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|source| ScanError::Report {
                path: self.path.clone(),
                source,
            })?;
        let size = u32::try_from(bytes.len())
            .map_err(|_| ScanError::ReportTooLarge(self.path.clone()))?;
        let hash = hex::encode(Sha512::digest(&bytes));
        debug!(report = %self.filename, size, "report ready");
        Ok(Report {
            filename: self.filename,
            hash,
            size,
        })
    }
}

#[cfg(test)]
#[path = "scan_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! dn-engine: the coordinator's scan-execution engine.
//!
//! A [`Context`] owns the ordered pipeline of [`Stage`]s, dispenses tasks
//! to agent sessions, and can be snapshotted to disk and restored so an
//! interrupted scan resumes without re-scanning completed targets.

pub mod context;
pub mod cursor;
pub mod optimize;
pub mod reports;
pub mod snapshot;
pub mod stage;

pub use context::{Context, SharedContext};
pub use cursor::{Cursor, CursorError, CursorState};
pub use optimize::{OptimizeError, TargetOptimizer};
pub use snapshot::SnapshotError;
pub use stage::{Stage, StageError, StageKind};

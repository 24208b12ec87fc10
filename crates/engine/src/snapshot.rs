// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable context snapshots.
//!
//! The snapshot is an explicit versioned binary format written by a
//! dedicated encoder/decoder: magic, format version, then the stage
//! records (with cursor positions), the current stage name, the pending
//! tasks, and the reports directory. Live state — the active map, the
//! mutex, open file handles — is never persisted.
//!
//! Files are written atomically: temp file, fsync, rename.

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use dn_core::{Task, TaskStatus};

use crate::context::Context;
use crate::cursor::CursorState;
use crate::stage::{Stage, StageKind, StageState};

const MAGIC: &[u8; 4] = b"DNCX";
const VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad snapshot magic")]
    BadMagic,

    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u16),

    #[error("truncated snapshot")]
    Truncated,

    #[error("corrupt snapshot: {0}")]
    Corrupt(String),
}

/// Whether a snapshot file signals "resume": present with non-zero size.
pub fn resumable(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false)
}

/// Serialize the context and write it atomically.
pub(crate) fn save(path: &Path, ctx: &Context) -> Result<(), SnapshotError> {
    let bytes = encode(ctx)?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read and decode a snapshot file.
pub(crate) fn load(path: &Path) -> Result<Context, SnapshotError> {
    let bytes = std::fs::read(path)?;
    decode(&bytes)
}

fn encode(ctx: &Context) -> Result<Vec<u8>, SnapshotError> {
    let mut buf = Vec::new();
    buf.extend_from_slice(MAGIC);
    push_u16(&mut buf, VERSION);

    push_u16(
        &mut buf,
        u16::try_from(ctx.stage_total).map_err(|_| too_long("stage count"))?,
    );
    push_str(&mut buf, &path_str(&ctx.reports_dir))?;
    push_str(&mut buf, ctx.current.as_deref().unwrap_or(""))?;

    push_u16(
        &mut buf,
        u16::try_from(ctx.stages.len()).map_err(|_| too_long("stage list"))?,
    );
    for stage in &ctx.stages {
        push_stage(&mut buf, &stage.state())?;
    }
    push_u16(
        &mut buf,
        u16::try_from(ctx.active_stages.len()).map_err(|_| too_long("active stages"))?,
    );
    for stage in ctx.active_stages.values() {
        push_stage(&mut buf, &stage.state())?;
    }

    push_u32(
        &mut buf,
        u32::try_from(ctx.pending.len()).map_err(|_| too_long("pending tasks"))?,
    );
    for task in &ctx.pending {
        push_task(&mut buf, task)?;
    }
    Ok(buf)
}

fn decode(bytes: &[u8]) -> Result<Context, SnapshotError> {
    let mut r = Reader::new(bytes);
    if r.take(4)? != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let stage_total = r.u16()? as usize;
    let reports_dir = PathBuf::from(r.string()?);
    let current = match r.string()? {
        s if s.is_empty() => None,
        s => Some(s),
    };

    let mut stages = VecDeque::new();
    for _ in 0..r.u16()? {
        stages.push_back(Stage::restore(read_stage(&mut r)?));
    }
    let mut active_stages = indexmap::IndexMap::new();
    for _ in 0..r.u16()? {
        let state = read_stage(&mut r)?;
        active_stages.insert(state.name.clone(), Stage::restore(state));
    }

    let mut pending = VecDeque::new();
    for _ in 0..r.u32()? {
        pending.push_back(read_task(&mut r)?);
    }

    Ok(Context {
        stages,
        active_stages,
        current,
        active: HashMap::new(),
        pending,
        reports_dir,
        stage_total,
    })
}

fn push_stage(buf: &mut Vec<u8>, state: &StageState) -> Result<(), SnapshotError> {
    push_str(buf, &state.name)?;
    push_str(buf, &state.options)?;
    match &state.kind {
        StageKind::Scan => {
            buf.push(0);
            push_str(buf, "")?;
        }
        StageKind::Discovery { live_targets } => {
            buf.push(1);
            push_str(buf, &path_str(live_targets))?;
        }
    }
    push_u64(buf, state.finished);
    buf.push(state.failed as u8);
    push_str(buf, &path_str(&state.cursor.path))?;
    push_u64(buf, state.cursor.offset);
    push_u64(buf, state.cursor.line_count);
    push_u64(buf, state.cursor.line_no);
    Ok(())
}

fn read_stage(r: &mut Reader<'_>) -> Result<StageState, SnapshotError> {
    let name = r.string()?;
    let options = r.string()?;
    let kind_tag = r.u8()?;
    let live_targets = r.string()?;
    let kind = match kind_tag {
        0 => StageKind::Scan,
        1 => StageKind::Discovery {
            live_targets: PathBuf::from(live_targets),
        },
        other => return Err(SnapshotError::Corrupt(format!("stage kind {other}"))),
    };
    let finished = r.u64()?;
    let failed = r.u8()? != 0;
    let cursor = CursorState {
        path: PathBuf::from(r.string()?),
        offset: r.u64()?,
        line_count: r.u64()?,
        line_no: r.u64()?,
    };
    Ok(StageState {
        name,
        options,
        kind,
        finished,
        failed,
        cursor,
    })
}

fn push_task(buf: &mut Vec<u8>, task: &Task) -> Result<(), SnapshotError> {
    push_str(buf, task.stage())?;
    push_str(buf, task.options())?;
    push_str(buf, task.target())?;
    buf.push(task.status().code());
    Ok(())
}

fn read_task(r: &mut Reader<'_>) -> Result<Task, SnapshotError> {
    let stage = r.string()?;
    let options = r.string()?;
    let target = r.string()?;
    let code = r.u8()?;
    let status = TaskStatus::from_code(code)
        .ok_or_else(|| SnapshotError::Corrupt(format!("task status {code}")))?;
    Ok(Task::new(stage, options, target).with_status(status))
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn too_long(what: &str) -> SnapshotError {
    SnapshotError::Corrupt(format!("{what} does not fit the format"))
}

fn push_u16(buf: &mut Vec<u8>, value: u16) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_u32(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_u64(buf: &mut Vec<u8>, value: u64) {
    buf.extend_from_slice(&value.to_le_bytes());
}

fn push_str(buf: &mut Vec<u8>, s: &str) -> Result<(), SnapshotError> {
    let len = u16::try_from(s.len()).map_err(|_| too_long("string field"))?;
    push_u16(buf, len);
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Bounds-checked little-endian reader over the snapshot bytes.
struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], SnapshotError> {
        let end = self.pos.checked_add(n).ok_or(SnapshotError::Truncated)?;
        let slice = self.bytes.get(self.pos..end).ok_or(SnapshotError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, SnapshotError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, SnapshotError> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&mut self) -> Result<u32, SnapshotError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn u64(&mut self) -> Result<u64, SnapshotError> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_le_bytes(arr))
    }

    fn string(&mut self) -> Result<String, SnapshotError> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| SnapshotError::Corrupt("invalid string field".to_string()))
    }
}

#[cfg(test)]
#[path = "snapshot_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! A line-oriented file reader that remembers its byte offset across
//! restarts.
//!
//! The cursor opens lazily on the first read. The total line count is
//! computed once, on first open, and never revised; after a restore the
//! next `read_line` returns the line after the last one handed out.

use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Buffer size used for the one-time line count.
const COUNT_BUF: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum CursorError {
    #[error("cursor {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Serializable cursor position, used by the snapshot codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorState {
    pub path: PathBuf,
    pub offset: u64,
    pub line_count: u64,
    pub line_no: u64,
}

/// Stateful line reader over the target-list file.
#[derive(Debug)]
pub struct Cursor {
    path: PathBuf,
    reader: Option<BufReader<std::fs::File>>,
    offset: u64,
    line_count: u64,
    line_no: u64,
    counted: bool,
}

impl Cursor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            offset: 0,
            line_count: 0,
            line_no: 0,
            counted: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Byte position after the last line handed out.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total lines in the file; 0 until the cursor has been opened.
    pub fn line_count(&self) -> u64 {
        self.line_count
    }

    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    /// Whether the one-time line count has run.
    pub fn is_counted(&self) -> bool {
        self.counted
    }

    fn io_err(&self, source: std::io::Error) -> CursorError {
        CursorError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Open the file, count lines on the first ever open, and seek to the
    /// current offset. Idempotent.
    pub fn open(&mut self) -> Result<(), CursorError> {
        if self.reader.is_some() {
            return Ok(());
        }
        let file = std::fs::File::open(&self.path).map_err(|e| self.io_err(e))?;
        let mut reader = BufReader::new(file);
        if !self.counted {
            self.line_count = count_lines(&mut reader).map_err(|e| self.io_err(e))?;
            self.counted = true;
        }
        reader
            .seek(SeekFrom::Start(self.offset))
            .map_err(|e| self.io_err(e))?;
        self.reader = Some(reader);
        Ok(())
    }

    /// Read the next line with its terminator stripped, or `None` at end of
    /// stream. Advances the offset to the post-line-terminator position.
    pub fn read_line(&mut self) -> Result<Option<String>, CursorError> {
        self.open()?;
        // open() above guarantees the reader.
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };
        let mut line = String::new();
        let read = match reader.read_line(&mut line) {
            Ok(n) => n,
            Err(e) => return Err(self.io_err(e)),
        };
        if read == 0 {
            return Ok(None);
        }
        self.offset += read as u64;
        self.line_no += 1;
        if line.ends_with('\n') {
            line.pop();
        }
        Ok(Some(line))
    }

    /// Drop the open file handle; the position survives in `offset`.
    pub fn close(&mut self) {
        if self.reader.take().is_some() {
            debug!(path = %self.path.display(), offset = self.offset, "cursor closed");
        }
    }

    pub fn state(&self) -> CursorState {
        CursorState {
            path: self.path.clone(),
            offset: self.offset,
            line_count: self.line_count,
            line_no: self.line_no,
        }
    }

    /// Rebuild a cursor from a saved position. Opening is deferred to the
    /// next read, so a live-target file that does not exist yet is not an
    /// error until a stage actually asks for it.
    pub fn restore(state: CursorState) -> Self {
        // A cursor that never produced a line keeps its one-time count
        // pending; anything else must not recount.
        let counted = state.offset > 0 || state.line_count > 0;
        Self {
            path: state.path,
            reader: None,
            offset: state.offset,
            line_count: state.line_count,
            line_no: state.line_no,
            counted,
        }
    }
}

/// Count newlines streaming through the file, adding one if the final
/// buffer does not end with a newline. Leaves the reader position
/// unspecified; callers must seek afterwards.
fn count_lines(reader: &mut BufReader<std::fs::File>) -> std::io::Result<u64> {
    let mut buf = vec![0u8; COUNT_BUF];
    let mut lines = 0u64;
    let mut last = b'\n';
    loop {
        let read = reader.read(&mut buf)?;
        if read == 0 {
            break;
        }
        lines += buf[..read].iter().filter(|&&b| b == b'\n').count() as u64;
        last = buf[read - 1];
    }
    if last != b'\n' {
        lines += 1;
    }
    Ok(lines)
}

#[cfg(test)]
#[path = "cursor_tests.rs"]
mod tests;

//! Per-file incremental read cursor.
//!
//! A cursor tracks the half-open byte window `[window_start, window_end)` of a
//! watched file that has been written but not yet delivered. Close-write
//! notifications widen the window; [`FileCursor::extract`] copies it out and
//! [`FileCursor::advance`] marks it delivered.

use crate::config::WatchedFile;
use crate::error::{Error, Result};
use regex::bytes::Regex;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Bytes re-read before end-of-file at bootstrap, covering writes that race
/// the watch registration.
pub const BACK_SCAN: u64 = 256;

/// Classified native file event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// No event seen since bootstrap.
    Init,
    Modify,
    CloseWrite,
    CloseNoWrite,
    Open,
    Access,
    MoveSelf,
    AttribChange,
    DeleteSelf,
    Ignored,
}

impl From<&notify::EventKind> for EventKind {
    fn from(kind: &notify::EventKind) -> Self {
        use notify::event::{AccessKind, AccessMode, ModifyKind};

        match kind {
            notify::EventKind::Access(AccessKind::Close(AccessMode::Write)) => Self::CloseWrite,
            notify::EventKind::Access(AccessKind::Close(_)) => Self::CloseNoWrite,
            notify::EventKind::Access(AccessKind::Open(_)) => Self::Open,
            notify::EventKind::Access(_) => Self::Access,
            notify::EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) => Self::Modify,
            notify::EventKind::Modify(ModifyKind::Metadata(_)) => Self::AttribChange,
            notify::EventKind::Modify(ModifyKind::Name(_)) => Self::MoveSelf,
            notify::EventKind::Remove(_) => Self::DeleteSelf,
            _ => Self::Ignored,
        }
    }
}

/// What the caller must do with a cursor after feeding it events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorStatus {
    /// Still tracking; the window may or may not have grown.
    Active,
    /// The file is gone; the cursor is stopped and should be deregistered.
    Removed,
}

/// Incremental read state for one watched file.
#[derive(Debug)]
pub struct FileCursor {
    file: Arc<WatchedFile>,
    path: PathBuf,
    back_scan: u64,
    window_start: u64,
    window_end: u64,
    stopped: bool,
    last_event: EventKind,
    dirty: bool,
    delimiter: std::result::Result<Regex, regex::Error>,
}

impl FileCursor {
    /// Creates a cursor for `file` and bootstraps it from the current file size.
    pub fn new(file: Arc<WatchedFile>) -> Result<Self> {
        Self::with_back_scan(file, BACK_SCAN)
    }

    pub fn with_back_scan(file: Arc<WatchedFile>, back_scan: u64) -> Result<Self> {
        let path = std::path::absolute(&file.path)?;
        let delimiter = Regex::new(&file.pattern);
        let mut cursor = Self {
            file,
            path,
            back_scan,
            window_start: 0,
            window_end: 0,
            stopped: false,
            last_event: EventKind::Init,
            dirty: false,
            delimiter,
        };
        cursor.bootstrap()?;
        Ok(cursor)
    }

    /// Resets the window to end-of-file, minus the back-scan.
    pub fn bootstrap(&mut self) -> Result<()> {
        let Some(size) = self.measure()? else {
            return Err(Error::FileNotFound {
                path: self.path.display().to_string(),
            });
        };

        self.window_end = size;
        self.window_start = size.saturating_sub(self.back_scan);
        self.stopped = false;
        self.dirty = false;
        self.last_event = EventKind::Init;
        Ok(())
    }

    /// Applies the kinds of one notification, in order.
    pub fn on_event(&mut self, kinds: &[EventKind]) -> Result<CursorStatus> {
        if self.stopped {
            return Ok(CursorStatus::Removed);
        }

        for &kind in kinds {
            match kind {
                EventKind::Modify => {
                    self.last_event = kind;
                    self.dirty = true;
                }
                EventKind::CloseWrite => {
                    self.last_event = kind;
                    match self.measure()? {
                        Some(size) => self.grow_to(size),
                        None => return Ok(self.stop()),
                    }
                }
                EventKind::DeleteSelf => {
                    self.last_event = kind;
                    return Ok(self.stop());
                }
                _ => {}
            }
        }

        Ok(CursorStatus::Active)
    }

    /// Appends the undelivered window to `buffer` and returns its length.
    ///
    /// Never reads past `window_end`, even if the file has grown since the
    /// last close-write. A window that can no longer be read in full leaves
    /// `buffer` untouched.
    pub fn extract(&self, buffer: &mut Vec<u8>) -> Result<usize> {
        if self.stopped {
            return Err(self.removed());
        }
        let Some(len) = calculate_bytes_to_read(self.window_end, self.window_start) else {
            return Ok(0);
        };

        let mut file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(self.removed()),
            Err(e) => return Err(e.into()),
        };
        file.seek(SeekFrom::Start(self.window_start))?;

        let mut chunk = Vec::new();
        file.take(len).read_to_end(&mut chunk)?;
        if (chunk.len() as u64) < len {
            return Err(Error::WindowUnavailable {
                path: self.path.display().to_string(),
                start: self.window_start,
                end: self.window_end,
            });
        }

        buffer.extend_from_slice(&chunk);
        Ok(chunk.len())
    }

    /// Marks the current window as delivered.
    ///
    /// Call exactly once per extraction: skipping it re-delivers the window,
    /// calling it twice without growth in between is a no-op on the window.
    pub fn advance(&mut self) {
        self.window_start = self.window_end;
        self.dirty = false;
    }

    /// Splits extracted bytes into records on the delimiter pattern.
    ///
    /// Blank records are dropped. An invalid pattern yields no records.
    pub fn split(&self, bytes: &[u8]) -> Vec<String> {
        match &self.delimiter {
            Ok(regex) => split_and_filter_content(regex, bytes),
            Err(e) => {
                tracing::error!(
                    path = %self.path.display(),
                    pattern = %self.file.pattern,
                    error = %e,
                    "invalid delimiter pattern, records not split"
                );
                Vec::new()
            }
        }
    }

    /// Whether the delimiter pattern compiled.
    pub fn has_valid_delimiter(&self) -> bool {
        self.delimiter.is_ok()
    }

    pub fn file(&self) -> &Arc<WatchedFile> {
        &self.file
    }

    /// Absolute path of the watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    pub fn window_end(&self) -> u64 {
        self.window_end
    }

    /// Number of bytes in the undelivered window.
    pub fn pending(&self) -> u64 {
        calculate_bytes_to_read(self.window_end, self.window_start).unwrap_or(0)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn last_event(&self) -> EventKind {
        self.last_event
    }

    fn stop(&mut self) -> CursorStatus {
        self.stopped = true;
        self.window_start = self.window_end;
        CursorStatus::Removed
    }

    fn removed(&self) -> Error {
        Error::FileRemoved {
            path: self.path.display().to_string(),
        }
    }

    /// Current file size, or `None` if the file does not exist.
    fn measure(&self) -> Result<Option<u64>> {
        match std::fs::metadata(&self.path) {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn grow_to(&mut self, size: u64) {
        if detect_file_truncation(size, self.window_end) {
            // TODO: reset to 0 once rotation (truncate and reopen) can be told
            // apart from a partial rewrite.
            tracing::warn!(
                path = %self.path.display(),
                size,
                window_start = self.window_start,
                window_end = self.window_end,
                "file shrank below cursor, keeping position"
            );
        } else {
            self.window_end = size;
        }
    }
}

/// Split content on the delimiter and drop empty/whitespace-only parts
fn split_and_filter_content(delimiter: &Regex, content: &[u8]) -> Vec<String> {
    delimiter
        .split(content)
        .filter_map(|part| {
            let part = String::from_utf8_lossy(part);
            if part.trim().is_empty() {
                None
            } else {
                Some(part.into_owned())
            }
        })
        .collect()
}

/// Detect if the file was truncated by comparing current size with the window end
fn detect_file_truncation(current_size: u64, window_end: u64) -> bool {
    current_size < window_end
}

/// Calculate bytes to read between the window bounds
fn calculate_bytes_to_read(window_end: u64, window_start: u64) -> Option<u64> {
    if window_end <= window_start {
        None
    } else {
        Some(window_end - window_start)
    }
}

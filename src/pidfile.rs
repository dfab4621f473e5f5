//! PID-file bookkeeping
//!
//! The PID-file is the only record of which process owns the service slot.
//! Its presence is evidence, not proof: a crashed daemon leaves a stale file
//! behind, so readers must tolerate contents that no longer match a live
//! process.

use crate::error::Result;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Handle on the PID-file at a fixed path
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the recorded process id.
    ///
    /// Returns `None` when the file is absent, unreadable, does not hold an
    /// integer, or holds a non-positive one.
    pub fn read(&self) -> Option<i32> {
        let content = fs::read_to_string(&self.path).ok()?;
        match content.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => Some(pid),
            Ok(pid) => {
                tracing::warn!(pid, path = %self.path.display(), "ignoring non-positive pid");
                None
            }
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "pidfile content is not a pid");
                None
            }
        }
    }

    /// True iff the file exists and is non-empty.
    pub fn is_valid(&self) -> bool {
        fs::metadata(&self.path)
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    /// Record `pid`, truncating any previous content
    pub fn write(&self, pid: u32) -> Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o644);
        }
        let mut file = options.open(&self.path)?;
        writeln!(file, "{}", pid)?;
        Ok(())
    }

    /// Delete the file. A missing file is not an error.
    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Removes the PID-file when the owning process leaves its task loop.
///
/// Only removes the file if it still names this process, so a guard that
/// outlives a restart cannot delete its successor's record.
#[derive(Debug)]
pub struct PidFileGuard {
    pid_file: PidFile,
    pid: u32,
}

impl PidFileGuard {
    pub fn new(pid_file: PidFile, pid: u32) -> Self {
        Self { pid_file, pid }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn pid_file(&self) -> &PidFile {
        &self.pid_file
    }
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        if self.pid_file.read() != i32::try_from(self.pid).ok() {
            return;
        }
        if let Err(e) = self.pid_file.remove() {
            tracing::warn!(path = %self.pid_file.path().display(), error = %e, "failed to remove pidfile");
        }
    }
}

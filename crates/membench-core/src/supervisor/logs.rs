//! Per-run log files written by the supervisor.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::error::HarnessResult;
use crate::layout::RunLayout;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Paths of the two logs of one supervised run attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLogs {
    pub dir: PathBuf,
    /// Supervisor messages about this run.
    pub parent: PathBuf,
    /// Everything the child printed, stdout and stderr merged.
    pub child: PathBuf,
}

impl RunLogs {
    /// Create `<out_dir>/logs/` and pick timestamped file names for this attempt.
    pub fn prepare(out_dir: &Path) -> HarnessResult<Self> {
        let dir = RunLayout::logs_dir(out_dir);
        std::fs::create_dir_all(&dir)?;
        let stamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        Ok(Self {
            parent: dir.join(format!("parent_{stamp}.log")),
            child: dir.join(format!("child_{stamp}.log")),
            dir,
        })
    }

    /// Open the parent log for appending, duplicated to stderr.
    pub fn open_parent(&self) -> HarnessResult<Tee<io::Stderr, File>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.parent)?;
        Ok(Tee::new(io::stderr(), file))
    }
}

/// Writes everything to both sinks.
pub struct Tee<A, B> {
    first: A,
    second: B,
}

impl<A: Write, B: Write> Tee<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    /// Write one line and flush both sinks.
    pub fn line(&mut self, message: &str) -> io::Result<()> {
        writeln!(self, "{message}")?;
        self.flush()
    }

    pub fn into_inner(self) -> (A, B) {
        (self.first, self.second)
    }
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.first.write_all(buf)?;
        self.second.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.first.flush()?;
        self.second.flush()
    }
}

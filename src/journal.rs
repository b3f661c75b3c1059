//! Append-only event journal.
//!
//! Human-readable lifecycle and detection events, one per line:
//! `2024-05-01 09:30:12 - Employee absence detected`.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

pub const JOURNAL_HEADER: &str = "# Employee Tracking System Log";

/// Lines returned by `tail` when the caller does not say otherwise.
pub const DEFAULT_TAIL_LINES: usize = 100;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug)]
pub struct EventJournal {
    path: PathBuf,
    file: Mutex<File>,
}

impl EventJournal {
    /// Open (or create) the journal, writing the header to a new file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("create journal directory {}", parent.display()))?;
        }
        let is_new = !path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open journal {}", path.display()))?;
        if is_new {
            writeln!(file, "{}\n", JOURNAL_HEADER).context("write journal header")?;
        }
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one timestamped line.
    pub fn append(&self, message: &str) -> Result<()> {
        log::info!("{}", message);
        let line = format!("{} - {}\n", Local::now().format(TIMESTAMP_FORMAT), message);
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        file.write_all(line.as_bytes())
            .with_context(|| format!("append to journal {}", self.path.display()))?;
        file.flush().context("flush journal")?;
        Ok(())
    }

    /// Append, logging instead of failing. Journal trouble never stops tracking.
    pub fn record(&self, message: &str) {
        if let Err(err) = self.append(message) {
            log::warn!("journal write failed: {:#}", err);
        }
    }

    /// The last `max_lines` lines, oldest first.
    pub fn tail(&self, max_lines: usize) -> Result<Vec<String>> {
        let file = File::open(&self.path)
            .with_context(|| format!("read journal {}", self.path.display()))?;
        let lines = BufReader::new(file)
            .lines()
            .collect::<std::io::Result<Vec<_>>>()
            .context("read journal lines")?;
        let skip = lines.len().saturating_sub(max_lines);
        Ok(lines.into_iter().skip(skip).collect())
    }
}

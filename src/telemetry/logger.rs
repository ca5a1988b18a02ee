//! # JSONL Event Log
//!
//! Persists event log lines as JSON Lines, one record per line:
//!
//! ```text
//! {"ts":"2024-06-01T06:00:00.123Z","severity":"info","line":"Power Output UA1 enabled"}
//! ```
//!
//! Files are named `events_NNNNNN.jsonl` with an increasing sequence number.
//! A new file is started after `max_records_per_file` records; only the
//! newest `max_files_to_keep` files are retained.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::LoggingConfig;
use crate::error::Result;
use crate::events::{DisplayField, EventSink, Severity};

const FILE_PREFIX: &str = "events_";
const FILE_SUFFIX: &str = ".jsonl";

#[derive(Debug, Serialize)]
struct Record<'a> {
    ts: DateTime<Utc>,
    severity: Severity,
    line: &'a str,
}

/// Rotating JSONL event log
pub struct JsonlEventLog {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    records_in_file: usize,
    next_index: u64,
}

impl std::fmt::Debug for JsonlEventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonlEventLog")
            .field("dir", &self.dir)
            .field("records_in_file", &self.records_in_file)
            .field("next_index", &self.next_index)
            .finish_non_exhaustive()
    }
}

fn file_index(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix(FILE_PREFIX)?
        .strip_suffix(FILE_SUFFIX)?
        .parse()
        .ok()
}

impl JsonlEventLog {
    /// Opens an event log in `config.dir`
    ///
    /// The directory is created if needed. Logging continues in a new file
    /// after the highest existing sequence number.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created or read
    pub fn open(config: &LoggingConfig) -> Result<Self> {
        let dir = PathBuf::from(&config.dir);
        fs::create_dir_all(&dir)?;

        let mut log = Self {
            dir,
            max_records_per_file: config.max_records_per_file.max(1),
            max_files_to_keep: config.max_files_to_keep.max(1),
            writer: None,
            records_in_file: 0,
            next_index: 0,
        };
        log.next_index = log.files()?.last().map_or(0, |(index, _)| index + 1);
        Ok(log)
    }

    /// Directory holding the log files
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Existing log files, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be read
    pub fn files(&self) -> Result<Vec<(u64, PathBuf)>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if let Some(index) = file_index(&path) {
                files.push((index, path));
            }
        }
        files.sort_by_key(|(index, _)| *index);
        Ok(files)
    }

    /// Appends one record
    ///
    /// # Errors
    ///
    /// Returns error if the record cannot be written or a rotation fails
    pub fn write(&mut self, severity: Severity, line: &str) -> Result<()> {
        if self.records_in_file >= self.max_records_per_file {
            self.writer = None;
        }

        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => self.rotate()?,
        };

        let record = Record {
            ts: Utc::now(),
            severity,
            line,
        };
        serde_json::to_writer(&mut *writer, &record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        self.records_in_file += 1;
        Ok(())
    }

    fn rotate(&mut self) -> Result<&mut BufWriter<File>> {
        let path = self
            .dir
            .join(format!("{}{:06}{}", FILE_PREFIX, self.next_index, FILE_SUFFIX));
        self.next_index += 1;

        debug!("Starting event log file {}", path.display());
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        self.records_in_file = 0;
        self.prune()?;

        Ok(self.writer.insert(BufWriter::new(file)))
    }

    fn prune(&self) -> Result<()> {
        let files = self.files()?;
        let excess = files.len().saturating_sub(self.max_files_to_keep);
        for (_, path) in files.into_iter().take(excess) {
            debug!("Removing old event log file {}", path.display());
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

impl EventSink for JsonlEventLog {
    fn append_log(&mut self, severity: Severity, line: &str) {
        if let Err(e) = self.write(severity, line) {
            warn!("Event log write failed: {}", e);
        }
    }

    fn display_update(&mut self, _field: DisplayField) {}
}

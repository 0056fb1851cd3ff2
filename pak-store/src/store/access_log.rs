//! Append-only access log for cook auditing
//!
//! Records every key the store touches, one path per line, deduplicated.
//! Build pipelines diff these logs to find which cache entries a cook
//! actually consumed.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

pub struct AccessLogWriter {
    path: PathBuf,
    inner: Mutex<LogState>,
}

struct LogState {
    writer: BufWriter<File>,
    recorded: HashSet<String>,
}

impl AccessLogWriter {
    pub fn new(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        debug!("Opened access log at {:?}", path);
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(LogState {
                writer: BufWriter::new(file),
                recorded: HashSet::new(),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record an accessed entry path; repeated accesses log once
    pub fn append(&self, entry: &str) {
        let mut state = self.inner.lock();
        if !state.recorded.insert(entry.to_string()) {
            return;
        }
        if let Err(err) = writeln!(state.writer, "{entry}") {
            warn!("Failed to append {entry} to access log {:?}: {err}", self.path);
        }
    }
}

impl Drop for AccessLogWriter {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        if let Err(err) = state.writer.flush() {
            warn!("Failed to flush access log {:?}: {err}", self.path);
        }
    }
}

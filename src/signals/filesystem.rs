//! Filesystem signal bus.
//!
//! One JSON file per signal under the bus directory, written atomically
//! (temp file + rename) and scanned in name order on poll. File names
//! embed the publish timestamp so lexicographic order is timestamp
//! order. Consumer cursors live under `consumers/`, updated in place.
//!
//! Corrupt signal files are skipped with a warning; the bus remains
//! available.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConvergentError;
use crate::types::intent::AgentId;
use crate::types::signal::Signal;

use super::SignalBus;

const SIGNAL_EXT: &str = "json";
const CURSOR_DIR: &str = "consumers";

/// Directory-backed signal bus.
pub struct FilesystemSignalBus {
    dir: PathBuf,
    /// Serializes cursor read-modify-write per process.
    cursor_lock: Mutex<()>,
}

impl FilesystemSignalBus {
    /// Open (creating if needed) a bus rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, ConvergentError> {
        let dir = dir.into();
        fs::create_dir_all(dir.join(CURSOR_DIR))
            .map_err(|e| ConvergentError::backend(format!("create signal dir: {e}")))?;
        Ok(Self {
            dir,
            cursor_lock: Mutex::new(()),
        })
    }

    /// The bus directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn signal_file_name(signal: &Signal) -> String {
        // Zero-padded micros so lexicographic order is timestamp order.
        format!(
            "{:020}_{}.{SIGNAL_EXT}",
            signal.timestamp.timestamp_micros().max(0),
            signal.signal_id
        )
    }

    fn cursor_path(&self, consumer: &AgentId) -> PathBuf {
        let safe: String = consumer
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(CURSOR_DIR).join(safe)
    }

    fn read_cursor(&self, consumer: &AgentId) -> String {
        fs::read_to_string(self.cursor_path(consumer))
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }

    fn write_cursor(&self, consumer: &AgentId, last: &str) -> Result<(), ConvergentError> {
        atomic_write(&self.cursor_path(consumer), last.as_bytes())
    }

    /// Sorted signal file names in the bus directory.
    fn signal_files(&self) -> Result<Vec<String>, ConvergentError> {
        let mut names = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| ConvergentError::backend(format!("scan signal dir: {e}")))?;
        for entry in entries {
            let entry = entry.map_err(|e| ConvergentError::backend(e.to_string()))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(SIGNAL_EXT) && entry.path().is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    fn load_signal(&self, name: &str) -> Option<Signal> {
        let path = self.dir.join(name);
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(signal) => Some(signal),
                Err(e) => {
                    tracing::warn!(file = name, error = %e, "skipping corrupt signal file");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(file = name, error = %e, "skipping unreadable signal file");
                None
            }
        }
    }
}

/// Write a file atomically: temp sibling, then rename over the target.
fn atomic_write(path: &Path, contents: &[u8]) -> Result<(), ConvergentError> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)
        .map_err(|e| ConvergentError::backend(format!("write {}: {e}", tmp.display())))?;
    fs::rename(&tmp, path)
        .map_err(|e| ConvergentError::backend(format!("rename {}: {e}", path.display())))?;
    Ok(())
}

impl SignalBus for FilesystemSignalBus {
    fn publish(&self, signal: &Signal) -> Result<(), ConvergentError> {
        let name = Self::signal_file_name(signal);
        let contents = serde_json::to_vec(signal)
            .map_err(|e| ConvergentError::backend(format!("encode signal: {e}")))?;
        atomic_write(&self.dir.join(name), &contents)
    }

    fn poll(&self, consumer: &AgentId) -> Result<Vec<Signal>, ConvergentError> {
        let _guard = self.cursor_lock.lock();
        let cursor = self.read_cursor(consumer);

        let mut delivered = Vec::new();
        let mut last = cursor.clone();
        for name in self.signal_files()? {
            if name.as_str() <= cursor.as_str() {
                continue;
            }
            last = name.clone();
            if let Some(signal) = self.load_signal(&name) {
                if signal.addressed_to(consumer) {
                    delivered.push(signal);
                }
            }
        }

        if last != cursor {
            self.write_cursor(consumer, &last)?;
        }
        Ok(delivered)
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, ConvergentError> {
        let mut removed = 0;
        for name in self.signal_files()? {
            if let Some(signal) = self.load_signal(&name) {
                if signal.is_expired(now) {
                    if let Err(e) = fs::remove_file(self.dir.join(&name)) {
                        tracing::warn!(file = name.as_str(), error = %e, "failed to sweep signal file");
                    } else {
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}

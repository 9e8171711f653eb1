//! Durable, append-only event journal.
//!
//! One JSON object per line. Every append is flushed and fsynced before
//! `record` returns, so a returned `Ok` means the record is on disk.

mod records;

pub use records::{JournalRecord, SessionStart, SettlementRecord, TradeRecord, DRY_RUN_ORDER_ID};

use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Failed to open journal {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to write journal: {0}")]
    Write(#[from] std::io::Error),
}

/// Sink for trade and settlement records.
pub trait EventRecorder: Send + Sync {
    fn record(&self, record: &JournalRecord) -> Result<(), JournalError>;
}

/// JSON-lines journal on the local filesystem.
pub struct Journal {
    file: Mutex<File>,
    path: PathBuf,
}

impl Journal {
    /// Opens `path` for appending, creating it and its parent directory.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, JournalError> {
        let path = path.as_ref();
        let open_err = |source| JournalError::Open {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(open_err)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(open_err)?;

        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventRecorder for Journal {
    fn record(&self, record: &JournalRecord) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut file = self.file.lock();
        file.write_all(&line)?;
        file.flush()?;
        file.sync_data()?;

        debug!(kind = record.kind(), ticker = ?record.ticker(), "journal record written");
        Ok(())
    }
}

impl std::fmt::Debug for Journal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Journal").field("path", &self.path).finish()
    }
}

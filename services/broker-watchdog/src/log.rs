//! Append-only watchdog log
//!
//! Entries are kept in memory and, when a path is configured, appended to a
//! JSON-lines file as they are created. Files written in the older
//! trailing-comma format (`{...},{...},`) are still readable.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, WatchdogError};

/// Which payload field a log's entries carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailsField {
    Error,
    Confirmation,
}

/// One detected error or confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(rename = "entryID")]
    pub entry_id: u64,
    pub datetime: DateTime<Utc>,
    #[serde(rename = "originClass")]
    pub origin_class: String,
    #[serde(
        rename = "errorDetails",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub error_details: Option<serde_json::Value>,
    #[serde(
        rename = "confirmationDetails",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub confirmation_details: Option<serde_json::Value>,
}

impl LogEntry {
    pub fn details(&self) -> Option<&serde_json::Value> {
        self.error_details
            .as_ref()
            .or(self.confirmation_details.as_ref())
    }
}

/// In-memory log with optional append-only persistence
#[derive(Debug)]
pub struct EventLog {
    entries: Vec<LogEntry>,
    path: Option<PathBuf>,
    field: DetailsField,
}

impl EventLog {
    pub fn in_memory(field: DetailsField) -> Self {
        Self {
            entries: Vec::new(),
            path: None,
            field,
        }
    }

    /// Open a log, loading any entries already persisted at `path`
    ///
    /// A missing file is not an error; it is created on the first append.
    pub fn open(path: Option<PathBuf>, field: DetailsField) -> Result<Self> {
        let entries = match &path {
            Some(path) if path.exists() => {
                let content = std::fs::read_to_string(path)?;
                let entries = parse_log(&content)?;
                debug!("Loaded {} log entries from {:?}", entries.len(), path);
                entries
            }
            _ => Vec::new(),
        };
        Ok(Self {
            entries,
            path,
            field,
        })
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a new entry; its id is the number of entries before it
    ///
    /// A failure to persist the entry is logged and the entry is still kept
    /// in memory.
    pub fn append(&mut self, origin: &str, details: serde_json::Value) -> &LogEntry {
        let (error_details, confirmation_details) = match self.field {
            DetailsField::Error => (Some(details), None),
            DetailsField::Confirmation => (None, Some(details)),
        };
        let entry = LogEntry {
            entry_id: self.entries.len() as u64,
            datetime: Utc::now(),
            origin_class: origin.to_string(),
            error_details,
            confirmation_details,
        };

        if let Some(path) = &self.path {
            if let Err(e) = persist(path, &entry) {
                warn!("Failed to persist log entry {} to {:?}: {}", entry.entry_id, path, e);
            }
        }

        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }
}

fn persist(path: &Path, entry: &LogEntry) -> Result<()> {
    let mut line = serde_json::to_string(entry)?;
    line.push('\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Parse persisted log content in either supported format
pub fn parse_log(content: &str) -> Result<Vec<LogEntry>> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if let Some(body) = trimmed.strip_suffix(',') {
        let wrapped = format!("[{}]", body);
        return serde_json::from_str(&wrapped)
            .map_err(|e| WatchdogError::Log(format!("Invalid trailing-comma log: {}", e)));
    }

    trimmed
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .map_err(|e| WatchdogError::Log(format!("Invalid log line {}: {}", index + 1, e)))
        })
        .collect()
}

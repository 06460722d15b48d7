//! Persisted run results.
//!
//! Two files per run: a counters map rewritten on every flush, and an
//! execution log that gains one JSON line per finished script.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sonde_agent::api::ScriptState;

use crate::property::PropertyRegistry;

/// One finished script execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub prop_name: String,
    pub start_steps_count: u64,
    pub state: ScriptState,
    pub traceback: String,
}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("writing {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("encoding results: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug)]
pub struct ResultRecorder {
    counters_file: PathBuf,
    exec_log_file: PathBuf,
    pending: VecDeque<ExecutionRecord>,
}

impl ResultRecorder {
    pub fn new(counters_file: impl Into<PathBuf>, exec_log_file: impl Into<PathBuf>) -> Self {
        Self {
            counters_file: counters_file.into(),
            exec_log_file: exec_log_file.into(),
            pending: VecDeque::new(),
        }
    }

    pub fn counters_file(&self) -> &Path {
        &self.counters_file
    }

    pub fn exec_log_file(&self) -> &Path {
        &self.exec_log_file
    }

    /// Queue an execution for the next flush.
    pub fn record(&mut self, record: ExecutionRecord) {
        self.pending.push_back(record);
    }

    /// Rewrite the counters file and append queued executions.
    pub fn flush(&mut self, registry: &PropertyRegistry) -> Result<(), RecordError> {
        let counters = serde_json::to_string_pretty(&registry.statistics())?;
        std::fs::write(&self.counters_file, counters).map_err(|source| RecordError::Io {
            path: self.counters_file.clone(),
            source,
        })?;

        if self.pending.is_empty() {
            return Ok(());
        }
        let io_err = |source| RecordError::Io {
            path: self.exec_log_file.clone(),
            source,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.exec_log_file)
            .map_err(io_err)?;
        while let Some(record) = self.pending.front() {
            let line = serde_json::to_string(record)?;
            writeln!(file, "{line}").map_err(io_err)?;
            self.pending.pop_front();
        }
        Ok(())
    }
}

/// Read back an execution log, one record per line.
pub fn read_exec_log(path: &Path) -> Result<Vec<ExecutionRecord>, RecordError> {
    let text = std::fs::read_to_string(path).map_err(|source| RecordError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    text.lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).map_err(RecordError::from))
        .collect()
}

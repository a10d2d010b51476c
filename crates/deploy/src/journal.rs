//! Append-only execution log.
//!
//! Every action the orchestrator takes (deploy, reuse, call, failure) is recorded here,
//! both in memory for the current run and, when backed by a file, as one JSON object
//! per line so the history survives across sessions.

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use alloy_core::primitives::{Address, TxHash};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Default file name of the execution log inside the deployments directory.
pub const EXECUTION_LOG_FILENAME: &str = "execution.jsonl";

/// What happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(tag = "action", rename_all = "snake_case")]
#[strum(serialize_all = "kebab-case")]
pub enum LogAction {
    /// A registry entry was written after a fresh deployment.
    Deployed {
        contract_kind: String,
        identity: Address,
    },
    /// A registry entry was superseded by a forced redeployment.
    Replaced {
        contract_kind: String,
        previous: Address,
        identity: Address,
    },
    /// A deploy step found a matching registry entry and did nothing.
    Reused { identity: Address },
    /// A configuration call was applied.
    Called {
        method: String,
        target: Address,
        tx_hash: TxHash,
    },
    /// A script was skipped by its predicate.
    Skipped,
    /// A step failed and halted the run.
    Failed { error: String },
    /// The run was cancelled before this step.
    Cancelled,
}

/// One line of the execution log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix timestamp in seconds.
    pub timestamp: i64,
    pub network: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    /// Component (or script) the action applies to.
    pub target: String,
    #[serde(flatten)]
    pub action: LogAction,
}

/// Where in the run the next entries originate from.
#[derive(Debug, Clone, Default)]
struct Position {
    script: Option<String>,
    step: Option<usize>,
}

/// The execution log of a run.
#[derive(Debug, Default)]
pub struct ExecutionLog {
    entries: Vec<LogEntry>,
    file: Option<File>,
    path: Option<PathBuf>,
    position: Position,
}

impl ExecutionLog {
    /// A log that only lives for the current process.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open (or create) a log file and append to it.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::debug!(path = %path.display(), "Execution log opened");

        Ok(Self {
            file: Some(file),
            path: Some(path.to_path_buf()),
            ..Self::default()
        })
    }

    /// Read every entry previously written to a log file.
    pub fn read_history(path: &Path) -> Result<Vec<LogEntry>> {
        if !path.exists() {
            return Ok(Vec::new());
        }

        let reader = BufReader::new(File::open(path)?);
        let mut entries = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }
        Ok(entries)
    }

    /// Attribute subsequent entries to a script and step.
    pub fn set_position(&mut self, script: Option<&str>, step: Option<usize>) {
        self.position = Position {
            script: script.map(str::to_string),
            step,
        };
    }

    /// Record an action.
    pub fn append(&mut self, network: &str, target: &str, action: LogAction) -> Result<()> {
        let entry = LogEntry {
            timestamp: chrono::Utc::now().timestamp(),
            network: network.to_string(),
            script: self.position.script.clone(),
            step: self.position.step,
            target: target.to_string(),
            action,
        };

        if let Some(file) = self.file.as_mut() {
            let mut line = serde_json::to_string(&entry)?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
            file.sync_data()?;
        }

        tracing::trace!(
            network,
            target,
            action = %entry.action,
            "Execution log entry appended"
        );

        self.entries.push(entry);
        Ok(())
    }

    /// Entries recorded during this session.
    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_entries_carry_position() {
        let mut log = ExecutionLog::in_memory();
        log.set_position(Some("000_main"), Some(2));
        log.append(
            "localhost",
            "Treasury",
            LogAction::Reused {
                identity: Address::ZERO,
            },
        )
        .unwrap();

        let entry = &log.entries()[0];
        assert_eq!(entry.script.as_deref(), Some("000_main"));
        assert_eq!(entry.step, Some(2));
        assert_eq!(entry.action.to_string(), "reused");
    }

    #[test]
    fn test_history_survives_reopen() {
        let temp_dir = TempDir::new("keel-test").expect("Failed to create temp dir");
        let path = temp_dir.path().join(EXECUTION_LOG_FILENAME);

        {
            let mut log = ExecutionLog::open(&path).unwrap();
            log.append("localhost", "Vault", LogAction::Skipped).unwrap();
        }
        {
            let mut log = ExecutionLog::open(&path).unwrap();
            log.append(
                "localhost",
                "Vault",
                LogAction::Failed {
                    error: "boom".to_string(),
                },
            )
            .unwrap();
            assert_eq!(log.entries().len(), 1, "Session entries only");
        }

        let history = ExecutionLog::read_history(&path).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, LogAction::Skipped);
        assert!(matches!(history[1].action, LogAction::Failed { .. }));
    }

    #[test]
    fn test_missing_history_is_empty() {
        let temp_dir = TempDir::new("keel-test").expect("Failed to create temp dir");
        let history = ExecutionLog::read_history(&temp_dir.path().join("nope.jsonl")).unwrap();
        assert!(history.is_empty());
    }
}

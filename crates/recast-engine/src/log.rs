//! Append-only JSONL mutation log: the audit trail the commit-staging
//! collaborator consumes. Records are never rewritten or deleted; a single
//! writer at a time serializes through the store's lock.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{EngineError, Strategy};

/// One attempted mutation, as recorded for the audit trail.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MutationRecord {
    pub seq: u64,
    pub path: String,
    pub strategy: Strategy,
    pub risk_score: f64,
    /// Content hash of the unified diff, see [`diff_reference`].
    pub diff_reference: String,
    /// RFC 3339 UTC timestamp assigned at append time.
    pub timestamp: String,
    pub run_id: u64,
}

/// Fields the caller supplies; seq and timestamp are assigned on append.
#[derive(Clone, Debug, PartialEq)]
pub struct MutationDraft {
    pub path: String,
    pub strategy: Strategy,
    pub risk_score: f64,
    pub diff_reference: String,
    pub run_id: u64,
}

pub struct MutationLog {
    root_dir: PathBuf,
    lock: Mutex<()>,
}

impl MutationLog {
    pub fn new<P: Into<PathBuf>>(root_dir: P) -> Self {
        Self {
            root_dir: root_dir.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    fn log_path(&self) -> PathBuf {
        self.root_dir.join("mutations.jsonl")
    }

    pub fn append(&self, draft: MutationDraft) -> Result<u64, EngineError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| EngineError::Io("mutation log lock poisoned".into()))?;
        let existing = self.read_all()?;
        let next_seq = existing.last().map(|record| record.seq + 1).unwrap_or(1);
        let record = MutationRecord {
            seq: next_seq,
            path: draft.path,
            strategy: draft.strategy,
            risk_score: draft.risk_score,
            diff_reference: draft.diff_reference,
            timestamp: Utc::now().to_rfc3339(),
            run_id: draft.run_id,
        };
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .map_err(io_err)?;
        let line = serde_json::to_string(&record)
            .map_err(|err| EngineError::Serde(err.to_string()))?;
        file.write_all(line.as_bytes()).map_err(io_err)?;
        file.write_all(b"\n").map_err(io_err)?;
        file.sync_data().map_err(io_err)?;
        Ok(next_seq)
    }

    pub fn scan(&self, from_seq: u64) -> Result<Vec<MutationRecord>, EngineError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| EngineError::Io("mutation log lock poisoned".into()))?;
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|record| record.seq >= from_seq)
            .collect())
    }

    fn read_all(&self) -> Result<Vec<MutationRecord>, EngineError> {
        fs::create_dir_all(&self.root_dir).map_err(io_err)?;
        let path = self.log_path();
        if !path.exists() {
            File::create(&path).map_err(io_err)?;
        }
        let file = File::open(&path).map_err(io_err)?;
        let reader = BufReader::new(file);
        let mut records: Vec<MutationRecord> = Vec::new();
        for line in reader.lines() {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }
            let record: MutationRecord = serde_json::from_str(&line)
                .map_err(|err| EngineError::Serde(err.to_string()))?;
            if let Some(last) = records.last() {
                if record.seq <= last.seq {
                    return Err(EngineError::LogCorrupt(format!(
                        "sequence regressed from {} to {}",
                        last.seq, record.seq
                    )));
                }
            }
            records.push(record);
        }
        Ok(records)
    }
}

/// Stable content reference for a diff artifact.
pub fn diff_reference(diff: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(diff.as_bytes());
    hex::encode(hasher.finalize())
}

fn io_err(err: std::io::Error) -> EngineError {
    EngineError::Io(err.to_string())
}

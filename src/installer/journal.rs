// src/installer/journal.rs

//! Append-only operation journal
//!
//! Before a transaction touches the rootfs it writes its plan here; every
//! applied operation is appended as it completes. A finished transaction
//! deletes its journal, so any journal left on disk belongs to a run that
//! was interrupted. There is no automatic undo: `quarry doctor` lists the
//! leftovers and the operator re-runs the command.
//!
//! Format: `{crc32_hex}|{json}\n`

use crate::error::{Error, Result};
use crate::resolver::{Operation, Plan};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

const JOURNAL_PREFIX: &str = "tx-";
const JOURNAL_EXTENSION: &str = "journal";

/// One planned or applied operation, as `<letter> <fingerprint>`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalOperation {
    pub kind: char,
    pub package: String,
}

impl From<&Operation> for JournalOperation {
    fn from(op: &Operation) -> Self {
        Self {
            kind: op.kind.letter(),
            package: op.package().fingerprint(),
        }
    }
}

/// A record in the operation journal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum JournalRecord {
    Begin {
        tx_uuid: String,
        rootfs: PathBuf,
        description: String,
        timestamp: DateTime<Utc>,
    },

    Plan { operations: Vec<JournalOperation> },

    Applied { operation: JournalOperation },

    Failed {
        operation: JournalOperation,
        error: String,
    },

    Done { success: bool, duration_ms: u64 },
}

/// Journal of one running transaction
pub struct OperationJournal {
    path: PathBuf,
    file: File,
    tx_uuid: String,
    started: DateTime<Utc>,
}

impl OperationJournal {
    /// Start a journal in `journal_dir` and write its `Begin` record
    pub fn begin(journal_dir: &Path, rootfs: &Path, description: &str) -> Result<Self> {
        fs::create_dir_all(journal_dir)?;

        let tx_uuid = Uuid::new_v4().to_string();
        let path = journal_dir.join(format!(
            "{}{}.{}",
            JOURNAL_PREFIX, tx_uuid, JOURNAL_EXTENSION
        ));
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)?;

        let started = Utc::now();
        let mut journal = Self {
            path,
            file,
            tx_uuid: tx_uuid.clone(),
            started,
        };
        journal.write_barrier(JournalRecord::Begin {
            tx_uuid,
            rootfs: rootfs.to_path_buf(),
            description: description.to_string(),
            timestamp: started,
        })?;
        debug!("Started journal {}", journal.path.display());
        Ok(journal)
    }

    pub fn tx_uuid(&self) -> &str {
        &self.tx_uuid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a record without syncing
    pub fn write(&mut self, record: JournalRecord) -> Result<()> {
        let json = serde_json::to_string(&record)?;
        let crc = crc32fast::hash(json.as_bytes());
        writeln!(self.file, "{:08x}|{}", crc, json)?;
        Ok(())
    }

    /// Write a record and fsync before anything destructive follows
    pub fn write_barrier(&mut self, record: JournalRecord) -> Result<()> {
        self.write(record)?;
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    pub fn record_plan(&mut self, plan: &Plan) -> Result<()> {
        self.write_barrier(JournalRecord::Plan {
            operations: plan.operations.iter().map(JournalOperation::from).collect(),
        })
    }

    pub fn record_applied(&mut self, op: &Operation) -> Result<()> {
        self.write_barrier(JournalRecord::Applied {
            operation: op.into(),
        })
    }

    pub fn record_failed(&mut self, op: &Operation, error: &Error) -> Result<()> {
        self.write_barrier(JournalRecord::Failed {
            operation: op.into(),
            error: error.to_string(),
        })
    }

    /// Close the transaction
    ///
    /// A successful run deletes the journal. A failed one keeps it, ending
    /// with a `Done { success: false }` record so it is reported but not
    /// mistaken for an interrupted run.
    pub fn finish(mut self, success: bool) -> Result<()> {
        let duration_ms = (Utc::now() - self.started).num_milliseconds().max(0) as u64;
        self.write_barrier(JournalRecord::Done {
            success,
            duration_ms,
        })?;
        if success {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Read every intact record of a journal file
///
/// Reading stops at the first line whose checksum does not match; a torn
/// final write is the expected way for that to happen.
pub fn read_records(path: &Path) -> Result<Vec<JournalRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if line.is_empty() {
            continue;
        }

        let Some((crc, json)) = line.split_once('|') else {
            warn!("Malformed journal line {}: missing delimiter", line_num + 1);
            continue;
        };

        let expected = u32::from_str_radix(crc, 16).map_err(|_| {
            Error::TransactionError(format!("Invalid CRC32 at line {}: {}", line_num + 1, crc))
        })?;
        let actual = crc32fast::hash(json.as_bytes());
        if expected != actual {
            warn!(
                "CRC mismatch at line {}: expected {:08x}, got {:08x}",
                line_num + 1,
                expected,
                actual
            );
            break;
        }

        records.push(serde_json::from_str(json)?);
    }

    Ok(records)
}

/// A journal left behind by a transaction that did not complete
#[derive(Debug, Clone)]
pub struct IncompleteTransaction {
    pub path: PathBuf,
    pub tx_uuid: Option<String>,
    pub description: Option<String>,
    pub planned: Vec<JournalOperation>,
    pub applied: Vec<JournalOperation>,
    /// Set when the run ended with an error rather than being interrupted
    pub failed: bool,
}

impl IncompleteTransaction {
    /// Planned operations that never completed
    pub fn pending(&self) -> Vec<&JournalOperation> {
        self.planned
            .iter()
            .filter(|op| !self.applied.contains(op))
            .collect()
    }
}

/// Every journal in `journal_dir`, oldest file name first
pub fn find_incomplete(journal_dir: &Path) -> Result<Vec<IncompleteTransaction>> {
    let mut found = Vec::new();
    if !journal_dir.exists() {
        return Ok(found);
    }

    let mut paths: Vec<PathBuf> = fs::read_dir(journal_dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path.extension().is_some_and(|e| e == JOURNAL_EXTENSION)
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(JOURNAL_PREFIX))
        })
        .collect();
    paths.sort();

    for path in paths {
        let mut tx = IncompleteTransaction {
            path: path.clone(),
            tx_uuid: None,
            description: None,
            planned: Vec::new(),
            applied: Vec::new(),
            failed: false,
        };
        for record in read_records(&path)? {
            match record {
                JournalRecord::Begin {
                    tx_uuid,
                    description,
                    ..
                } => {
                    tx.tx_uuid = Some(tx_uuid);
                    tx.description = Some(description);
                }
                JournalRecord::Plan { operations } => tx.planned = operations,
                JournalRecord::Applied { operation } => tx.applied.push(operation),
                JournalRecord::Failed { .. } => {}
                JournalRecord::Done { success, .. } => tx.failed = !success,
            }
        }
        found.push(tx);
    }

    Ok(found)
}

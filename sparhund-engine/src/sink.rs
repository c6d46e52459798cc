//! Destinations for audit records.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::EngineError;
use crate::record::AuditRecord;

pub trait RecordSink: Send + Sync {
    fn write(&self, record: &AuditRecord) -> Result<(), EngineError>;

    fn flush(&self) -> Result<(), EngineError> {
        Ok(())
    }
}

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordSink for MemorySink {
    fn write(&self, record: &AuditRecord) -> Result<(), EngineError> {
        self.records.lock().push(record.clone());
        Ok(())
    }
}

/// One `<Type>.jsonl` file per record type below `root`, appended to.
pub struct JsonLinesSink {
    root: PathBuf,
    writers: Mutex<HashMap<&'static str, BufWriter<File>>>,
}

impl JsonLinesSink {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            writers: Mutex::new(HashMap::new()),
        })
    }

    pub fn path_for(&self, record_type: &str) -> PathBuf {
        self.root.join(format!("{}.jsonl", record_type))
    }
}

impl RecordSink for JsonLinesSink {
    fn write(&self, record: &AuditRecord) -> Result<(), EngineError> {
        let line = serde_json::to_vec(record)?;
        let kind = record.record_type();

        let mut writers = self.writers.lock();
        let writer = match writers.entry(kind) {
            std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::hash_map::Entry::Vacant(e) => {
                let path = self.path_for(kind);
                let file = OpenOptions::new().create(true).append(true).open(&path)?;
                debug!(path = %path.display(), "Opened record file");
                e.insert(BufWriter::new(file))
            }
        };
        writer.write_all(&line)?;
        writer.write_all(b"\n")?;
        Ok(())
    }

    fn flush(&self) -> Result<(), EngineError> {
        let mut writers = self.writers.lock();
        for writer in writers.values_mut() {
            writer.flush()?;
        }
        info!(root = %self.root.display(), files = writers.len(), "Flushed record files");
        Ok(())
    }
}

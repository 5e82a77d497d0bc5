// ABOUTME: Audit and error sinks for reconciliation outcomes
// ABOUTME: Writes a durable row first, then one line to the append-only log file

use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{ReconcileError, Result};
use crate::store::CentralStore;
use crate::utils::{format_db_timestamp, truncate_chars};

/// Column widths of the durable sink tables.
pub const TABLE_NAME_WIDTH: usize = 10;
pub const PLANT_WIDTH: usize = 10;
pub const DEVICE_TYPE_WIDTH: usize = 10;
pub const ERROR_DETAIL_WIDTH: usize = 1000;
pub const CONNECTION_PLANT_WIDTH: usize = 30;
pub const CONNECTION_DETAIL_WIDTH: usize = 1000;

/// A purge of a central table's tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditRecord {
    pub at: NaiveDateTime,
    pub table: String,
    /// Plant heartbeat that justified the purge.
    pub cutoff: NaiveDateTime,
}

impl AuditRecord {
    pub fn new(at: NaiveDateTime, table: &str, cutoff: NaiveDateTime) -> Self {
        Self {
            at,
            table: truncate_chars(table, TABLE_NAME_WIDTH),
            cutoff,
        }
    }
}

/// An outage or failure while reconciling a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub plant: String,
    pub device_type: String,
    pub detail: String,
}

impl ErrorRecord {
    pub fn new(plant: &str, device_type: &str, detail: &str) -> Self {
        Self {
            plant: truncate_chars(plant, PLANT_WIDTH),
            device_type: truncate_chars(device_type, DEVICE_TYPE_WIDTH),
            detail: truncate_chars(detail, ERROR_DETAIL_WIDTH),
        }
    }
}

/// A plant that could not be reached by the connection supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProblemRecord {
    pub at: NaiveDateTime,
    pub plant: String,
    pub detail: String,
}

impl ConnectionProblemRecord {
    pub fn new(at: NaiveDateTime, plant: &str, detail: &str) -> Self {
        Self {
            at,
            plant: truncate_chars(plant, CONNECTION_PLANT_WIDTH),
            detail: truncate_chars(detail, CONNECTION_DETAIL_WIDTH),
        }
    }
}

/// Append-only, human-readable event log.
///
/// Created on first write. Lines from concurrent tasks never interleave.
#[derive(Debug)]
pub struct SyncLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl SyncLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line prefixed with the local wall-clock time.
    pub async fn append(&self, line: &str) -> std::io::Result<()> {
        let stamped = format!(
            "{} | {}\n",
            format_db_timestamp(&chrono::Local::now().naive_local()),
            line.replace('\n', " ")
        );
        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(stamped.as_bytes()).await?;
        file.flush().await
    }

    /// Log-file failures never fail a call whose durable write already happened.
    async fn append_or_warn(&self, line: &str) {
        if let Err(e) = self.append(line).await {
            tracing::warn!("Failed to append to {:?}: {}", self.path, e);
        }
    }
}

/// Records purges, outages and connection problems.
///
/// Each call writes the durable row first. The log line is written only after
/// the row is committed; when the row cannot be written, the log gets a line
/// marked `DURABLE_WRITE_FAILED` instead and the error is returned.
pub struct AuditTrail<'a, S: CentralStore + ?Sized> {
    store: &'a S,
    log: &'a SyncLog,
}

impl<'a, S: CentralStore + ?Sized> AuditTrail<'a, S> {
    pub fn new(store: &'a S, log: &'a SyncLog) -> Self {
        Self { store, log }
    }

    pub async fn record_purge(
        &self,
        at: NaiveDateTime,
        table: &str,
        cutoff: NaiveDateTime,
    ) -> Result<u64> {
        let record = AuditRecord::new(at, table, cutoff);
        let line = format!(
            "PURGE | table={} | at={} | cutoff={}",
            record.table,
            format_db_timestamp(&record.at),
            format_db_timestamp(&record.cutoff)
        );
        let id = self
            .durable(&line, self.store.insert_purge_record(&record))
            .await?;
        self.log.append_or_warn(&format!("{} | id={}", line, id)).await;
        Ok(id)
    }

    pub async fn record_error(&self, plant: &str, device_type: &str, detail: &str) -> Result<u64> {
        let record = ErrorRecord::new(plant, device_type, detail);
        let line = format!(
            "ERROR | plant={} | type={} | {}",
            record.plant, record.device_type, record.detail
        );
        let id = self
            .durable(&line, self.store.insert_error_record(&record))
            .await?;
        self.log.append_or_warn(&line).await;
        Ok(id)
    }

    pub async fn record_connection_problem(
        &self,
        at: NaiveDateTime,
        plant: &str,
        detail: &str,
    ) -> Result<u64> {
        let record = ConnectionProblemRecord::new(at, plant, detail);
        let line = format!(
            "CONNECTION_FAILED | plant={} | {}",
            record.plant, record.detail
        );
        let id = self
            .durable(&line, self.store.insert_connection_problem(&record))
            .await?;
        self.log.append_or_warn(&line).await;
        Ok(id)
    }

    async fn durable(
        &self,
        line: &str,
        write: impl std::future::Future<Output = Result<u64>>,
    ) -> Result<u64> {
        match write.await {
            Ok(id) => Ok(id),
            Err(e) => {
                let e = match e {
                    e @ ReconcileError::SinkWrite { .. } => e,
                    other => ReconcileError::SinkWrite {
                        sink: "audit",
                        detail: other.to_string(),
                    },
                };
                tracing::error!("{}", e);
                self.log
                    .append_or_warn(&format!("DURABLE_WRITE_FAILED ({}) | {}", e, line))
                    .await;
                Err(e)
            }
        }
    }
}

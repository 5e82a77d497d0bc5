// ABOUTME: In-memory central store and plant source shared by integration tests
// ABOUTME: Records every purge, sink write and remote call for assertions

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use plant_sync_reconciler::audit::{AuditRecord, ConnectionProblemRecord, ErrorRecord};
use plant_sync_reconciler::freshness::FreshnessRow;
use plant_sync_reconciler::{CentralStore, DeviceType, ReconcileError, RemoteHeartbeat, RemoteSource, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

pub fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap()
}

pub fn minutes_ago(minutes: i64) -> NaiveDateTime {
    now() - Duration::minutes(minutes)
}

#[derive(Debug, Clone)]
pub struct FakeTable {
    pub rows: u64,
    pub measurement: Option<NaiveDateTime>,
    pub sync_check: Option<NaiveDateTime>,
    pub has_time_column: bool,
    pub probe_fails: bool,
}

impl FakeTable {
    pub fn new(rows: u64, measurement: Option<NaiveDateTime>, sync_check: Option<NaiveDateTime>) -> Self {
        Self {
            rows,
            measurement,
            sync_check,
            has_time_column: true,
            probe_fails: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteCall {
    pub table: String,
    pub order_column: String,
    pub count: u32,
}

#[derive(Default)]
pub struct FakeCentral {
    pub tables: Mutex<BTreeMap<String, FakeTable>>,
    pub deletes: Mutex<Vec<DeleteCall>>,
    pub purges: Mutex<Vec<AuditRecord>>,
    pub errors: Mutex<Vec<ErrorRecord>>,
    pub connection_problems: Mutex<Vec<ConnectionProblemRecord>>,
    pub catalog_down: AtomicBool,
    pub sinks_down: AtomicBool,
}

impl FakeCentral {
    pub fn with_tables(tables: impl IntoIterator<Item = (&'static str, FakeTable)>) -> Self {
        let central = Self::default();
        {
            let mut map = central.tables.lock().unwrap();
            for (name, table) in tables {
                map.insert(name.to_string(), table);
            }
        }
        central
    }

    pub fn rows(&self, table: &str) -> u64 {
        self.tables.lock().unwrap()[table].rows
    }

    pub fn deletes(&self) -> Vec<DeleteCall> {
        self.deletes.lock().unwrap().clone()
    }

    pub fn purges(&self) -> Vec<AuditRecord> {
        self.purges.lock().unwrap().clone()
    }

    pub fn errors(&self) -> Vec<ErrorRecord> {
        self.errors.lock().unwrap().clone()
    }

    pub fn connection_problems(&self) -> Vec<ConnectionProblemRecord> {
        self.connection_problems.lock().unwrap().clone()
    }

    fn check_sinks(&self, sink: &'static str) -> Result<()> {
        if self.sinks_down.load(Ordering::SeqCst) {
            return Err(ReconcileError::SinkWrite {
                sink,
                detail: "support schema is read-only".to_string(),
            });
        }
        Ok(())
    }
}

/// SQL LIKE with `%`, `_` and backslash escapes.
fn like(pattern: &str, value: &str) -> bool {
    fn go(p: &[char], v: &[char]) -> bool {
        match p.split_first() {
            None => v.is_empty(),
            Some(('%', rest)) => (0..=v.len()).any(|i| go(rest, &v[i..])),
            Some(('_', rest)) => !v.is_empty() && go(rest, &v[1..]),
            Some(('\\', rest)) => match rest.split_first() {
                Some((c, rest)) => v.first() == Some(c) && go(rest, &v[1..]),
                None => false,
            },
            Some((c, rest)) => v.first() == Some(c) && go(rest, &v[1..]),
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let v: Vec<char> = value.chars().collect();
    go(&p, &v)
}

#[async_trait]
impl CentralStore for FakeCentral {
    async fn list_tables(&self, patterns: &[String]) -> Result<Vec<String>> {
        if self.catalog_down.load(Ordering::SeqCst) {
            return Err(ReconcileError::CatalogUnavailable("connection refused".to_string()));
        }
        Ok(self
            .tables
            .lock()
            .unwrap()
            .keys()
            .filter(|name| patterns.iter().any(|p| like(p, name)))
            .cloned()
            .collect())
    }

    async fn read_freshness(&self, table: &str) -> Result<FreshnessRow> {
        let tables = self.tables.lock().unwrap();
        let entry = tables.get(table).ok_or_else(|| ReconcileError::ProbeFailed {
            table: table.to_string(),
            detail: "table does not exist".to_string(),
        })?;
        if entry.probe_fails {
            return Err(ReconcileError::ProbeFailed {
                table: table.to_string(),
                detail: "Unknown column 'fecha_busqueda'".to_string(),
            });
        }
        if entry.rows == 0 {
            return Ok(FreshnessRow::default());
        }
        Ok(FreshnessRow {
            measurement: entry.measurement,
            sync_check: entry.sync_check,
        })
    }

    async fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let tables = self.tables.lock().unwrap();
        Ok(column == "fecha" && tables.get(table).is_some_and(|t| t.has_time_column))
    }

    async fn delete_latest(&self, table: &str, order_column: &str, count: u32) -> Result<u64> {
        self.deletes.lock().unwrap().push(DeleteCall {
            table: table.to_string(),
            order_column: order_column.to_string(),
            count,
        });
        let mut tables = self.tables.lock().unwrap();
        let entry = tables.get_mut(table).ok_or_else(|| ReconcileError::PurgeFailed {
            table: table.to_string(),
            detail: "table does not exist".to_string(),
        })?;
        let removed = entry.rows.min(u64::from(count));
        entry.rows -= removed;
        Ok(removed)
    }

    async fn insert_purge_record(&self, record: &AuditRecord) -> Result<u64> {
        self.check_sinks("purge audit")?;
        let mut purges = self.purges.lock().unwrap();
        purges.push(record.clone());
        Ok(purges.len() as u64)
    }

    async fn insert_error_record(&self, record: &ErrorRecord) -> Result<u64> {
        self.check_sinks("error log")?;
        let mut errors = self.errors.lock().unwrap();
        errors.push(record.clone());
        Ok(errors.len() as u64)
    }

    async fn insert_connection_problem(&self, record: &ConnectionProblemRecord) -> Result<u64> {
        self.check_sinks("connection problems")?;
        let mut problems = self.connection_problems.lock().unwrap();
        problems.push(record.clone());
        Ok(problems.len() as u64)
    }
}

/// Plants answering from canned responses. Unknown plants have no profile.
#[derive(Default)]
pub struct FakePlants {
    pub heartbeats: HashMap<(u32, DeviceType), Result<Option<NaiveDateTime>>>,
    pub pings: HashMap<u32, Result<()>>,
    pub hosts: HashMap<u32, String>,
    pub probed: Mutex<Vec<(u32, DeviceType)>>,
}

impl FakePlants {
    pub fn heartbeat(mut self, plant: u32, device: DeviceType, latest: Option<NaiveDateTime>) -> Self {
        self.heartbeats.insert((plant, device), Ok(latest));
        self.hosts.insert(plant, format!("10.0.{}.1", plant));
        self
    }

    pub fn failing(mut self, plant: u32, device: DeviceType, error: ReconcileError) -> Self {
        self.heartbeats.insert((plant, device), Err(error));
        self.hosts.insert(plant, format!("10.0.{}.1", plant));
        self
    }

    pub fn ping(mut self, plant: u32, result: Result<()>) -> Self {
        self.pings.insert(plant, result);
        self.hosts.insert(plant, format!("10.0.{}.1", plant));
        self
    }

    pub fn probed(&self) -> Vec<(u32, DeviceType)> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteSource for FakePlants {
    async fn probe_remote(&self, plant: u32, device: DeviceType) -> Result<RemoteHeartbeat> {
        self.probed.lock().unwrap().push((plant, device));
        match self.heartbeats.get(&(plant, device)) {
            Some(Ok(latest)) => Ok(RemoteHeartbeat {
                plant,
                device,
                latest: *latest,
            }),
            Some(Err(e)) => Err(e.clone()),
            None => Err(ReconcileError::MissingConnectionProfile { plant }),
        }
    }

    async fn ping(&self, plant: u32) -> Result<()> {
        match self.pings.get(&plant) {
            Some(result) => result.clone(),
            None => Err(ReconcileError::MissingConnectionProfile { plant }),
        }
    }

    fn host_of(&self, plant: u32) -> Option<String> {
        self.hosts.get(&plant).cloned()
    }
}

// ABOUTME: Freshness probe for central tables
// ABOUTME: Reads latest measurement and sync-check timestamps and computes lag

use chrono::NaiveDateTime;

use crate::catalog::MonitoredTable;
use crate::error::Result;
use crate::store::CentralStore;

/// Latest timestamps as read from one central table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FreshnessRow {
    pub measurement: Option<NaiveDateTime>,
    pub sync_check: Option<NaiveDateTime>,
}

/// Point-in-time view of a central table's freshness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessSnapshot {
    pub table: MonitoredTable,
    pub latest_measurement: NaiveDateTime,
    pub latest_sync_check: Option<NaiveDateTime>,
    /// Whole minutes between the latest measurement and the probe clock.
    pub lag_minutes: i64,
}

impl FreshnessSnapshot {
    /// Build a snapshot from a raw row. `None` when the table holds no measurements.
    pub fn from_row(table: MonitoredTable, row: FreshnessRow, now: NaiveDateTime) -> Option<Self> {
        let latest_measurement = row.measurement?;
        Some(Self {
            table,
            latest_measurement,
            latest_sync_check: row.sync_check,
            lag_minutes: (now - latest_measurement).num_minutes(),
        })
    }

    /// A table is a stale candidate when its lag strictly exceeds the threshold.
    pub fn is_stale(&self, threshold_minutes: i64) -> bool {
        self.lag_minutes > threshold_minutes
    }
}

pub struct FreshnessProbe<'a, S: CentralStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: CentralStore + ?Sized> FreshnessProbe<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Probe one table against the caller's clock reading.
    pub async fn probe(
        &self,
        table: &MonitoredTable,
        now: NaiveDateTime,
    ) -> Result<Option<FreshnessSnapshot>> {
        let row = self.store.read_freshness(&table.name).await?;
        let snapshot = FreshnessSnapshot::from_row(table.clone(), row, now);
        match &snapshot {
            Some(s) => tracing::debug!(
                table = %table.name,
                latest = %s.latest_measurement,
                sync_check = ?s.latest_sync_check,
                lag_minutes = s.lag_minutes,
                "probed table freshness"
            ),
            None => tracing::debug!(table = %table.name, "table has no measurements"),
        }
        Ok(snapshot)
    }
}

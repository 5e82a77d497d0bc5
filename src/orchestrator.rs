// ABOUTME: Reconciliation pass orchestration and the continuous run loop
// ABOUTME: Discover, probe, heartbeat, decide, act and record for every stale table

use chrono::NaiveDateTime;
use futures::stream::{self, StreamExt};
use std::time::{Duration, Instant};
use tokio::time::interval;

use crate::audit::{AuditTrail, SyncLog};
use crate::catalog::{DeviceType, TableDiscovery};
use crate::config::{ColumnNames, ReconcileConfig};
use crate::decision::{decide, outage_verdict, SkipReason, Verdict};
use crate::error::{ReconcileError, Result};
use crate::freshness::{FreshnessProbe, FreshnessSnapshot};
use crate::lock::RunLock;
use crate::purge::PurgeExecutor;
use crate::remote::RemoteSource;
use crate::store::CentralStore;
use crate::utils::{plant_key, validate_table_name};

/// What happened to one stale candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableOutcome {
    Purged {
        table: String,
        rows: u64,
        cutoff: NaiveDateTime,
    },
    /// Dry run: the purge that would have happened.
    WouldPurge {
        table: String,
        cutoff: NaiveDateTime,
    },
    Skipped {
        table: String,
        reason: SkipReason,
    },
    /// An outage or a failed action was written to the error sink.
    Flagged {
        table: String,
        plant: String,
        detail: String,
    },
    /// The table name does not map to a plant and device type.
    Unroutable { table: String },
    /// A durable sink write failed; the pass reports it after all tables ran.
    SinkFailed { table: String, error: ReconcileError },
}

/// Counters for one reconciliation pass.
#[derive(Debug, Clone, Default)]
pub struct PassSummary {
    pub tables_discovered: usize,
    pub empty_tables: usize,
    pub stale_tables: usize,
    pub purged: usize,
    pub would_purge: usize,
    pub rows_deleted: u64,
    pub skipped: usize,
    pub flagged: usize,
    pub unroutable: usize,
    pub probe_failures: usize,
    pub sink_failures: Vec<ReconcileError>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}

impl PassSummary {
    /// No probe failure, outage or sink failure during the pass.
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.sink_failures.is_empty()
    }

    fn add(&mut self, outcome: TableOutcome) {
        match outcome {
            TableOutcome::Purged { rows, .. } => {
                self.purged += 1;
                self.rows_deleted += rows;
            }
            TableOutcome::WouldPurge { .. } => self.would_purge += 1,
            TableOutcome::Skipped { .. } => self.skipped += 1,
            TableOutcome::Flagged { table, detail, .. } => {
                self.flagged += 1;
                self.errors.push(format!("{}: {}", table, detail));
            }
            TableOutcome::Unroutable { .. } => self.unroutable += 1,
            TableOutcome::SinkFailed { table, error } => {
                self.errors.push(format!("{}: {}", table, error));
                self.sink_failures.push(error);
            }
        }
    }
}

/// Freshness of one discovered table, as shown by `status`.
#[derive(Debug, Clone)]
pub struct TableStatus {
    pub table: String,
    pub snapshot: Option<FreshnessSnapshot>,
    pub stale: bool,
    pub error: Option<String>,
}

/// Runs reconciliation passes against one central store and the plants behind it.
pub struct Reconciler<'a, C: CentralStore + ?Sized, R: RemoteSource + ?Sized> {
    central: &'a C,
    remote: &'a R,
    config: &'a ReconcileConfig,
    columns: &'a ColumnNames,
    log: &'a SyncLog,
}

impl<'a, C: CentralStore + ?Sized, R: RemoteSource + ?Sized> Reconciler<'a, C, R> {
    pub fn new(
        central: &'a C,
        remote: &'a R,
        config: &'a ReconcileConfig,
        columns: &'a ColumnNames,
        log: &'a SyncLog,
    ) -> Self {
        Self {
            central,
            remote,
            config,
            columns,
            log,
        }
    }

    /// Run one pass using the process clock.
    pub async fn run_pass(&self) -> Result<PassSummary> {
        self.run_pass_at(chrono::Local::now().naive_local()).await
    }

    /// Run one pass with `now` as the single clock reading for lag and heartbeat age.
    ///
    /// Only a catalog failure, a held run lock or a sink failure is returned as an
    /// error. Every other failure is scoped to its table and shows up in the summary.
    pub async fn run_pass_at(&self, now: NaiveDateTime) -> Result<PassSummary> {
        let start = Instant::now();
        let _lock = match &self.config.lock_file {
            Some(path) => Some(RunLock::acquire(path)?),
            None => None,
        };

        let mut summary = PassSummary::default();
        let stale = self.stale_candidates(now, &mut summary).await?;
        summary.stale_tables = stale.len();

        tracing::info!(
            "Reconciling {} stale of {} discovered tables (threshold {} min{})",
            stale.len(),
            summary.tables_discovered,
            self.config.threshold_minutes,
            if self.config.dry_run { ", dry run" } else { "" }
        );

        let outcomes: Vec<TableOutcome> = stream::iter(stale)
            .map(|snapshot| self.reconcile_table(snapshot, now))
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;
        for outcome in outcomes {
            summary.add(outcome);
        }

        summary.duration_ms = start.elapsed().as_millis() as u64;
        log_summary(&summary);

        match summary.sink_failures.first() {
            Some(error) => Err(error.clone()),
            None => Ok(summary),
        }
    }

    /// Freshness of every discovered table. Plants are not contacted.
    pub async fn status_at(&self, now: NaiveDateTime) -> Result<Vec<TableStatus>> {
        let tables = self.discovery().list_monitored_tables().await?;
        let probe = FreshnessProbe::new(self.central);

        let mut statuses = Vec::with_capacity(tables.len());
        for table in tables {
            let status = match probe.probe(&table, now).await {
                Ok(snapshot) => TableStatus {
                    table: table.name,
                    stale: snapshot
                        .as_ref()
                        .is_some_and(|s| s.is_stale(self.config.threshold_minutes)),
                    snapshot,
                    error: None,
                },
                Err(e) => TableStatus {
                    table: table.name,
                    snapshot: None,
                    stale: false,
                    error: Some(e.to_string()),
                },
            };
            statuses.push(status);
        }
        Ok(statuses)
    }

    /// Run passes every `every` until the shutdown channel fires.
    ///
    /// A pass already in flight is allowed to finish so that every purge keeps
    /// its audit row. Failed passes are logged and the loop continues.
    pub async fn run(
        &self,
        every: Duration,
        mut shutdown: tokio::sync::broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut ticker = interval(every);
        let mut passes = 0u64;

        tracing::info!("Starting reconciliation loop with interval={:?}", every);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping reconciliation loop");
                    break;
                }
                _ = ticker.tick() => {
                    passes += 1;
                    tracing::info!("Starting reconciliation pass {}", passes);
                    match self.run_pass().await {
                        Ok(summary) if summary.is_success() => {
                            tracing::info!("Pass {} completed in {}ms", passes, summary.duration_ms);
                        }
                        Ok(summary) => {
                            tracing::warn!(
                                "Pass {} completed with {} errors",
                                passes,
                                summary.errors.len()
                            );
                        }
                        Err(e) => tracing::error!("Pass {} failed: {}", passes, e),
                    }
                }
            }
        }

        Ok(())
    }

    fn discovery(&self) -> TableDiscovery<'a, C> {
        TableDiscovery::new(
            self.central,
            self.config.patterns.clone(),
            &self.config.excluded_tables,
        )
    }

    async fn stale_candidates(
        &self,
        now: NaiveDateTime,
        summary: &mut PassSummary,
    ) -> Result<Vec<FreshnessSnapshot>> {
        let tables = self.discovery().list_monitored_tables().await?;
        summary.tables_discovered = tables.len();

        let probe = FreshnessProbe::new(self.central);
        let mut stale = Vec::new();
        for table in &tables {
            match probe.probe(table, now).await {
                Ok(Some(snapshot)) if snapshot.is_stale(self.config.threshold_minutes) => {
                    stale.push(snapshot)
                }
                Ok(Some(_)) => {}
                Ok(None) => summary.empty_tables += 1,
                Err(e) => {
                    tracing::warn!("Skipping {}: {}", table.name, e);
                    summary.probe_failures += 1;
                    summary.errors.push(e.to_string());
                }
            }
        }
        Ok(stale)
    }

    async fn reconcile_table(&self, snapshot: FreshnessSnapshot, now: NaiveDateTime) -> TableOutcome {
        let table = snapshot.table.name.clone();
        let Some((device, plant)) = snapshot.table.route() else {
            tracing::warn!(
                "{} is stale by {} min but its name does not identify a plant and device type; check the table patterns",
                table,
                snapshot.lag_minutes
            );
            return TableOutcome::Unroutable { table };
        };

        let verdict = match self.remote.probe_remote(plant, device).await {
            Ok(heartbeat) => decide(&snapshot, heartbeat.latest, now),
            Err(e) => outage_verdict(plant, &e),
        };
        tracing::debug!("{}: {:?}", table, verdict);

        match verdict {
            Verdict::Skip(reason) => {
                tracing::info!(
                    "Skipping {} (lag {} min): {}",
                    table,
                    snapshot.lag_minutes,
                    reason.as_str()
                );
                TableOutcome::Skipped { table, reason }
            }
            Verdict::FlagOutage { plant, detail } => {
                tracing::warn!("{}: outage at {}: {}", table, plant, detail);
                self.flag(table, plant, device, detail).await
            }
            Verdict::PurgeAndRearm { table, cutoff } => {
                self.purge_and_rearm(table, plant, device, cutoff, now).await
            }
        }
    }

    async fn purge_and_rearm(
        &self,
        table: String,
        plant: u32,
        device: DeviceType,
        cutoff: NaiveDateTime,
        now: NaiveDateTime,
    ) -> TableOutcome {
        // A name the real run would refuse is flagged in a dry run too.
        if let Err(e) = validate_table_name(&table) {
            tracing::error!("{}", e);
            return self.flag(table, plant_key(plant), device, e.to_string()).await;
        }

        if self.config.dry_run {
            tracing::info!(
                "[dry run] Would delete the latest {} rows of {} (cutoff {})",
                self.config.purge_batch,
                table,
                cutoff
            );
            return TableOutcome::WouldPurge { table, cutoff };
        }

        let executor = PurgeExecutor::new(
            self.central,
            &self.columns.order_time,
            &self.columns.order_fallback,
        );
        let rows = match executor.purge_latest(&table, self.config.purge_batch).await {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("{}", e);
                return self.flag(table, plant_key(plant), device, e.to_string()).await;
            }
        };

        match self.trail().record_purge(now, &table, cutoff).await {
            Ok(_) => {
                tracing::info!("Purged {} rows of {} (cutoff {})", rows, table, cutoff);
                TableOutcome::Purged {
                    table,
                    rows,
                    cutoff,
                }
            }
            Err(error) => TableOutcome::SinkFailed { table, error },
        }
    }

    async fn flag(
        &self,
        table: String,
        plant: String,
        device: DeviceType,
        detail: String,
    ) -> TableOutcome {
        match self.trail().record_error(&plant, device.as_str(), &detail).await {
            Ok(_) => TableOutcome::Flagged {
                table,
                plant,
                detail,
            },
            Err(error) => TableOutcome::SinkFailed { table, error },
        }
    }

    fn trail(&self) -> AuditTrail<'a, C> {
        AuditTrail::new(self.central, self.log)
    }
}

fn log_summary(summary: &PassSummary) {
    tracing::info!(
        "Pass summary: {} tables, {} stale, {} purged ({} rows), {} skipped, {} flagged, {} unroutable, {} probe failures in {}ms",
        summary.tables_discovered,
        summary.stale_tables,
        summary.purged,
        summary.rows_deleted,
        summary.skipped,
        summary.flagged,
        summary.unroutable,
        summary.probe_failures,
        summary.duration_ms
    );
    if summary.would_purge > 0 {
        tracing::info!("Dry run: {} tables would have been purged", summary.would_purge);
    }
    if !summary.sink_failures.is_empty() {
        tracing::error!(
            "{} durable sink writes failed during the pass",
            summary.sink_failures.len()
        );
    }
}

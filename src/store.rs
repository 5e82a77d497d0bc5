// ABOUTME: Central store access for discovery, probing, purging and audit writes
// ABOUTME: CentralStore trait plus the MySQL implementation backed by a connection pool

use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Pool, Value};
use std::time::Duration;

use crate::audit::{AuditRecord, ConnectionProblemRecord, ErrorRecord};
use crate::config::{CentralConfig, ColumnNames, SinkTables};
use crate::error::{ReconcileError, Result};
use crate::freshness::FreshnessRow;
use crate::utils::{
    format_db_timestamp, parse_db_timestamp, quote_mysql_ident, retry_with_backoff,
    validate_table_name,
};

/// Everything a reconciliation pass needs from the central aggregation store.
///
/// Implementations must be safe to share across concurrently processed tables.
#[async_trait]
pub trait CentralStore: Send + Sync {
    /// Table names matching any of the LIKE patterns. Fails with `CatalogUnavailable`.
    async fn list_tables(&self, patterns: &[String]) -> Result<Vec<String>>;

    /// Latest measurement and sync-check timestamps of one table.
    async fn read_freshness(&self, table: &str) -> Result<FreshnessRow>;

    async fn has_column(&self, table: &str, column: &str) -> Result<bool>;

    /// Delete the `count` newest rows ordered by `order_column` descending.
    /// Returns the number of rows actually removed.
    async fn delete_latest(&self, table: &str, order_column: &str, count: u32) -> Result<u64>;

    async fn insert_purge_record(&self, record: &AuditRecord) -> Result<u64>;

    async fn insert_error_record(&self, record: &ErrorRecord) -> Result<u64>;

    async fn insert_connection_problem(&self, record: &ConnectionProblemRecord) -> Result<u64>;
}

/// MySQL-backed central store.
///
/// Discovery, probing and purges share the pool for the whole pass; every sink
/// write checks out its own connection, commits and returns it.
pub struct MysqlCentralStore {
    pool: Pool,
    database: String,
    support_database: String,
    columns: ColumnNames,
    sinks: SinkTables,
}

pub(crate) fn mysql_opts(host: &str, port: u16, user: &str, password: &str, db: &str) -> Opts {
    OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(port)
        .user(Some(user))
        .pass(Some(password))
        .db_name(Some(db))
        .into()
}

impl MysqlCentralStore {
    /// Build the pool and make sure the central store answers, retrying with backoff.
    pub async fn connect(
        config: &CentralConfig,
        columns: ColumnNames,
        sinks: SinkTables,
    ) -> Result<Self> {
        let opts = mysql_opts(
            &config.host,
            config.port,
            &config.user,
            &config.password,
            &config.database,
        );
        let pool = Pool::new(opts);

        retry_with_backoff(
            || async {
                let mut conn = pool.get_conn().await?;
                conn.ping().await?;
                Ok::<(), anyhow::Error>(())
            },
            3,
            Duration::from_secs(1),
        )
        .await
        .map_err(|e| {
            ReconcileError::CatalogUnavailable(format!(
                "{} (host={}:{}, db={})",
                e, config.host, config.port, config.database
            ))
        })?;

        tracing::info!(
            "Connected to central store {}:{}/{}",
            config.host,
            config.port,
            config.database
        );

        Ok(Self {
            pool,
            database: config.database.clone(),
            support_database: config.support_database.clone(),
            columns,
            sinks,
        })
    }

    /// Close every pooled connection.
    pub async fn disconnect(self) {
        if let Err(e) = self.pool.disconnect().await {
            tracing::debug!("Error while closing central pool: {}", e);
        }
    }

    async fn conn(&self) -> std::result::Result<Conn, mysql_async::Error> {
        self.pool.get_conn().await
    }

    fn support_table(&self, table: &str) -> String {
        format!(
            "{}.{}",
            quote_mysql_ident(&self.support_database),
            quote_mysql_ident(table)
        )
    }

    async fn insert_returning_id(
        &self,
        sink: &'static str,
        table: &str,
        columns: &str,
        params: Vec<Value>,
    ) -> Result<u64> {
        let sink_err = |e: mysql_async::Error| ReconcileError::SinkWrite {
            sink,
            detail: e.to_string(),
        };
        let placeholders = vec!["?"; params.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.support_table(table),
            columns,
            placeholders
        );

        let mut conn = self.conn().await.map_err(sink_err)?;
        conn.exec_drop(sql, params).await.map_err(sink_err)?;
        Ok(conn.last_insert_id().unwrap_or_default())
    }
}

#[async_trait]
impl CentralStore for MysqlCentralStore {
    async fn list_tables(&self, patterns: &[String]) -> Result<Vec<String>> {
        if patterns.is_empty() {
            return Ok(Vec::new());
        }
        let like_clauses = vec!["TABLE_NAME LIKE ?"; patterns.len()].join(" OR ");
        let sql = format!(
            "SELECT TABLE_NAME FROM information_schema.tables \
             WHERE TABLE_SCHEMA = ? AND ({}) ORDER BY TABLE_NAME",
            like_clauses
        );
        let mut params: Vec<Value> = vec![self.database.as_str().into()];
        params.extend(patterns.iter().map(|p| Value::from(p.as_str())));

        let catalog_err = |e: mysql_async::Error| ReconcileError::CatalogUnavailable(e.to_string());
        let mut conn = self.conn().await.map_err(catalog_err)?;
        let names: Vec<String> = conn.exec(sql, params).await.map_err(catalog_err)?;
        Ok(names)
    }

    async fn read_freshness(&self, table: &str) -> Result<FreshnessRow> {
        validate_table_name(table)?;
        let sql = format!(
            "SELECT DATE_FORMAT(MAX({m}), '%Y-%m-%d %H:%i:%s'), \
                    DATE_FORMAT(MAX({s}), '%Y-%m-%d %H:%i:%s') \
             FROM {t}",
            m = quote_mysql_ident(&self.columns.measurement),
            s = quote_mysql_ident(&self.columns.sync_check),
            t = quote_mysql_ident(table),
        );
        let probe_err = |e: mysql_async::Error| ReconcileError::ProbeFailed {
            table: table.to_string(),
            detail: e.to_string(),
        };

        let mut conn = self.conn().await.map_err(probe_err)?;
        let row: Option<(Option<String>, Option<String>)> =
            conn.query_first(sql).await.map_err(probe_err)?;
        let (measurement, sync_check) = row.unwrap_or_default();

        Ok(FreshnessRow {
            measurement: measurement.as_deref().and_then(parse_db_timestamp),
            sync_check: sync_check.as_deref().and_then(parse_db_timestamp),
        })
    }

    async fn has_column(&self, table: &str, column: &str) -> Result<bool> {
        let purge_err = |e: mysql_async::Error| ReconcileError::PurgeFailed {
            table: table.to_string(),
            detail: e.to_string(),
        };
        let mut conn = self.conn().await.map_err(purge_err)?;
        let count: Option<i64> = conn
            .exec_first(
                "SELECT COUNT(*) FROM information_schema.columns \
                 WHERE table_schema = DATABASE() AND table_name = ? AND column_name = ?",
                (table, column),
            )
            .await
            .map_err(purge_err)?;
        Ok(count.unwrap_or(0) > 0)
    }

    async fn delete_latest(&self, table: &str, order_column: &str, count: u32) -> Result<u64> {
        validate_table_name(table)?;
        // MySQL accepts ORDER BY ... LIMIT on single-table DELETE.
        let sql = format!(
            "DELETE FROM {} ORDER BY {} DESC LIMIT ?",
            quote_mysql_ident(table),
            quote_mysql_ident(order_column)
        );
        let purge_err = |e: mysql_async::Error| ReconcileError::PurgeFailed {
            table: table.to_string(),
            detail: e.to_string(),
        };

        let mut conn = self.conn().await.map_err(purge_err)?;
        conn.exec_drop(sql, vec![Value::from(count)]).await.map_err(purge_err)?;
        Ok(conn.affected_rows())
    }

    async fn insert_purge_record(&self, record: &AuditRecord) -> Result<u64> {
        self.insert_returning_id(
            "purge audit",
            &self.sinks.purges,
            "fecha, tabla, hora_detencion",
            vec![
                format_db_timestamp(&record.at).into(),
                record.table.as_str().into(),
                format_db_timestamp(&record.cutoff).into(),
            ],
        )
        .await
    }

    async fn insert_error_record(&self, record: &ErrorRecord) -> Result<u64> {
        self.insert_returning_id(
            "error log",
            &self.sinks.errors,
            "planta, tipo, error",
            vec![
                record.plant.as_str().into(),
                record.device_type.as_str().into(),
                record.detail.as_str().into(),
            ],
        )
        .await
    }

    async fn insert_connection_problem(&self, record: &ConnectionProblemRecord) -> Result<u64> {
        self.insert_returning_id(
            "connection problems",
            &self.sinks.connection_problems,
            "fecha, planta, problema",
            vec![
                format_db_timestamp(&record.at).into(),
                record.plant.as_str().into(),
                record.detail.as_str().into(),
            ],
        )
        .await
    }
}

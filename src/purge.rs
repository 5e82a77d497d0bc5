// ABOUTME: Purge executor for the stale tail of central tables
// ABOUTME: Deletes the newest N rows so the sync channel refetches them

use crate::error::Result;
use crate::store::CentralStore;
use crate::utils::validate_table_name;

pub const DEFAULT_PURGE_BATCH: u32 = 30;

/// Removes the most recent rows of a central table.
///
/// Rows are ordered by the time column when the table has one, otherwise by
/// the auto-increment surrogate key. Each call is a real mutation: callers must
/// recheck their verdict before calling again.
pub struct PurgeExecutor<'a, S: CentralStore + ?Sized> {
    store: &'a S,
    time_column: &'a str,
    fallback_column: &'a str,
}

impl<'a, S: CentralStore + ?Sized> PurgeExecutor<'a, S> {
    pub fn new(store: &'a S, time_column: &'a str, fallback_column: &'a str) -> Self {
        Self {
            store,
            time_column,
            fallback_column,
        }
    }

    /// Delete up to `count` newest rows of `table` and return how many went.
    ///
    /// The name is validated before any statement is built; a name with any
    /// character outside `[A-Za-z0-9_]` fails with `InvalidTableName`.
    pub async fn purge_latest(&self, table: &str, count: u32) -> Result<u64> {
        validate_table_name(table)?;
        if count == 0 {
            return Ok(0);
        }

        let order_column = if self.store.has_column(table, self.time_column).await? {
            self.time_column
        } else {
            self.fallback_column
        };

        tracing::info!(
            "Deleting the latest {} rows of {} (ordered by {})",
            count,
            table,
            order_column
        );
        let removed = self.store.delete_latest(table, order_column, count).await?;
        if removed < u64::from(count) {
            tracing::info!(
                "Removed {} of {} requested rows from {}",
                removed,
                count,
                table
            );
        }
        Ok(removed)
    }
}

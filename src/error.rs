// ABOUTME: Error taxonomy for reconciliation passes
// ABOUTME: Separates pass-fatal failures from per-table failures that get recorded

use thiserror::Error;

/// Errors produced by the reconciliation engine.
///
/// Only catalog, sink and run-lock failures end a pass. Everything else is scoped to one
/// table and is turned into an error record by the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    #[error("central catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("freshness probe failed for {table}: {detail}")]
    ProbeFailed { table: String, detail: String },

    #[error("no connection profile configured for plant {plant}")]
    MissingConnectionProfile { plant: u32 },

    #[error("cannot connect to plant {plant}: {detail}")]
    RemoteConnectFailed { plant: u32, detail: String },

    #[error("query against plant {plant} failed: {detail}")]
    RemoteQueryFailed { plant: u32, detail: String },

    #[error("refusing to operate on invalid table name {0:?}")]
    InvalidTableName(String),

    #[error("purge of {table} failed: {detail}")]
    PurgeFailed { table: String, detail: String },

    #[error("durable write to {sink} failed: {detail}")]
    SinkWrite { sink: &'static str, detail: String },

    #[error("another reconciliation pass is running (pid {0})")]
    AlreadyRunning(i32),

    #[error("run lock unavailable: {0}")]
    LockUnavailable(String),
}

impl ReconcileError {
    /// Whether this error must end the whole pass instead of a single table.
    pub fn is_pass_fatal(&self) -> bool {
        matches!(
            self,
            ReconcileError::CatalogUnavailable(_)
                | ReconcileError::SinkWrite { .. }
                | ReconcileError::AlreadyRunning(_)
                | ReconcileError::LockUnavailable(_)
        )
    }
}

pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_fatal_classification() {
        assert!(ReconcileError::CatalogUnavailable("down".into()).is_pass_fatal());
        assert!(ReconcileError::SinkWrite {
            sink: "error_sincronizacion",
            detail: "x".into()
        }
        .is_pass_fatal());
        assert!(ReconcileError::LockUnavailable("read-only fs".into()).is_pass_fatal());
        assert!(!ReconcileError::MissingConnectionProfile { plant: 61 }.is_pass_fatal());
        assert!(!ReconcileError::InvalidTableName("a;b".into()).is_pass_fatal());
    }

    #[test]
    fn test_remote_error_mentions_cause() {
        let err = ReconcileError::RemoteConnectFailed {
            plant: 61,
            detail: "connection timed out after 6s".into(),
        };
        assert!(err.to_string().contains("timed out"));
        assert!(err.to_string().contains("61"));
    }
}

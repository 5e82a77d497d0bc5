// ABOUTME: Reconciliation decision for stale central tables
// ABOUTME: Tells a genuine plant outage apart from a stalled sync channel

use chrono::{Duration, NaiveDateTime};

use crate::error::ReconcileError;
use crate::freshness::FreshnessSnapshot;
use crate::utils::plant_key;

/// A plant heartbeat is fresh when it is younger than this many seconds.
pub const REMOTE_FRESHNESS_WINDOW_SECS: i64 = 300;

/// Why a stale candidate is left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The plant reported no measurements at all.
    RemoteEmpty,
    /// The plant itself stopped producing data; central mirrors it correctly.
    RemoteStale,
    /// No sync check recorded yet: the table is still in its initial sync.
    InitialSync,
    /// The last sync check predates the plant's last row; the next cycle may catch up.
    AwaitingSync,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::RemoteEmpty => "remote has no data",
            SkipReason::RemoteStale => "remote is stale too",
            SkipReason::InitialSync => "initial sync in progress",
            SkipReason::AwaitingSync => "awaiting next sync cycle",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Skip(SkipReason),
    /// Drop the newest central rows so the sync channel refetches them.
    PurgeAndRearm {
        table: String,
        cutoff: NaiveDateTime,
    },
    /// The plant could not be asked; record an outage.
    FlagOutage {
        plant: String,
        detail: String,
    },
}

/// Decide what to do with a stale candidate given the plant's latest timestamp.
///
/// The order of checks matters: a stale or silent plant always wins over any
/// sync-check inspection, and only a sync check strictly later than the plant's
/// last row justifies a purge.
pub fn decide(
    snapshot: &FreshnessSnapshot,
    remote_latest: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Verdict {
    let Some(remote_latest) = remote_latest else {
        return Verdict::Skip(SkipReason::RemoteEmpty);
    };

    if now - remote_latest >= Duration::seconds(REMOTE_FRESHNESS_WINDOW_SECS) {
        return Verdict::Skip(SkipReason::RemoteStale);
    }

    match snapshot.latest_sync_check {
        None => Verdict::Skip(SkipReason::InitialSync),
        Some(sync_check) if sync_check > remote_latest => Verdict::PurgeAndRearm {
            table: snapshot.table.name.clone(),
            cutoff: remote_latest,
        },
        Some(_) => Verdict::Skip(SkipReason::AwaitingSync),
    }
}

/// Verdict for a plant whose heartbeat could not be obtained.
pub fn outage_verdict(plant: u32, error: &ReconcileError) -> Verdict {
    Verdict::FlagOutage {
        plant: plant_key(plant),
        detail: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MonitoredTable;
    use crate::freshness::FreshnessRow;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap()
    }

    fn snapshot(name: &str, lag_min: i64, sync_check: Option<NaiveDateTime>) -> FreshnessSnapshot {
        FreshnessSnapshot::from_row(
            MonitoredTable::new(name),
            FreshnessRow {
                measurement: Some(now() - Duration::minutes(lag_min)),
                sync_check,
            },
            now(),
        )
        .unwrap()
    }

    #[test]
    fn test_stale_remote_always_skips() {
        // Even with a sync check that would otherwise trigger a purge.
        for remote_age in [5, 6, 20, 600] {
            let snap = snapshot("pesometro_41", 4, Some(now() - Duration::seconds(1)));
            let verdict = decide(&snap, Some(now() - Duration::minutes(remote_age)), now());
            assert_eq!(verdict, Verdict::Skip(SkipReason::RemoteStale), "age {remote_age}");
        }
    }

    #[test]
    fn test_empty_remote_skips() {
        let snap = snapshot("plc_31", 10, Some(now()));
        assert_eq!(
            decide(&snap, None, now()),
            Verdict::Skip(SkipReason::RemoteEmpty)
        );
    }

    #[test]
    fn test_window_boundary_is_exclusive() {
        let snap = snapshot("plc_31", 10, Some(now()));
        let just_inside = now() - Duration::seconds(REMOTE_FRESHNESS_WINDOW_SECS - 1);
        assert!(matches!(
            decide(&snap, Some(just_inside), now()),
            Verdict::PurgeAndRearm { .. }
        ));
        let at_boundary = now() - Duration::seconds(REMOTE_FRESHNESS_WINDOW_SECS);
        assert_eq!(
            decide(&snap, Some(at_boundary), now()),
            Verdict::Skip(SkipReason::RemoteStale)
        );
    }

    #[test]
    fn test_fresh_remote_without_sync_check_skips() {
        let snap = snapshot("plc_31", 10, None);
        assert_eq!(
            decide(&snap, Some(now() - Duration::minutes(1)), now()),
            Verdict::Skip(SkipReason::InitialSync)
        );
    }

    #[test]
    fn test_sync_check_after_remote_purges() {
        let remote = now() - Duration::minutes(1);
        let snap = snapshot("plc_31", 10, Some(now() - Duration::seconds(30)));
        assert_eq!(
            decide(&snap, Some(remote), now()),
            Verdict::PurgeAndRearm {
                table: "plc_31".to_string(),
                cutoff: remote,
            }
        );
    }

    #[test]
    fn test_sync_check_equal_or_before_remote_skips() {
        let remote = now() - Duration::minutes(1);
        let equal = snapshot("plc_31", 10, Some(remote));
        assert_eq!(
            decide(&equal, Some(remote), now()),
            Verdict::Skip(SkipReason::AwaitingSync)
        );
        let before = snapshot("plc_31", 10, Some(remote - Duration::seconds(1)));
        assert_eq!(
            decide(&before, Some(remote), now()),
            Verdict::Skip(SkipReason::AwaitingSync)
        );
    }

    #[test]
    fn test_outage_verdict_uses_plant_key() {
        let err = ReconcileError::RemoteConnectFailed {
            plant: 61,
            detail: "connection timed out after 6s".into(),
        };
        match outage_verdict(61, &err) {
            Verdict::FlagOutage { plant, detail } => {
                assert_eq!(plant, "HOST_61");
                assert!(detail.contains("timed out"));
            }
            other => panic!("unexpected verdict {other:?}"),
        }
    }
}

// ABOUTME: Utility functions for identifiers, timestamps and retries
// ABOUTME: Shared by the catalog, purge, sink and remote probe code

use anyhow::Result;
use chrono::NaiveDateTime;
use std::time::Duration;

use crate::error::ReconcileError;

/// Timestamp layout used by the central and plant databases and by the log file.
pub const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Validate a table name before it is interpolated into a statement
///
/// Only ASCII letters, digits and underscores are accepted. Any other character,
/// including whitespace, quotes and backticks, rejects the name.
///
/// # Examples
///
/// ```
/// use plant_sync_reconciler::utils::validate_table_name;
/// assert!(validate_table_name("plc_31").is_ok());
/// assert!(validate_table_name("horometro61").is_ok());
/// assert!(validate_table_name("plc_31; DROP TABLE x").is_err());
/// assert!(validate_table_name("").is_err());
/// ```
pub fn validate_table_name(name: &str) -> Result<(), ReconcileError> {
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(ReconcileError::InvalidTableName(sanitize_identifier(name)));
    }
    Ok(())
}

/// Sanitize an identifier for display
///
/// Removes control characters and limits length so a hostile table name
/// cannot forge log lines.
///
/// # Examples
///
/// ```
/// # use plant_sync_reconciler::utils::sanitize_identifier;
/// assert_eq!(sanitize_identifier("plc_31"), "plc_31");
/// assert_eq!(sanitize_identifier("plc\n31"), "plc31");
/// ```
pub fn sanitize_identifier(identifier: &str) -> String {
    identifier
        .chars()
        .filter(|c| !c.is_control())
        .take(100)
        .collect()
}

/// Quote a MySQL identifier (database, table, column)
///
/// MySQL uses backticks for identifier quoting. Escapes embedded backticks
/// by doubling them.
///
/// # Examples
///
/// ```
/// use plant_sync_reconciler::utils::quote_mysql_ident;
/// assert_eq!(quote_mysql_ident("plc_31"), "`plc_31`");
/// assert_eq!(quote_mysql_ident("user`name"), "`user``name`");
/// ```
pub fn quote_mysql_ident(identifier: &str) -> String {
    let mut quoted = String::with_capacity(identifier.len() + 2);
    quoted.push('`');
    for ch in identifier.chars() {
        if ch == '`' {
            quoted.push('`');
        }
        quoted.push(ch);
    }
    quoted.push('`');
    quoted
}

/// Truncate a value to at most `max_chars` characters.
///
/// Widths match VARCHAR column limits, which count characters, not bytes.
///
/// ```
/// # use plant_sync_reconciler::utils::truncate_chars;
/// assert_eq!(truncate_chars("horometro_61_extra", 10), "horometro_");
/// assert_eq!(truncate_chars("plc", 10), "plc");
/// assert_eq!(truncate_chars("ñandú", 3), "ñan");
/// ```
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

/// Key used to identify a plant in error and connection-problem records.
///
/// Mirrors the environment variable that carries the plant's host.
pub fn plant_key(plant: u32) -> String {
    format!("HOST_{}", plant)
}

pub fn format_db_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(DB_TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp rendered by `DATE_FORMAT(..., '%Y-%m-%d %H:%i:%s')`.
pub fn parse_db_timestamp(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value.trim(), DB_TIMESTAMP_FORMAT).ok()
}

/// Retry an async operation with exponential backoff
///
/// Retries up to `max_retries` times after the first attempt, doubling the
/// delay between attempts. Returns the last error once retries are exhausted.
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    max_retries: u32,
    initial_delay: Duration,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut delay = initial_delay;
    let mut last_error = None;

    for attempt in 0..=max_retries {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                last_error = Some(e);

                if attempt < max_retries {
                    tracing::warn!(
                        "Operation failed (attempt {}/{}), retrying in {:?}...",
                        attempt + 1,
                        max_retries + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Operation failed after retries")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_validate_table_name_rejects_injection() {
        for bad in ["plc_31`", "plc 31", "plc-31", "plc_31;", "pl'c", "tabla\n"] {
            assert!(
                matches!(
                    validate_table_name(bad),
                    Err(ReconcileError::InvalidTableName(_))
                ),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_table_name_accepts_monitored_names() {
        for good in ["plc_31", "horometro_61", "pesometro41", "PLC_82", "_x9"] {
            assert!(validate_table_name(good).is_ok(), "{good:?} should pass");
        }
    }

    #[test]
    fn test_truncate_chars_widths() {
        let detail = "e".repeat(1500);
        assert_eq!(truncate_chars(&detail, 1000).chars().count(), 1000);
        assert_eq!(truncate_chars("short", 1000), "short");
        assert_eq!(truncate_chars("", 10), "");
    }

    #[test]
    fn test_timestamp_round_trip_format() {
        let ts = parse_db_timestamp("2025-03-04 05:06:07").unwrap();
        assert_eq!(format_db_timestamp(&ts), "2025-03-04 05:06:07");
        assert!(parse_db_timestamp("not a date").is_none());
    }

    #[test]
    fn test_plant_key() {
        assert_eq!(plant_key(61), "HOST_61");
    }

    #[tokio::test]
    async fn test_retry_with_backoff_eventually_succeeds() {
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(
            || async {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    anyhow::bail!("not yet");
                }
                Ok(7)
            },
            3,
            Duration::from_millis(1),
        )
        .await
        .unwrap();
        assert_eq!(result, 7);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_returns_last_error() {
        let result: Result<()> =
            retry_with_backoff(|| async { anyhow::bail!("down") }, 1, Duration::from_millis(1))
                .await;
        assert_eq!(result.unwrap_err().to_string(), "down");
    }
}

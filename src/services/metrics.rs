//! Local SQLite log of `/query_llm` calls.

use std::path::Path;

use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};

use crate::models::{Mode, Provider};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS request_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    provider TEXT NOT NULL,
    mode TEXT NOT NULL,
    latency_ms INTEGER NOT NULL,
    success INTEGER NOT NULL,
    error_kind TEXT
);

CREATE INDEX IF NOT EXISTS idx_request_log_timestamp ON request_log(timestamp);
"#;

/// One finished request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    pub provider: Provider,
    pub mode: Mode,
    pub latency_ms: u64,
    /// `None` on success.
    pub error_kind: Option<&'static str>,
}

pub struct MetricsStore {
    conn: Connection,
}

impl MetricsStore {
    pub fn open(path: &Path) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "auto_vacuum", "INCREMENTAL")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Metrics are best effort: a failed insert is logged, never surfaced.
    pub fn record(&self, record: &RequestRecord) {
        let result = self.conn.execute(
            "INSERT INTO request_log (timestamp, provider, mode, latency_ms, success, error_kind)
             VALUES (datetime('now'), ?1, ?2, ?3, ?4, ?5)",
            params![
                record.provider.as_str(),
                record.mode.to_string(),
                record.latency_ms as i64,
                record.error_kind.is_none() as i32,
                record.error_kind,
            ],
        );
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to record request metrics");
        }
    }

    pub fn get_summary(&self, retention_days: u32) -> MetricsSummary {
        let query = format!(
            r#"
            SELECT
                COUNT(*) as total_requests,
                COALESCE(AVG(latency_ms), 0) as avg_latency_ms,
                COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END) * 100.0 / NULLIF(COUNT(*), 0), 0) as error_rate
            FROM request_log
            WHERE timestamp >= datetime('now', '-{} days')
            "#,
            retention_days
        );

        let mut summary = self
            .conn
            .query_row(&query, [], |row| {
                Ok(MetricsSummary {
                    total_requests: row.get::<_, i64>(0)? as u64,
                    avg_latency_ms: row.get::<_, f64>(1)? as u64,
                    error_rate: row.get::<_, f64>(2)? as f32,
                    by_provider: Vec::new(),
                })
            })
            .unwrap_or_default();

        summary.by_provider = self.provider_counts(retention_days).unwrap_or_default();
        summary
    }

    fn provider_counts(&self, retention_days: u32) -> Result<Vec<ProviderCount>, rusqlite::Error> {
        let query = format!(
            "SELECT provider, COUNT(*) FROM request_log
             WHERE timestamp >= datetime('now', '-{} days')
             GROUP BY provider ORDER BY provider",
            retention_days
        );
        let mut stmt = self.conn.prepare(&query)?;
        let rows = stmt.query_map([], |row| {
            Ok(ProviderCount {
                provider: row.get(0)?,
                requests: row.get::<_, i64>(1)? as u64,
            })
        })?;
        rows.collect()
    }

    /// Drop rows older than the retention window, returning how many went.
    pub fn cleanup(&self, retention_days: u32) -> usize {
        let query = format!(
            "DELETE FROM request_log WHERE timestamp < datetime('now', '-{} days')",
            retention_days
        );
        match self.conn.execute(&query, []) {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(error = %e, "metrics cleanup failed");
                0
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderCount {
    pub provider: String,
    pub requests: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_requests: u64,
    pub avg_latency_ms: u64,
    /// Percentage of failed requests.
    pub error_rate: f32,
    pub by_provider: Vec<ProviderCount>,
}

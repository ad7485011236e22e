//! SQLite-backed distribution tables and report pointers.
//!
//! Distribution tables are filled upstream; this store only reads them.
//! Report pointer tables are append-only.

use crate::error::UpstreamError;
use crate::models::{
    AllocatorReportRecord, GeneratedReportRecord, RawCidSharingRow, RawProviderRow, RawReplicaRow,
};
use crate::upstream::{DistributionSource, ReportStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS provider_distribution (
    client TEXT NOT NULL,
    provider TEXT NOT NULL,
    total_deal_size TEXT NOT NULL,
    unique_data_size TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS provider_distribution_client_idx ON provider_distribution (client);

CREATE TABLE IF NOT EXISTS provider_first_client (
    provider TEXT PRIMARY KEY,
    first_client TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS replica_distribution (
    client TEXT NOT NULL,
    num_of_replicas INTEGER NOT NULL,
    total_deal_size TEXT NOT NULL,
    unique_data_size TEXT NOT NULL,
    expires_at_epoch INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS replica_distribution_client_idx ON replica_distribution (client);

CREATE TABLE IF NOT EXISTS cid_sharing (
    client TEXT NOT NULL,
    other_client TEXT NOT NULL,
    total_deal_size TEXT NOT NULL,
    unique_cid_count INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS cid_sharing_client_idx ON cid_sharing (client);

CREATE TABLE IF NOT EXISTS generated_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_address_id TEXT NOT NULL,
    file_path TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
CREATE INDEX IF NOT EXISTS generated_reports_client_idx ON generated_reports (client_address_id);

CREATE TABLE IF NOT EXISTS allocator_generated_reports (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL,
    address_id TEXT NOT NULL,
    name TEXT NOT NULL,
    url TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
);
CREATE INDEX IF NOT EXISTS allocator_generated_reports_address_idx ON allocator_generated_reports (address);
CREATE INDEX IF NOT EXISTS allocator_generated_reports_address_id_idx ON allocator_generated_reports (address_id);
"#;

/// SQLite store shared by the aggregators and the report synthesizer.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: &Path) -> Result<Self, UpstreamError> {
        info!("Opening store at {}", path.display());
        Self::init(Connection::open(path)?)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, UpstreamError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, UpstreamError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, UpstreamError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| UpstreamError::Storage("connection lock poisoned".to_string()))?;
            f(&guard).map_err(UpstreamError::from)
        })
        .await
        .map_err(|e| UpstreamError::Storage(e.to_string()))?
    }
}

/// `?{offset+1}, ?{offset+2}, ...` for an `IN (...)` list.
fn placeholders(count: usize, offset: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i + offset))
        .collect::<Vec<_>>()
        .join(", ")
}

fn parse_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn report_from_row(row: &Row<'_>) -> rusqlite::Result<GeneratedReportRecord> {
    Ok(GeneratedReportRecord {
        id: row.get(0)?,
        client_address_id: row.get(1)?,
        file_path: row.get(2)?,
        created_at: parse_timestamp(row, 3)?,
    })
}

fn allocator_report_from_row(row: &Row<'_>) -> rusqlite::Result<AllocatorReportRecord> {
    Ok(AllocatorReportRecord {
        id: row.get(0)?,
        address: row.get(1)?,
        address_id: row.get(2)?,
        name: row.get(3)?,
        url: row.get(4)?,
        created_at: parse_timestamp(row, 5)?,
    })
}

const REPORT_COLUMNS: &str = "id, client_address_id, file_path, created_at";
const ALLOCATOR_REPORT_COLUMNS: &str = "id, address, address_id, name, url, created_at";

#[async_trait]
impl DistributionSource for SqliteStore {
    async fn provider_distribution(
        &self,
        client_ids: &[String],
    ) -> Result<Vec<RawProviderRow>, UpstreamError> {
        let ids = client_ids.to_vec();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT d.provider,
                        SUM(CAST(d.total_deal_size AS REAL)),
                        SUM(CAST(d.unique_data_size AS REAL)),
                        f.first_client
                 FROM provider_distribution d
                 LEFT JOIN provider_first_client f ON f.provider = d.provider
                 WHERE d.client IN ({})
                 GROUP BY d.provider, f.first_client",
                placeholders(ids.len(), 0)
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
                Ok(RawProviderRow {
                    provider: row.get(0)?,
                    total_deal_size: row.get::<_, f64>(1)?.to_string(),
                    unique_data_size: row.get::<_, f64>(2)?.to_string(),
                    first_client: row.get(3)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn replica_distribution(
        &self,
        client_ids: &[String],
        current_epoch: i64,
    ) -> Result<Vec<RawReplicaRow>, UpstreamError> {
        let ids = client_ids.to_vec();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT num_of_replicas,
                        SUM(CAST(total_deal_size AS REAL)),
                        SUM(CAST(unique_data_size AS REAL))
                 FROM replica_distribution
                 WHERE expires_at_epoch > ?1 AND client IN ({})
                 GROUP BY num_of_replicas
                 ORDER BY num_of_replicas ASC",
                placeholders(ids.len(), 1)
            );
            let mut values: Vec<rusqlite::types::Value> = vec![current_epoch.into()];
            values.extend(ids.into_iter().map(rusqlite::types::Value::from));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                Ok(RawReplicaRow {
                    num_of_replicas: row.get(0)?,
                    total_deal_size: row.get::<_, f64>(1)?.to_string(),
                    unique_data_size: row.get::<_, f64>(2)?.to_string(),
                })
            })?;
            rows.collect()
        })
        .await
    }

    async fn cid_sharing(
        &self,
        client_ids: &[String],
    ) -> Result<Vec<RawCidSharingRow>, UpstreamError> {
        let ids = client_ids.to_vec();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT other_client,
                        SUM(CAST(total_deal_size AS REAL)),
                        SUM(unique_cid_count)
                 FROM cid_sharing
                 WHERE client IN ({})
                 GROUP BY other_client
                 ORDER BY SUM(CAST(total_deal_size AS REAL)) DESC",
                placeholders(ids.len(), 0)
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(ids.iter()), |row| {
                Ok(RawCidSharingRow {
                    other_client_address: row.get(0)?,
                    total_deal_size: row.get::<_, f64>(1)?.to_string(),
                    unique_cid_count: row.get::<_, i64>(2)?.max(0) as u64,
                })
            })?;
            rows.collect()
        })
        .await
    }
}

#[async_trait]
impl ReportStore for SqliteStore {
    async fn insert_report(
        &self,
        client_address_id: &str,
        file_path: &str,
    ) -> Result<GeneratedReportRecord, UpstreamError> {
        let client = client_address_id.to_string();
        let path = file_path.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO generated_reports (client_address_id, file_path) VALUES (?1, ?2)",
                params![client, path],
            )?;
            let id = conn.last_insert_rowid();
            debug!("Inserted generated report {} for {}", id, client);
            conn.query_row(
                &format!("SELECT {} FROM generated_reports WHERE id = ?1", REPORT_COLUMNS),
                params![id],
                report_from_row,
            )
        })
        .await
    }

    async fn latest_report(
        &self,
        client_address_id: &str,
    ) -> Result<Option<GeneratedReportRecord>, UpstreamError> {
        let client = client_address_id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM generated_reports WHERE client_address_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    REPORT_COLUMNS
                ),
                params![client],
                report_from_row,
            )
            .optional()
        })
        .await
    }

    async fn report_history(
        &self,
        client_address_id: &str,
    ) -> Result<Vec<GeneratedReportRecord>, UpstreamError> {
        let client = client_address_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM generated_reports WHERE client_address_id = ?1
                 ORDER BY created_at DESC, id DESC",
                REPORT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![client], report_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn insert_allocator_report(
        &self,
        address: &str,
        address_id: &str,
        name: &str,
        url: &str,
    ) -> Result<AllocatorReportRecord, UpstreamError> {
        let values = [
            address.to_string(),
            address_id.to_string(),
            name.to_string(),
            url.to_string(),
        ];
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO allocator_generated_reports (address, address_id, name, url)
                 VALUES (?1, ?2, ?3, ?4)",
                params_from_iter(values.iter()),
            )?;
            let id = conn.last_insert_rowid();
            conn.query_row(
                &format!(
                    "SELECT {} FROM allocator_generated_reports WHERE id = ?1",
                    ALLOCATOR_REPORT_COLUMNS
                ),
                params![id],
                allocator_report_from_row,
            )
        })
        .await
    }

    async fn latest_allocator_report(
        &self,
        address: &str,
    ) -> Result<Option<AllocatorReportRecord>, UpstreamError> {
        let address = address.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM allocator_generated_reports
                     WHERE address = ?1 OR address_id = ?1
                     ORDER BY created_at DESC, id DESC LIMIT 1",
                    ALLOCATOR_REPORT_COLUMNS
                ),
                params![address],
                allocator_report_from_row,
            )
            .optional()
        })
        .await
    }

    async fn allocator_report_history(
        &self,
        address: &str,
    ) -> Result<Vec<AllocatorReportRecord>, UpstreamError> {
        let address = address.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM allocator_generated_reports
                 WHERE address = ?1 OR address_id = ?1
                 ORDER BY created_at DESC, id DESC",
                ALLOCATOR_REPORT_COLUMNS
            ))?;
            let rows = stmt.query_map(params![address], allocator_report_from_row)?;
            rows.collect()
        })
        .await
    }
}

//! Chunked table reads and the row-source seam for test mode.

use std::collections::VecDeque;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{MigrateError, Result};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::source::types::{convert_pg_row, Row, RowBatch, RowValue, SourceTable};
use crate::source::{quote_ident, ConnectionManager};

/// Row count above which a table is read in chunks instead of one query.
pub const LARGE_TABLE_THRESHOLD: i64 = 100_000;

/// Page size for one fetch: `None` reads the whole table in one batch.
fn page_limit(row_count: i64, chunk_size: usize) -> Option<usize> {
    if row_count > LARGE_TABLE_THRESHOLD {
        Some(chunk_size)
    } else {
        None
    }
}

/// Build the SELECT for one page, ordered by the immutable id column so
/// paging is deterministic for the whole run.
fn page_sql(table: &SourceTable, limit: Option<usize>, offset: i64) -> String {
    let base = format!(
        "SELECT * FROM {} ORDER BY {}",
        quote_ident(&table.name),
        quote_ident(&table.id_column)
    );
    match limit {
        Some(limit) => format!("{} LIMIT {} OFFSET {}", base, limit, offset),
        None => base,
    }
}

/// Lazy, finite, non-restartable sequence of row batches for one table.
///
/// Every page fetch is retried under the engine policy; a page that
/// exhausts its retries ends the sequence early with a chunk-read error
/// and no partial batch. A retried page restarts from its offset
/// boundary, never mid-page.
pub struct ChunkedReader<'a> {
    conn: &'a ConnectionManager,
    retry: RetryExecutor,
    table: SourceTable,
    chunk_size: usize,
    chunk_delay: std::time::Duration,
    offset: i64,
    finished: bool,
}

impl<'a> ChunkedReader<'a> {
    /// Count the table and prepare the batch sequence.
    pub async fn open(
        conn: &'a ConnectionManager,
        table_name: &str,
        id_column: &str,
        engine: &EngineConfig,
    ) -> Result<Self> {
        let retry = RetryExecutor::new(RetryPolicy::from_engine(engine));
        let count_sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table_name));
        let row_count = retry
            .execute("count table", || conn.query_scalar_i64(&count_sql))
            .await
            .map_err(|err| classify_read_error(table_name, 0, err))?;

        let table = SourceTable {
            name: table_name.to_string(),
            id_column: id_column.to_string(),
            row_count,
        };
        if table.is_large(LARGE_TABLE_THRESHOLD) {
            info!(
                "table [{}]: {} rows, reading in chunks of {}",
                table.name, table.row_count, engine.chunk_size
            );
        } else {
            debug!(
                "table [{}]: {} rows, reading in a single batch",
                table.name, table.row_count
            );
        }

        Ok(Self {
            conn,
            retry,
            table,
            chunk_size: engine.chunk_size,
            chunk_delay: engine.chunk_delay(),
            offset: 0,
            finished: false,
        })
    }

    pub fn table(&self) -> &SourceTable {
        &self.table
    }

    /// Fetch the next batch, or `None` when the table is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<RowBatch>> {
        if self.finished {
            return Ok(None);
        }

        let limit = page_limit(self.table.row_count, self.chunk_size);
        if self.offset > 0 && !self.chunk_delay.is_zero() {
            tokio::time::sleep(self.chunk_delay).await;
        }

        let sql = page_sql(&self.table, limit, self.offset);
        let conn = self.conn;
        let fetched = self
            .retry
            .execute("read chunk", || conn.query(&sql))
            .await;

        let pg_rows = match fetched {
            Ok(rows) => rows,
            Err(err) => {
                // Terminate early; no partial batch is yielded.
                self.finished = true;
                return Err(classify_read_error(&self.table.name, self.offset, err));
            }
        };

        let rows: Vec<Row> = pg_rows.iter().map(convert_pg_row).collect();
        let batch_offset = self.offset;
        self.offset += rows.len() as i64;

        match limit {
            None => self.finished = true,
            Some(limit) if rows.len() < limit => self.finished = true,
            _ => {}
        }

        if rows.is_empty() {
            self.finished = true;
            return Ok(None);
        }

        debug!(
            "table [{}]: read {} rows at offset {}",
            self.table.name,
            rows.len(),
            batch_offset
        );
        Ok(Some(RowBatch::new(batch_offset, rows)))
    }
}

/// Map a failed fetch onto the read error taxonomy: an exhausted reconnect
/// stays a connection error, everything else becomes a chunk-read error
/// naming the table and offset.
fn classify_read_error(table: &str, offset: i64, err: MigrateError) -> MigrateError {
    match err {
        MigrateError::RetriesExhausted { attempts, source } => match *source {
            conn @ MigrateError::Connection(_) => conn,
            other => MigrateError::chunk_read(
                table,
                offset,
                format!("{} (after {} attempts)", other, attempts),
            ),
        },
        conn @ MigrateError::Connection(_) => conn,
        other => MigrateError::chunk_read(table, offset, other.to_string()),
    }
}

/// In-memory batch source: fixtures and tests run through the same pump
/// path as live reads, with zero real data.
#[derive(Debug, Default)]
pub struct MemorySource {
    batches: VecDeque<RowBatch>,
}

impl MemorySource {
    /// A source with no rows at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Chunk the given rows the way a live reader would.
    pub fn from_rows(rows: Vec<Row>, chunk_size: usize) -> Self {
        let mut batches = VecDeque::new();
        let mut offset = 0i64;
        let mut rows = rows;
        while !rows.is_empty() {
            let take = rows.len().min(chunk_size.max(1));
            let rest = rows.split_off(take);
            let len = rows.len() as i64;
            batches.push_back(RowBatch::new(offset, rows));
            offset += len;
            rows = rest;
        }
        Self { batches }
    }

    pub fn next_batch(&mut self) -> Option<RowBatch> {
        self.batches.pop_front()
    }
}

/// Anything the pump can pull batches from.
#[async_trait]
pub trait BatchSource: Send {
    async fn fetch(&mut self) -> Result<Option<RowBatch>>;
}

#[async_trait]
impl BatchSource for ChunkedReader<'_> {
    async fn fetch(&mut self) -> Result<Option<RowBatch>> {
        self.next_batch().await
    }
}

#[async_trait]
impl BatchSource for MemorySource {
    async fn fetch(&mut self) -> Result<Option<RowBatch>> {
        Ok(self.next_batch())
    }
}

/// Load a test-mode fixture file.
///
/// The contents must be JSON `null` or `[]` (the explicit no-rows
/// markers) or an array of row objects. Anything else is a configuration
/// error, so a typo surfaces instead of silently migrating nothing.
pub fn load_fixture(path: &Path, chunk_size: usize) -> Result<MemorySource> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        MigrateError::Config(format!("cannot read fixture {}: {}", path.display(), e))
    })?;
    let value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
        MigrateError::Config(format!("fixture {} is not valid JSON: {}", path.display(), e))
    })?;

    match value {
        serde_json::Value::Null => Ok(MemorySource::empty()),
        serde_json::Value::Array(items) => {
            let mut rows = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    serde_json::Value::Object(map) => {
                        let mut row = Row::new();
                        for (column, value) in map {
                            row.insert(column, json_to_row_value(value));
                        }
                        rows.push(row);
                    }
                    other => {
                        return Err(MigrateError::Config(format!(
                            "fixture {} rows must be objects, found: {}",
                            path.display(),
                            other
                        )));
                    }
                }
            }
            Ok(MemorySource::from_rows(rows, chunk_size))
        }
        other => Err(MigrateError::Config(format!(
            "fixture {} must be null or an array of rows, found: {}",
            path.display(),
            other
        ))),
    }
}

fn json_to_row_value(value: serde_json::Value) -> RowValue {
    match value {
        serde_json::Value::Null => RowValue::Null,
        serde_json::Value::Bool(v) => RowValue::Bool(v),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                RowValue::I64(i)
            } else {
                RowValue::F64(n.as_f64().unwrap_or(0.0))
            }
        }
        serde_json::Value::String(s) => RowValue::Text(s),
        other => RowValue::Json(other),
    }
}

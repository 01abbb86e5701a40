//! The entity pump: read, transform, submit, one table at a time.

mod mapping;

pub use mapping::{
    standard_mappings, ColumnMapping, DerivedField, MetadataColumn, SkipRule, TableMapping,
};

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info};

use crate::error::MigrateError;
use crate::policy::{IgnoreCategory, PolicyFilter};
use crate::resolve::normalize_date;
use crate::retry::RetryExecutor;
use crate::source::{BatchSource, Row};
use crate::target::ApiClient;

/// How many failure causes a table report keeps verbatim; the rest are
/// counted only.
pub const MAX_REPORTED_FAILURES: usize = 20;

/// Migration status of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    Succeeded,
    Skipped,
    Failed,
}

/// One migrated business object, built from a source row.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    /// Entity type, also the import endpoint suffix.
    pub entity_type: String,

    /// Source identity (primary key rendered as text).
    pub source_id: String,

    /// Resolved payload fields.
    pub fields: BTreeMap<String, serde_json::Value>,

    /// Metadata values keyed by dotted field name.
    pub metadata: BTreeMap<String, Vec<String>>,

    pub status: MigrationStatus,
}

impl EntityRecord {
    pub fn new(entity_type: String, source_id: String) -> Self {
        Self {
            entity_type,
            source_id,
            fields: BTreeMap::new(),
            metadata: BTreeMap::new(),
            status: MigrationStatus::Pending,
        }
    }

    /// Short identity for diagnostics, e.g. `item/1024`.
    pub fn describe(&self) -> String {
        format!("{}/{}", self.entity_type, self.source_id)
    }

    /// The JSON body submitted to the target.
    pub fn payload(&self) -> serde_json::Value {
        json!({
            "sourceId": self.source_id,
            "fields": self.fields,
            "metadata": self.metadata,
        })
    }
}

/// A recorded per-record failure with enough context to re-run
/// selectively.
#[derive(Debug, Clone, Serialize)]
pub struct FailureCause {
    pub entity: String,
    pub field: Option<String>,
    pub message: String,
}

/// Outcome of one table's migration.
#[derive(Debug, Serialize)]
pub struct TableReport {
    pub table: String,
    pub succeeded: u64,
    pub skipped: u64,
    pub failed: u64,

    /// Extra submission attempts beyond the first, summed over the table.
    pub retries: u64,

    /// First [`MAX_REPORTED_FAILURES`] causes; `failed` holds the full
    /// count.
    pub failures: Vec<FailureCause>,

    /// Set when a connection or chunk-read error ended the table early.
    /// Counts above cover what was processed before the abort.
    pub aborted: Option<String>,
}

impl TableReport {
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
            succeeded: 0,
            skipped: 0,
            failed: 0,
            retries: 0,
            failures: Vec::new(),
            aborted: None,
        }
    }

    pub fn aborted(table: &str, error: &MigrateError) -> Self {
        let mut report = Self::new(table);
        report.aborted = Some(error.to_string());
        report
    }

    fn record_failure(&mut self, cause: FailureCause) {
        self.failed += 1;
        if self.failures.len() < MAX_REPORTED_FAILURES {
            self.failures.push(cause);
        }
    }

    /// No failures and no early abort.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.aborted.is_none()
    }

    pub fn log_summary(&self) {
        info!(
            "table [{}]: {} succeeded, {} skipped, {} failed, {} retries",
            self.table, self.succeeded, self.skipped, self.failed, self.retries
        );
        if let Some(reason) = &self.aborted {
            error!("table [{}] aborted: {}", self.table, reason);
        }
    }
}

/// Drives one table's migration: batches in, records out.
///
/// Per-record outcomes are independent: one record's failure is recorded
/// and the pump moves on. Only a connection or chunk-read error ends the
/// table early.
pub struct EntityPump<'a> {
    mapping: &'a TableMapping,
    policy: &'a PolicyFilter,
    api: &'a dyn ApiClient,
    retry: RetryExecutor,
}

impl<'a> EntityPump<'a> {
    pub fn new(
        mapping: &'a TableMapping,
        policy: &'a PolicyFilter,
        api: &'a dyn ApiClient,
        retry: RetryExecutor,
    ) -> Self {
        Self {
            mapping,
            policy,
            api,
            retry,
        }
    }

    /// Migrate the whole table from `source`.
    pub async fn run<S: BatchSource>(&self, source: &mut S) -> TableReport {
        let mut report = TableReport::new(&self.mapping.table);
        info!("table [{}]: migration started", self.mapping.table);

        loop {
            let batch = match source.fetch().await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(err) => {
                    report.aborted = Some(err.to_string());
                    break;
                }
            };
            debug!(
                "table [{}]: processing {} rows at offset {}",
                self.mapping.table,
                batch.len(),
                batch.offset
            );
            for row in &batch.rows {
                self.process_row(row, &mut report).await;
            }
            // The batch drops here; pages are never retained.
        }

        report.log_summary();
        report
    }

    async fn process_row(&self, row: &Row, report: &mut TableReport) {
        let mut record = match self.build_record(row) {
            Ok(Some(record)) => record,
            Ok(None) => {
                report.skipped += 1;
                return;
            }
            Err(cause) => {
                report.record_failure(cause);
                return;
            }
        };

        let api = self.api;
        let what = record.describe();
        match self
            .retry
            .execute_counted(&what, || api.submit(&record))
            .await
        {
            Ok((_, attempts)) => {
                record.status = MigrationStatus::Succeeded;
                report.succeeded += 1;
                report.retries += u64::from(attempts - 1);
            }
            Err(err) => {
                record.status = MigrationStatus::Failed;
                report.record_failure(FailureCause {
                    entity: record.describe(),
                    field: None,
                    message: err.to_string(),
                });
            }
        }
    }

    /// Build the record for one row: apply the skip rule, map columns and
    /// metadata (dropping ignored field names), resolve derived fields.
    ///
    /// `Ok(None)` means the row is skipped; a failed derived-field
    /// resolution skips with an error-level diagnostic naming the entity
    /// and the exhausted candidate list.
    fn build_record(&self, row: &Row) -> Result<Option<EntityRecord>, FailureCause> {
        let mapping = self.mapping;

        let id = match row.get(&mapping.id_column) {
            Some(value) if !value.is_null() => value.to_plain_string(),
            _ => {
                return Err(FailureCause {
                    entity: format!("{}/?", mapping.entity_type),
                    field: Some(mapping.id_column.clone()),
                    message: "row has no id value".into(),
                });
            }
        };

        if let Some(rule) = &mapping.skip {
            if let Some(value) = row.get(&rule.column) {
                if self
                    .policy
                    .should_ignore(rule.category, &value.to_plain_string())
                {
                    debug!(
                        "table [{}]: skipping {} [{}] by ignore rule",
                        mapping.table, rule.column, id
                    );
                    return Ok(None);
                }
            }
        }

        let mut record = EntityRecord::new(mapping.entity_type.clone(), id);

        for column in &mapping.columns {
            if self
                .policy
                .should_ignore(IgnoreCategory::MetadataField, &column.target)
            {
                continue;
            }
            if let Some(value) = row.get(&column.source) {
                record.fields.insert(column.target.clone(), value.to_json());
            }
        }

        for meta in &mapping.metadata {
            let field_name = meta.field.as_str();
            if self
                .policy
                .should_ignore(IgnoreCategory::MetadataField, field_name)
            {
                debug!(
                    "table [{}]: dropping ignored metadata field [{}]",
                    mapping.table, field_name
                );
                continue;
            }
            if let Some(value) = row.get(&meta.source) {
                if !value.is_empty() {
                    record
                        .metadata
                        .entry(field_name.to_string())
                        .or_default()
                        .push(value.to_plain_string());
                }
            }
        }

        for derived in &mapping.derived {
            let entity = record.describe();
            let (raw, spec) = match derived.resolver.resolve(&entity, &record.metadata) {
                Ok(found) => found,
                Err(err) => {
                    error!("{}; record skipped", err);
                    return Ok(None);
                }
            };
            let value = if derived.as_date {
                match normalize_date(raw) {
                    Some(date) => date,
                    None => {
                        error!(
                            "invalid date '{}' in field [{}] for {}; record skipped",
                            raw, spec, entity
                        );
                        return Ok(None);
                    }
                }
            } else {
                raw.to_string()
            };
            record.fields.insert(derived.target.clone(), json!(value));
        }

        Ok(Some(record))
    }
}

//! Run-level coordination: one pump per table, strictly in mapping order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::config::Config;
use crate::error::Result;
use crate::policy::PolicyFilter;
use crate::pump::{EntityPump, TableMapping, TableReport};
use crate::retry::{RetryExecutor, RetryPolicy};
use crate::source::{load_fixture, ChunkedReader, ConnectionManager};
use crate::target::ApiClient;

/// Coordinates a migration run.
///
/// Tables are processed in the order given: referential order across
/// tables is the caller's contract, enforced by the mapping sequence.
/// A table that aborts (connection or chunk-read failure) does not stop
/// the run; remaining tables still get their chance.
pub struct Migrator {
    config: Config,
    policy: PolicyFilter,
    conn: ConnectionManager,
    api: Arc<dyn ApiClient>,
}

/// Result of a whole migration run.
#[derive(Debug, Serialize)]
pub struct MigrationReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub tables: Vec<TableReport>,
}

impl MigrationReport {
    pub fn total_succeeded(&self) -> u64 {
        self.tables.iter().map(|t| t.succeeded).sum()
    }

    pub fn total_skipped(&self) -> u64 {
        self.tables.iter().map(|t| t.skipped).sum()
    }

    pub fn total_failed(&self) -> u64 {
        self.tables.iter().map(|t| t.failed).sum()
    }

    pub fn total_retries(&self) -> u64 {
        self.tables.iter().map(|t| t.retries).sum()
    }

    /// Tables ended early by a connection or chunk-read error.
    pub fn aborted_tables(&self) -> Vec<&str> {
        self.tables
            .iter()
            .filter(|t| t.aborted.is_some())
            .map(|t| t.table.as_str())
            .collect()
    }

    /// No record failed and no table aborted.
    pub fn is_clean(&self) -> bool {
        self.tables.iter().all(|t| t.is_clean())
    }

    /// Convert to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

impl Migrator {
    /// Build a migrator. Configuration problems surface here, before any
    /// data movement.
    pub fn new(config: Config, api: Arc<dyn ApiClient>) -> Result<Self> {
        config.validate()?;
        let policy = PolicyFilter::from_config(&config.ignore);
        let conn = ConnectionManager::new(config.source.clone(), config.engine.clone());
        Ok(Self {
            config,
            policy,
            conn,
            api,
        })
    }

    /// The source connection, for diagnostics commands.
    pub fn connection(&self) -> &ConnectionManager {
        &self.conn
    }

    /// Run the migration over the given mapping sequence.
    pub async fn run(&self, mappings: &[TableMapping]) -> MigrationReport {
        let started_at = Utc::now();
        info!("migration run started: {} tables", mappings.len());

        let mut tables = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            tables.push(self.run_table(mapping).await);
        }

        let completed_at = Utc::now();
        let report = MigrationReport {
            started_at,
            completed_at,
            duration_seconds: (completed_at - started_at).num_milliseconds() as f64 / 1000.0,
            tables,
        };

        info!(
            "migration run finished in {:.1}s: {} succeeded, {} skipped, {} failed, {} retries, aborted tables: {:?}",
            report.duration_seconds,
            report.total_succeeded(),
            report.total_skipped(),
            report.total_failed(),
            report.total_retries(),
            report.aborted_tables(),
        );
        report
    }

    async fn run_table(&self, mapping: &TableMapping) -> TableReport {
        let retry = RetryExecutor::new(RetryPolicy::from_engine(&self.config.engine));
        let pump = EntityPump::new(mapping, &self.policy, self.api.as_ref(), retry);

        if self.is_test_table(&mapping.table) {
            // Validation guarantees the fixture path exists in config.
            let Some(path) = self.config.test.fixture.as_deref() else {
                let err = crate::error::MigrateError::Config(
                    "test.fixture is not configured".into(),
                );
                return TableReport::aborted(&mapping.table, &err);
            };
            info!(
                "table [{}]: test mode, reading fixture {} instead of the database",
                mapping.table,
                path.display()
            );
            return match load_fixture(path, self.config.engine.chunk_size) {
                Ok(mut source) => pump.run(&mut source).await,
                Err(err) => {
                    error!("table [{}]: {}", mapping.table, err);
                    TableReport::aborted(&mapping.table, &err)
                }
            };
        }

        match ChunkedReader::open(
            &self.conn,
            &mapping.table,
            &mapping.id_column,
            &self.config.engine,
        )
        .await
        {
            Ok(mut reader) => pump.run(&mut reader).await,
            Err(err) => {
                error!("table [{}]: cannot start read: {}", mapping.table, err);
                TableReport::aborted(&mapping.table, &err)
            }
        }
    }

    fn is_test_table(&self, table: &str) -> bool {
        self.config.test.tables.iter().any(|t| t == table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::pump::EntityRecord;
    use async_trait::async_trait;
    use std::io::Write;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingClient {
        submissions: AtomicU64,
    }

    #[async_trait]
    impl ApiClient for CountingClient {
        async fn submit(&self, _record: &EntityRecord) -> Result<()> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config_yaml(test_block: &str) -> String {
        format!(
            r#"
source:
  name: clarin-dspace
  host: 127.0.0.1
  port: 1
  user: postgres
  password: dspace
backend:
  endpoint: http://localhost:8080/server/api/
  user: admin@example.com
  password: admin
engine:
  max_retries: 1
  retry_base_delay_secs: 0
  connect_timeout_secs: 1
  chunk_delay_ms: 0
{}
"#,
            test_block
        )
    }

    #[tokio::test]
    async fn test_fixture_table_bypasses_the_database() {
        // The source points at a port nothing listens on; only the
        // test-mode fixture keeps this from aborting.
        let fixture = {
            let mut f = tempfile::NamedTempFile::new().unwrap();
            f.write_all(b"null").unwrap();
            f
        };
        let yaml = config_yaml(&format!(
            "test:\n  tables: [user_metadata]\n  fixture: {}\n",
            fixture.path().display()
        ));
        let config = Config::from_yaml(&yaml).unwrap();
        let client = Arc::new(CountingClient::default());
        let migrator = Migrator::new(config, client.clone()).unwrap();

        let mapping = TableMapping::new("user_metadata", "user_metadata_id", "usermetadata");
        let report = migrator.run(&[mapping]).await;

        assert_eq!(report.tables.len(), 1);
        let table = &report.tables[0];
        assert_eq!(table.succeeded, 0);
        assert_eq!(table.skipped, 0);
        assert_eq!(table.failed, 0);
        assert!(table.aborted.is_none());
        assert_eq!(client.submissions.load(Ordering::SeqCst), 0);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_unreachable_source_aborts_table_not_run() {
        let yaml = config_yaml("");
        let config = Config::from_yaml(&yaml).unwrap();
        let client = Arc::new(CountingClient::default());
        let migrator = Migrator::new(config, client).unwrap();

        let mappings = vec![
            TableMapping::new("handle", "handle_id", "handle"),
            TableMapping::new("eperson", "eperson_id", "eperson"),
        ];
        let report = migrator.run(&mappings).await;

        // Both tables aborted; the run itself still completed and
        // reported each one.
        assert_eq!(report.tables.len(), 2);
        assert_eq!(report.aborted_tables(), vec!["handle", "eperson"]);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_report_totals_and_json() {
        let fixture = {
            let mut f = tempfile::NamedTempFile::new().unwrap();
            f.write_all(br#"[{"handle_id": 1, "handle": "123456789/1"}]"#)
                .unwrap();
            f
        };
        let yaml = config_yaml(&format!(
            "test:\n  tables: [handle]\n  fixture: {}\n",
            fixture.path().display()
        ));
        let config = Config::from_yaml(&yaml).unwrap();
        let client = Arc::new(CountingClient::default());
        let migrator = Migrator::new(config, client.clone()).unwrap();

        let mapping = TableMapping::new("handle", "handle_id", "handle").column("handle", "handle");
        let report = migrator.run(&[mapping]).await;

        assert_eq!(report.total_succeeded(), 1);
        assert_eq!(client.submissions.load(Ordering::SeqCst), 1);

        let json = report.to_json().unwrap();
        assert!(json.contains("\"succeeded\": 1"));
        assert!(json.contains("\"table\": \"handle\""));
    }
}

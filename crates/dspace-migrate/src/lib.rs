//! # dspace-migrate
//!
//! Resilient bulk-migration engine for DSpace content repositories.
//!
//! Reads the source repository's relational export table by table and
//! submits normalized entity records to the target deployment's REST
//! API, with:
//!
//! - **Chunked reads** of large tables over one long-lived connection
//!   with keepalive and explicit reconnect handling
//! - **Bounded retry** with exponential backoff for transient failures
//! - **Candidate-list resolution** of derived fields (item version dates)
//! - **Ignore policies** for suppressed persons, metadata fields and
//!   license-icon labels
//! - **Test mode** substituting a fixture for any table's row source
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dspace_migrate::{Config, HttpApiClient, Migrator, standard_mappings};
//!
//! #[tokio::main]
//! async fn main() -> dspace_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let mappings = standard_mappings(&config)?;
//!     let api = Arc::new(HttpApiClient::new(&config.backend)?);
//!     api.login().await?;
//!     let migrator = Migrator::new(config, api)?;
//!     let report = migrator.run(&mappings).await;
//!     println!("{} records migrated", report.total_succeeded());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod policy;
pub mod pump;
pub mod resolve;
pub mod retry;
pub mod source;
pub mod target;

// Re-exports for convenient access
pub use config::{BackendConfig, Config, EngineConfig, IgnoreConfig, SourceDbConfig, TestConfig};
pub use error::{MigrateError, Result};
pub use orchestrator::{MigrationReport, Migrator};
pub use policy::{IgnoreCategory, PolicyFilter};
pub use pump::{standard_mappings, EntityPump, EntityRecord, MigrationStatus, TableMapping, TableReport};
pub use resolve::{FieldResolver, FieldSpec};
pub use retry::{RetryExecutor, RetryPolicy};
pub use source::{ChunkedReader, ConnectionManager, ConnectionState, RowBatch, RowValue, SourceTable};
pub use target::{ApiClient, HttpApiClient};

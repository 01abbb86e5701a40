//! dspace-migrate CLI - bulk migration of a DSpace repository.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use dspace_migrate::{standard_mappings, Config, HttpApiClient, MigrateError, Migrator};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "dspace-migrate")]
#[command(about = "Migrate a DSpace repository into a newer deployment")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the migration
    Run {
        /// Run these tables against the configured fixture instead of
        /// the real database
        #[arg(long = "test", value_name = "TABLE")]
        test_tables: Vec<String>,

        /// Migrate only these tables (in standard order)
        #[arg(long = "tables", value_name = "TABLE")]
        only_tables: Vec<String>,

        /// Output the JSON report to stdout
        #[arg(long)]
        output_json: bool,
    },

    /// Print per-table row counts of the source database
    Status,

    /// Verify source database and target API connectivity
    HealthCheck,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode, MigrateError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format);

    let mut config = Config::load(&cli.config)?;
    info!("loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run {
            test_tables,
            only_tables,
            output_json,
        } => {
            for table in test_tables {
                if !config.test.tables.contains(&table) {
                    config.test.tables.push(table);
                }
            }
            config.validate()?;

            let mut mappings = standard_mappings(&config)?;
            if !only_tables.is_empty() {
                mappings.retain(|m| only_tables.contains(&m.table));
                if mappings.is_empty() {
                    return Err(MigrateError::Config(format!(
                        "no known tables among {:?}",
                        only_tables
                    )));
                }
            }

            let api = Arc::new(HttpApiClient::new(&config.backend)?);
            api.login().await?;

            let migrator = Migrator::new(config, api)?;
            let report = migrator.run(&mappings).await;
            migrator.connection().close().await;

            if output_json {
                println!("{}", report.to_json()?);
            } else {
                println!("\nMigration completed in {:.1}s", report.duration_seconds);
                for table in &report.tables {
                    println!(
                        "  {: >20}: {: >8} succeeded, {: >6} skipped, {: >6} failed, {} retries",
                        table.table, table.succeeded, table.skipped, table.failed, table.retries
                    );
                    if let Some(reason) = &table.aborted {
                        println!("  {: >20}  ABORTED: {}", "", reason);
                    }
                    for cause in &table.failures {
                        println!("  {: >20}  {}: {}", "", cause.entity, cause.message);
                    }
                }
                println!(
                    "  Totals: {} succeeded, {} skipped, {} failed",
                    report.total_succeeded(),
                    report.total_skipped(),
                    report.total_failed()
                );
            }

            if report.is_clean() {
                Ok(ExitCode::SUCCESS)
            } else {
                Ok(ExitCode::FAILURE)
            }
        }

        Commands::Status => {
            let migrator = status_migrator(config)?;
            let conn = migrator.connection();

            let tables = conn.list_tables().await?;
            let mut empty = Vec::new();
            for table in &tables {
                let count = conn.table_row_count(table).await?;
                if count == 0 {
                    empty.push(table.as_str());
                } else {
                    println!("{: >40}: {: >8}", table, count);
                }
            }
            if !empty.is_empty() {
                println!("Empty tables:\n\t{}", empty.join(","));
            }
            conn.close().await;
            Ok(ExitCode::SUCCESS)
        }

        Commands::HealthCheck => {
            let api = HttpApiClient::new(&config.backend)?;
            let migrator = status_migrator(config)?;

            let source_ok = match migrator.connection().keepalive().await {
                Ok(()) => {
                    println!("  Source database: OK");
                    true
                }
                Err(e) => {
                    println!("  Source database: FAILED ({})", e);
                    false
                }
            };
            migrator.connection().close().await;

            let target_ok = match api.health().await.and(api.login().await) {
                Ok(()) => {
                    println!("  Target API: OK");
                    true
                }
                Err(e) => {
                    println!("  Target API: FAILED ({})", e);
                    false
                }
            };

            if source_ok && target_ok {
                println!("\n  Overall: HEALTHY");
                Ok(ExitCode::SUCCESS)
            } else {
                println!("\n  Overall: UNHEALTHY");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

/// A migrator used only for its source connection; diagnostics commands
/// never talk to the target.
fn status_migrator(config: Config) -> Result<Migrator, MigrateError> {
    struct NoopClient;

    #[async_trait::async_trait]
    impl dspace_migrate::ApiClient for NoopClient {
        async fn submit(
            &self,
            record: &dspace_migrate::EntityRecord,
        ) -> dspace_migrate::Result<()> {
            Err(MigrateError::Config(format!(
                "unexpected submission of {} from a diagnostics command",
                record.describe()
            )))
        }
    }

    Migrator::new(config, Arc::new(NoopClient))
}

fn setup_logging(verbosity: &str, format: &str) {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

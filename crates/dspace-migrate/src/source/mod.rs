//! Source database access: one long-lived connection with an explicit
//! state machine, and chunked table reads on top of it.

mod reader;
mod types;

pub use reader::{load_fixture, BatchSource, ChunkedReader, MemorySource};
pub use types::{Row, RowBatch, RowValue, SourceTable};

use std::time::Instant;

use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, SourceDbConfig};
use crate::error::{MigrateError, Result};
use crate::retry::{RetryExecutor, RetryPolicy};

/// Connection lifecycle. Owned exclusively by [`ConnectionManager`]; other
/// components only issue operations and observe success or failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

struct Inner {
    state: ConnectionState,
    client: Option<Client>,
    driver: Option<tokio::task::JoinHandle<()>>,
    last_activity: Instant,
}

/// Owns the single long-lived session to the source database.
///
/// All operations go through the internal mutex, so callers are queued
/// behind the one connection and nothing proceeds while a reconnect is in
/// progress. Each statement runs autocommit; no transaction ever spans a
/// reconnect.
pub struct ConnectionManager {
    db: SourceDbConfig,
    engine: EngineConfig,
    connect_retry: RetryExecutor,
    inner: Mutex<Inner>,
}

impl ConnectionManager {
    pub fn new(db: SourceDbConfig, engine: EngineConfig) -> Self {
        let connect_retry = RetryExecutor::new(RetryPolicy::from_engine(&engine));
        Self {
            db,
            engine,
            connect_retry,
            inner: Mutex::new(Inner {
                state: ConnectionState::Disconnected,
                client: None,
                driver: None,
                last_activity: Instant::now(),
            }),
        }
    }

    fn pg_config(&self) -> tokio_postgres::Config {
        let mut cfg = tokio_postgres::Config::new();
        cfg.dbname(&self.db.name)
            .host(&self.db.host)
            .port(self.db.port)
            .user(&self.db.user)
            .password(&self.db.password)
            .connect_timeout(self.engine.connect_timeout())
            .keepalives(true)
            .keepalives_idle(self.engine.keepalive_idle())
            .keepalives_interval(self.engine.keepalive_interval())
            .keepalives_retries(self.engine.keepalive_retries);
        cfg
    }

    fn transition(&self, inner: &mut Inner, next: ConnectionState) {
        if inner.state != next {
            info!(
                "source connection [{}]: {:?} -> {:?}",
                self.db.name, inner.state, next
            );
            inner.state = next;
        }
    }

    async fn establish(&self) -> Result<(Client, tokio::task::JoinHandle<()>)> {
        let (client, connection) = self.pg_config().connect(NoTls).await?;
        let db_name = self.db.name.clone();
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!("source connection [{}] closed: {}", db_name, e);
            }
        });
        client.simple_query("SELECT 1").await?;
        Ok((client, driver))
    }

    /// Tear down the session and establish a new one under the reconnect
    /// retry budget. Exhausting the budget is fatal for the current table
    /// read, not for the whole run: the caller decides.
    async fn reconnect_locked(&self, inner: &mut Inner) -> Result<()> {
        if let Some(driver) = inner.driver.take() {
            driver.abort();
        }
        inner.client = None;
        self.transition(inner, ConnectionState::Connecting);

        match self
            .connect_retry
            .execute("source connect", || self.establish())
            .await
        {
            Ok((client, driver)) => {
                inner.client = Some(client);
                inner.driver = Some(driver);
                inner.last_activity = Instant::now();
                self.transition(inner, ConnectionState::Connected);
                debug!(
                    "connected to source database [{}] at {}:{}",
                    self.db.name, self.db.host, self.db.port
                );
                Ok(())
            }
            Err(err) => {
                self.transition(inner, ConnectionState::Disconnected);
                Err(MigrateError::Connection(format!(
                    "cannot connect to source database [{}]: {}",
                    self.db.name, err
                )))
            }
        }
    }

    /// Make sure the session is usable: connect or reconnect as needed,
    /// and ping it when it has sat idle past the keepalive window.
    async fn ensure_ready(&self, inner: &mut Inner) -> Result<()> {
        match inner.state {
            ConnectionState::Connected => {
                if inner.last_activity.elapsed() >= self.engine.keepalive_idle() {
                    self.ping_locked(inner).await?;
                }
                Ok(())
            }
            _ => self.reconnect_locked(inner).await,
        }
    }

    async fn ping_locked(&self, inner: &mut Inner) -> Result<()> {
        debug!("pinging idle source connection [{}]", self.db.name);
        let alive = match inner.client.as_ref() {
            Some(client) => client.simple_query("SELECT 1").await.is_ok(),
            None => false,
        };
        if alive {
            inner.last_activity = Instant::now();
            return Ok(());
        }
        self.transition(inner, ConnectionState::Degraded);
        self.reconnect_locked(inner).await
    }

    /// Ping the session, reconnecting if the ping fails.
    pub async fn keepalive(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            ConnectionState::Connected => self.ping_locked(&mut inner).await,
            _ => self.reconnect_locked(&mut inner).await,
        }
    }

    /// Force a fresh session on the next operation.
    pub async fn reconnect(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.reconnect_locked(&mut inner).await
    }

    /// Current lifecycle state, for diagnostics.
    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.state
    }

    /// Run one SELECT and return the raw rows.
    ///
    /// A transport-level failure degrades the session so the next caller
    /// reconnects; the error itself still surfaces to this caller, whose
    /// retry policy decides what happens next.
    pub async fn query(&self, sql: &str) -> Result<Vec<tokio_postgres::Row>> {
        let mut inner = self.inner.lock().await;
        self.ensure_ready(&mut inner).await?;
        let client = inner
            .client
            .as_ref()
            .ok_or_else(|| MigrateError::Connection("no usable source session".into()))?;
        match client.query(sql, &[]).await {
            Ok(rows) => {
                inner.last_activity = Instant::now();
                Ok(rows)
            }
            Err(err) => {
                if err.is_closed() || err.as_db_error().is_none() {
                    self.transition(&mut inner, ConnectionState::Degraded);
                }
                Err(err.into())
            }
        }
    }

    /// Run one single-value SELECT (counts, ids).
    pub async fn query_scalar_i64(&self, sql: &str) -> Result<i64> {
        let rows = self.query(sql).await?;
        let row = rows
            .first()
            .ok_or_else(|| MigrateError::Connection(format!("no result for: {}", sql)))?;
        Ok(row.try_get::<_, i64>(0)?)
    }

    /// List insertable tables in the public schema of the source.
    pub async fn list_tables(&self) -> Result<Vec<String>> {
        let rows = self
            .query(
                "SELECT table_name FROM information_schema.tables \
                 WHERE is_insertable_into = 'YES' AND table_schema = 'public' \
                 ORDER BY table_name",
            )
            .await?;
        let mut names = Vec::with_capacity(rows.len());
        for row in &rows {
            names.push(row.try_get::<_, String>(0)?);
        }
        Ok(names)
    }

    /// Row count of one table.
    pub async fn table_row_count(&self, table: &str) -> Result<i64> {
        self.query_scalar_i64(&format!("SELECT COUNT(*) FROM {}", quote_ident(table)))
            .await
    }

    /// Close the session.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        if let Some(driver) = inner.driver.take() {
            driver.abort();
        }
        inner.client = None;
        self.transition(&mut inner, ConnectionState::Disconnected);
    }
}

/// Quote a PostgreSQL identifier. Some exported table names are
/// uppercase, so every identifier gets quoted.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceDbConfig;

    fn unreachable_manager() -> ConnectionManager {
        let db = SourceDbConfig {
            name: "clarin-dspace".into(),
            host: "127.0.0.1".into(),
            // Nothing listens here.
            port: 1,
            user: "postgres".into(),
            password: "dspace".into(),
        };
        let engine = EngineConfig {
            max_retries: 1,
            retry_base_delay_secs: 0,
            connect_timeout_secs: 1,
            ..EngineConfig::default()
        };
        ConnectionManager::new(db, engine)
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("item"), "\"item\"");
        assert_eq!(quote_ident("Weird\"Name"), "\"Weird\"\"Name\"");
    }

    #[tokio::test]
    async fn test_starts_disconnected() {
        let manager = unreachable_manager();
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces_connection_error() {
        let manager = unreachable_manager();
        let err = manager.query("SELECT 1").await.unwrap_err();
        assert!(matches!(err, MigrateError::Connection(_)));
        // Reconnect budget exhausted: back to disconnected, not stuck
        // in connecting.
        assert_eq!(manager.state().await, ConnectionState::Disconnected);
    }
}

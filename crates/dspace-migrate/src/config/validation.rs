//! Fail-fast configuration validation.

use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::resolve::FieldSpec;

/// Validate the whole configuration.
///
/// Anything wrong here aborts the run before a single row is read.
pub fn validate(config: &Config) -> Result<()> {
    if config.source.name.is_empty() {
        return Err(MigrateError::Config("source.name must not be empty".into()));
    }
    if config.source.host.is_empty() {
        return Err(MigrateError::Config("source.host must not be empty".into()));
    }

    if config.backend.endpoint.is_empty() {
        return Err(MigrateError::Config(
            "backend.endpoint must not be empty".into(),
        ));
    }
    if !config.backend.endpoint.starts_with("http://")
        && !config.backend.endpoint.starts_with("https://")
    {
        return Err(MigrateError::Config(format!(
            "backend.endpoint must be an http(s) URL, got '{}'",
            config.backend.endpoint
        )));
    }

    if config.engine.chunk_size == 0 {
        return Err(MigrateError::Config(
            "engine.chunk_size must be greater than zero".into(),
        ));
    }
    if config.engine.max_retries == 0 {
        return Err(MigrateError::Config(
            "engine.max_retries must be at least 1".into(),
        ));
    }

    // An explicitly configured but empty candidate list is a mistake,
    // never a silent default.
    if let Some(fields) = &config.version_date_fields {
        if fields.is_empty() {
            return Err(MigrateError::Config(
                "version_date_fields must not be empty when configured".into(),
            ));
        }
        for field in fields {
            FieldSpec::parse(field)?;
        }
    }

    if !config.test.tables.is_empty() && config.test.fixture.is_none() {
        return Err(MigrateError::Config(
            "test.fixture is required when test.tables is set".into(),
        ));
    }

    Ok(())
}

//! Declarative table-to-entity mappings.
//!
//! One pump implementation consumes these instead of per-table bespoke
//! control flow: which column is the id, which columns become payload
//! fields, which become metadata, when a row is skipped, and which
//! derived fields are resolved from candidate lists.

use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::policy::IgnoreCategory;
use crate::resolve::{FieldResolver, FieldSpec};

/// Source column copied into a named payload field.
#[derive(Debug, Clone)]
pub struct ColumnMapping {
    pub source: String,
    pub target: String,
}

/// Source column carried as a metadata field value.
#[derive(Debug, Clone)]
pub struct MetadataColumn {
    pub source: String,
    pub field: FieldSpec,
}

/// Skip the whole row when the named column's value is ignored in the
/// given category.
#[derive(Debug, Clone)]
pub struct SkipRule {
    pub category: IgnoreCategory,
    pub column: String,
}

/// Payload field resolved from an ordered candidate list over the
/// record's metadata.
#[derive(Debug, Clone)]
pub struct DerivedField {
    pub target: String,
    pub resolver: FieldResolver,
    /// Normalize the resolved value as a date before use.
    pub as_date: bool,
}

/// Everything the pump needs to migrate one table.
#[derive(Debug, Clone)]
pub struct TableMapping {
    /// Source table name.
    pub table: String,

    /// Immutable primary key column; read order and entity identity.
    pub id_column: String,

    /// Entity type submitted to the target (import endpoint suffix).
    pub entity_type: String,

    pub columns: Vec<ColumnMapping>,
    pub metadata: Vec<MetadataColumn>,
    pub skip: Option<SkipRule>,
    pub derived: Vec<DerivedField>,
}

impl TableMapping {
    pub fn new(table: &str, id_column: &str, entity_type: &str) -> Self {
        Self {
            table: table.to_string(),
            id_column: id_column.to_string(),
            entity_type: entity_type.to_string(),
            columns: Vec::new(),
            metadata: Vec::new(),
            skip: None,
            derived: Vec::new(),
        }
    }

    pub fn column(mut self, source: &str, target: &str) -> Self {
        self.columns.push(ColumnMapping {
            source: source.to_string(),
            target: target.to_string(),
        });
        self
    }

    pub fn metadata_column(mut self, source: &str, field: FieldSpec) -> Self {
        self.metadata.push(MetadataColumn {
            source: source.to_string(),
            field,
        });
        self
    }

    pub fn skip_when_ignored(mut self, category: IgnoreCategory, column: &str) -> Self {
        self.skip = Some(SkipRule {
            category,
            column: column.to_string(),
        });
        self
    }

    pub fn derived_date(mut self, target: &str, resolver: FieldResolver) -> Self {
        self.derived.push(DerivedField {
            target: target.to_string(),
            resolver,
            as_date: true,
        });
        self
    }
}

/// The ordered mapping set for a CLARIN-DSpace source.
///
/// Order matters: later tables reference entities migrated by earlier
/// ones, and the engine migrates strictly in this sequence.
///
/// Fails fast when `version_date_fields` is not configured, because the
/// item mapping derives its version date from that candidate list.
pub fn standard_mappings(config: &Config) -> Result<Vec<TableMapping>> {
    let version_date_fields = config.version_date_fields.as_ref().ok_or_else(|| {
        MigrateError::Config(
            "version_date_fields is required before item version migration".into(),
        )
    })?;
    let version_date = FieldResolver::from_names(version_date_fields)?;

    Ok(vec![
        TableMapping::new("handle", "handle_id", "handle")
            .column("handle", "handle")
            .column("resource_type_id", "resourceTypeId")
            .column("resource_id", "resourceId"),
        TableMapping::new("epersongroup", "eperson_group_id", "group"),
        TableMapping::new("eperson", "eperson_id", "eperson")
            .column("email", "email")
            .column("netid", "netid")
            .column("can_log_in", "canLogIn")
            .column("require_certificate", "requireCertificate")
            .column("self_registered", "selfRegistered")
            .column("last_active", "lastActive")
            .skip_when_ignored(IgnoreCategory::Eperson, "eperson_id"),
        TableMapping::new("community", "community_id", "community")
            .column("logo_bitstream_id", "logoBitstreamId"),
        TableMapping::new("collection", "collection_id", "collection")
            .column("logo_bitstream_id", "logoBitstreamId"),
        TableMapping::new("item", "item_id", "item")
            .column("submitter_id", "submitterId")
            .column("in_archive", "inArchive")
            .column("withdrawn", "withdrawn")
            .column("discoverable", "discoverable")
            .column("owning_collection", "owningCollection")
            .column("last_modified", "lastModified")
            .metadata_column("dc_date_issued", FieldSpec::parse("dc.date.issued")?)
            .metadata_column("dc_date_accessioned", FieldSpec::parse("dc.date.accessioned")?)
            .derived_date("versionDate", version_date),
        TableMapping::new("user_metadata", "user_metadata_id", "usermetadata")
            .column("eperson_id", "epersonId")
            .column("metadata_key", "metadataKey")
            .column("metadata_value", "metadataValue")
            .column("transaction_id", "transactionId")
            .skip_when_ignored(IgnoreCategory::Eperson, "eperson_id"),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn config_with_version_dates() -> Config {
        Config::from_yaml(
            r#"
source:
  name: clarin-dspace
  host: 127.0.0.1
  user: postgres
  password: dspace
backend:
  endpoint: http://localhost:8080/server/api/
  user: admin@example.com
  password: admin
version_date_fields: [dc.date.issued, dc.date.accessioned]
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_standard_mappings_order() {
        let mappings = standard_mappings(&config_with_version_dates()).unwrap();
        let tables: Vec<&str> = mappings.iter().map(|m| m.table.as_str()).collect();
        // Items come after the entities they reference.
        let item_pos = tables.iter().position(|t| *t == "item").unwrap();
        assert!(tables.iter().position(|t| *t == "eperson").unwrap() < item_pos);
        assert!(tables.iter().position(|t| *t == "collection").unwrap() < item_pos);
        assert_eq!(*tables.last().unwrap(), "user_metadata");
    }

    #[test]
    fn test_item_mapping_has_version_date() {
        let mappings = standard_mappings(&config_with_version_dates()).unwrap();
        let item = mappings.iter().find(|m| m.table == "item").unwrap();
        assert_eq!(item.derived.len(), 1);
        assert_eq!(item.derived[0].target, "versionDate");
        assert_eq!(
            item.derived[0].resolver.candidate_names(),
            vec!["dc.date.issued", "dc.date.accessioned"]
        );
    }

    #[test]
    fn test_missing_version_date_fields_fails_fast() {
        let mut config = config_with_version_dates();
        config.version_date_fields = None;
        assert!(matches!(
            standard_mappings(&config),
            Err(MigrateError::Config(_))
        ));
    }
}

//! Ignore rules applied during migration.

use std::collections::HashSet;

use crate::config::IgnoreConfig;

/// Named ignore categories. Categories are independent: a value ignored in
/// one is not ignored in another unless separately configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IgnoreCategory {
    /// License-icon labels whose missing icon file is not an error.
    MissingIcon,
    /// Person identifiers excluded from migration.
    Eperson,
    /// Metadata field names dropped from payloads before submission.
    MetadataField,
}

/// Immutable membership filter built once from configuration and passed
/// into each pump. Read-only during migration; safe to consult per row.
#[derive(Debug, Clone, Default)]
pub struct PolicyFilter {
    missing_icons: HashSet<String>,
    epersons: HashSet<String>,
    fields: HashSet<String>,
}

impl PolicyFilter {
    pub fn from_config(ignore: &IgnoreConfig) -> Self {
        Self {
            missing_icons: ignore.missing_icons.iter().cloned().collect(),
            epersons: ignore.epersons.iter().map(|id| id.to_string()).collect(),
            fields: ignore.fields.iter().cloned().collect(),
        }
    }

    /// Membership test for one category.
    pub fn should_ignore(&self, category: IgnoreCategory, value: &str) -> bool {
        match category {
            IgnoreCategory::MissingIcon => self.missing_icons.contains(value),
            IgnoreCategory::Eperson => self.epersons.contains(value),
            IgnoreCategory::MetadataField => self.fields.contains(value),
        }
    }

    /// Whether a missing icon for `label` should be suppressed rather than
    /// reported.
    pub fn suppress_missing_icon(&self, label: &str) -> bool {
        self.should_ignore(IgnoreCategory::MissingIcon, label)
    }
}

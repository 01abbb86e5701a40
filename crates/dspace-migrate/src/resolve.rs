//! Candidate-field resolution for derived attributes.
//!
//! A derived attribute (the item version date) is resolved by walking an
//! ordered candidate list and taking the first non-empty metadata value.
//! The candidate list must be configured up front; an empty list is a
//! configuration error at startup, not a per-row surprise.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::error::{MigrateError, Result};

/// A dotted metadata field name: `element`, `element.qualifier`, or
/// `schema.element.qualifier`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    raw: String,
}

impl FieldSpec {
    /// Parse a dotted field name of one to three non-empty segments.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.is_empty() || parts.len() > 3 || parts.iter().any(|p| p.is_empty()) {
            return Err(MigrateError::Config(format!(
                "invalid metadata field name '{}'",
                raw
            )));
        }
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Schema prefix, present only in the three-segment form.
    pub fn schema(&self) -> Option<&str> {
        let parts: Vec<&str> = self.raw.split('.').collect();
        match parts.len() {
            3 => Some(parts[0]),
            _ => None,
        }
    }

    pub fn element(&self) -> &str {
        let parts: Vec<&str> = self.raw.split('.').collect();
        match parts.len() {
            3 => parts[1],
            _ => parts[0],
        }
    }

    pub fn qualifier(&self) -> Option<&str> {
        let parts: Vec<&str> = self.raw.split('.').collect();
        match parts.len() {
            2 => Some(parts[1]),
            3 => Some(parts[2]),
            _ => None,
        }
    }
}

impl std::fmt::Display for FieldSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Resolves the first present value among an ordered candidate list.
#[derive(Debug, Clone)]
pub struct FieldResolver {
    candidates: Vec<FieldSpec>,
}

impl FieldResolver {
    /// Build a resolver. An empty candidate list fails here, at startup.
    pub fn new(candidates: Vec<FieldSpec>) -> Result<Self> {
        if candidates.is_empty() {
            return Err(MigrateError::Config(
                "candidate field list must not be empty".into(),
            ));
        }
        Ok(Self { candidates })
    }

    /// Build a resolver from dotted field names.
    pub fn from_names(names: &[String]) -> Result<Self> {
        let candidates = names
            .iter()
            .map(|n| FieldSpec::parse(n))
            .collect::<Result<Vec<_>>>()?;
        Self::new(candidates)
    }

    pub fn candidates(&self) -> &[FieldSpec] {
        &self.candidates
    }

    /// Candidate names, for diagnostics.
    pub fn candidate_names(&self) -> Vec<String> {
        self.candidates.iter().map(|c| c.raw.clone()).collect()
    }

    /// Walk candidates in configured order and return the first non-empty
    /// value on the entity, with the candidate that supplied it.
    ///
    /// Resolution order is driven strictly by the candidate list, never by
    /// map iteration order.
    pub fn resolve<'a>(
        &self,
        entity: &str,
        metadata: &'a BTreeMap<String, Vec<String>>,
    ) -> Result<(&'a str, &FieldSpec)> {
        for candidate in &self.candidates {
            if let Some(values) = metadata.get(candidate.as_str()) {
                if let Some(value) = values.iter().find(|v| !v.trim().is_empty()) {
                    return Ok((value.trim(), candidate));
                }
            }
        }
        Err(MigrateError::UnresolvedField {
            entity: entity.to_string(),
            candidates: self.candidate_names(),
        })
    }
}

/// Normalize a raw date value to `YYYY-MM-DD`.
///
/// Accepted forms, per what the source repositories actually hold:
/// `YYYY-MM-DD`, `YYYY-MM` (day defaults to 01), `YYYY` (January 1st),
/// and `DD.MM.YYYY`. Returns `None` for anything else or for calendar
/// nonsense like month 13.
pub fn normalize_date(raw: &str) -> Option<String> {
    let raw = raw.trim();

    if raw.contains('.') {
        let parts: Vec<&str> = raw.split('.').collect();
        if parts.len() != 3 {
            return None;
        }
        let day: u32 = parts[0].parse().ok()?;
        let month: u32 = parts[1].parse().ok()?;
        let year: i32 = parts[2].parse().ok()?;
        return NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format("%Y-%m-%d").to_string());
    }

    let parts: Vec<&str> = raw.split('-').collect();
    match parts.len() {
        1 => {
            if parts[0].len() != 4 {
                return None;
            }
            let year: i32 = parts[0].parse().ok()?;
            NaiveDate::from_ymd_opt(year, 1, 1).map(|d| d.format("%Y-%m-%d").to_string())
        }
        2 => {
            let year: i32 = parts[0].parse().ok()?;
            let month: u32 = parts[1].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, 1).map(|d| d.format("%Y-%m-%d").to_string())
        }
        3 => {
            let year: i32 = parts[0].parse().ok()?;
            let month: u32 = parts[1].parse().ok()?;
            let day: u32 = parts[2].parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format("%Y-%m-%d").to_string())
        }
        _ => None,
    }
}

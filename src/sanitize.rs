//! Identifier sanitization and the original ↔ storage column mapping.
//!
//! Users name columns and files however they like ("Cpu usage (%)",
//! "disk-space.csv"). Storage only ever sees the sanitized form, and the
//! per-table [`ColumnMapping`] is the single place where the two meet.

use crate::error::{MonitorError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

lazy_static! {
    static ref NON_WORD_RUN: Regex = Regex::new(r"\W+").expect("static pattern compiles");
}

/// Replace every maximal run of non-word characters with a single underscore.
pub fn sanitize_identifier(name: &str) -> String {
    NON_WORD_RUN.replace_all(name, "_").into_owned()
}

/// Bidirectional mapping between original (display) column names and their
/// sanitized storage names for one table. Built once per ingest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMapping {
    /// Original headers in file order
    originals: Vec<String>,
    to_storage: HashMap<String, String>,
    to_original: HashMap<String, String>,
}

impl ColumnMapping {
    /// Build the mapping from the headers of an uploaded file.
    ///
    /// Fails when two distinct headers sanitize to the same identifier, since
    /// the mapping could no longer be inverted.
    pub fn from_headers<S: AsRef<str>>(headers: &[S]) -> Result<Self> {
        let mut mapping = Self::default();

        for header in headers {
            let original = header.as_ref().to_string();
            if mapping.to_storage.contains_key(&original) {
                return Err(MonitorError::DuplicateColumn {
                    storage: sanitize_identifier(&original),
                    other: original.clone(),
                    original,
                });
            }

            let storage = sanitize_identifier(&original);
            if let Some(other) = mapping.to_original.get(&storage) {
                return Err(MonitorError::DuplicateColumn {
                    original,
                    other: other.clone(),
                    storage,
                });
            }

            mapping.to_storage.insert(original.clone(), storage.clone());
            mapping.to_original.insert(storage, original.clone());
            mapping.originals.push(original);
        }

        Ok(mapping)
    }

    pub fn storage_name(&self, original: &str) -> Option<&str> {
        self.to_storage.get(original).map(String::as_str)
    }

    pub fn original_name(&self, storage: &str) -> Option<&str> {
        self.to_original.get(storage).map(String::as_str)
    }

    pub fn original_columns(&self) -> &[String] {
        &self.originals
    }

    /// Storage names in header order
    pub fn storage_columns(&self) -> Vec<String> {
        self.originals
            .iter()
            .filter_map(|o| self.to_storage.get(o).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.originals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.originals.is_empty()
    }
}

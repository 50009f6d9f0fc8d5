//! Properties file loading
//!
//! A run is described by a TOML properties file naming the metadata
//! database, the per-image table and its key/plate columns, plus named
//! SQL filters and group queries. The parsed value is threaded explicitly
//! through the database layer and the dispatcher; there is no process-wide
//! configuration singleton.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Parsed properties file
#[derive(Debug, Clone, Deserialize)]
pub struct Properties {
    /// Metadata database, resolved relative to the properties file
    pub db_path: PathBuf,
    /// Table with one row per image
    pub image_table: String,
    /// Columns forming the image primary key, in order
    pub image_key_columns: Vec<String>,
    /// Column holding the plate of each image
    pub plate_column: String,
    /// Named SQL predicates over the image table
    #[serde(default)]
    pub filters: BTreeMap<String, FilterDef>,
    /// Named group queries
    #[serde(default)]
    pub groups: BTreeMap<String, GroupDef>,
}

/// A named boolean SQL predicate over the image table
#[derive(Debug, Clone, Deserialize)]
pub struct FilterDef {
    pub predicate: String,
}

/// A named SQL query selecting the image key columns followed by one or
/// more group label columns
#[derive(Debug, Clone, Deserialize)]
pub struct GroupDef {
    pub query: String,
}

impl Properties {
    /// Load and validate a properties file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "cannot read properties file {}: {e}",
                path.display()
            ))
        })?;
        let mut props: Properties = toml::from_str(&text).map_err(|e| {
            Error::Config(format!(
                "invalid properties file {}: {e}",
                path.display()
            ))
        })?;

        if props.image_key_columns.is_empty() {
            return Err(Error::Config(format!(
                "properties file {} defines no image_key_columns",
                path.display()
            )));
        }

        // db_path is relative to the properties file, like the rest of a
        // run's on-disk layout.
        if props.db_path.is_relative() {
            if let Some(parent) = path.parent() {
                props.db_path = parent.join(&props.db_path);
            }
        }

        Ok(props)
    }

    /// Look up a named filter, reporting the offending name on failure.
    pub fn filter(&self, name: &str) -> Result<&FilterDef> {
        self.filters.get(name).ok_or_else(|| {
            Error::Config(format!(
                "filter '{name}' is not defined in the properties file"
            ))
        })
    }

    /// Look up a named group query, reporting the offending name on failure.
    pub fn group(&self, name: &str) -> Result<&GroupDef> {
        self.groups.get(name).ok_or_else(|| {
            Error::Config(format!(
                "group '{name}' is not defined in the properties file"
            ))
        })
    }
}

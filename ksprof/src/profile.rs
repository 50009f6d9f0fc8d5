//! Assembled profile matrix and its CSV artifact
//!
//! The profile is the run's final artifact: one row per completed group,
//! one column per feature, every cell a signed divergence. Groups whose
//! tasks failed are omitted from the matrix; the dispatcher's failure
//! report is the record of what is absent.

use ksprof_common::{Error, GroupKey, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io;
use std::path::Path;

/// Immutable group x feature matrix of signed divergence scores.
#[derive(Debug, Clone, PartialEq)]
pub struct Profiles {
    group_name: String,
    feature_names: Vec<String>,
    rows: BTreeMap<GroupKey, Vec<f64>>,
}

impl Profiles {
    /// Build the final matrix from completed results.
    ///
    /// Fails when no group completed (an empty profile is not a useful
    /// artifact) or when any row disagrees with the feature schema.
    pub fn assemble(
        group_name: &str,
        feature_names: Vec<String>,
        rows: BTreeMap<GroupKey, Vec<f64>>,
    ) -> Result<Self> {
        if rows.is_empty() {
            return Err(Error::Assembly(format!(
                "no groups completed for grouping '{group_name}'"
            )));
        }
        for (key, row) in &rows {
            if row.len() != feature_names.len() {
                return Err(Error::Assembly(format!(
                    "group {key} produced {} values, schema has {} features",
                    row.len(),
                    feature_names.len()
                )));
            }
        }
        Ok(Self {
            group_name: group_name.to_string(),
            feature_names,
            rows,
        })
    }

    pub fn group_name(&self) -> &str {
        &self.group_name
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Rows in canonical group-key order.
    pub fn rows(&self) -> &BTreeMap<GroupKey, Vec<f64>> {
        &self.rows
    }

    /// Write the artifact to a file.
    pub fn save(&self, path: &Path) -> Result<()> {
        self.save_to(File::create(path)?)
    }

    /// Write the artifact to any writer (stdout when no output path is
    /// configured). Header row is the grouping name followed by the
    /// feature names; each data row is the group key followed by its
    /// scores. Values use the shortest representation that parses back
    /// to the identical f64, so the artifact round-trips losslessly.
    pub fn save_to<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut out = csv::Writer::from_writer(writer);
        let mut header = Vec::with_capacity(self.feature_names.len() + 1);
        header.push(self.group_name.clone());
        header.extend(self.feature_names.iter().cloned());
        out.write_record(&header).map_err(csv_error)?;

        for (key, row) in &self.rows {
            let mut record = Vec::with_capacity(row.len() + 1);
            record.push(key.to_string());
            record.extend(row.iter().map(|v| v.to_string()));
            out.write_record(&record).map_err(csv_error)?;
        }
        out.flush()?;
        Ok(())
    }

    /// Read an artifact back, inverse of `save`.
    pub fn load(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path).map_err(csv_error)?;
        let header = reader.headers().map_err(csv_error)?.clone();
        let mut fields = header.iter();
        let group_name = fields
            .next()
            .ok_or_else(|| Error::Assembly("artifact has an empty header".into()))?
            .to_string();
        let feature_names: Vec<String> = fields.map(str::to_string).collect();

        let mut rows = BTreeMap::new();
        for record in reader.records() {
            let record = record.map_err(csv_error)?;
            let mut fields = record.iter();
            let key = GroupKey::parse(fields.next().ok_or_else(|| {
                Error::Assembly("artifact has an empty data row".into())
            })?);
            let row = fields
                .map(|cell| {
                    cell.parse::<f64>().map_err(|e| {
                        Error::Assembly(format!("group {key}: bad numeric cell '{cell}': {e}"))
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            rows.insert(key, row);
        }

        Self::assemble(&group_name, feature_names, rows)
    }
}

fn csv_error(e: csv::Error) -> Error {
    Error::Assembly(format!("artifact I/O failed: {e}"))
}

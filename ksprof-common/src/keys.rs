//! Opaque identifier types
//!
//! Images, plates and groups are addressed by opaque keys taken from the
//! metadata database. The profiler never interprets them; it only hashes,
//! orders and displays them.

use std::fmt;

/// Primary-key tuple addressing one image record.
///
/// Displayed with `-` between parts (e.g. `1-42`), which is also the file
/// stem used by the feature cache.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageKey(Vec<i64>);

impl ImageKey {
    pub fn new(parts: Vec<i64>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[i64] {
        &self.0
    }
}

impl fmt::Display for ImageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                write!(f, "-")?;
            }
            write!(f, "{part}")?;
            first = false;
        }
        Ok(())
    }
}

/// Key of one physical assay plate.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlateId(String);

impl PlateId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PlateId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PlateId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for PlateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Label tuple naming one experimental group.
///
/// Groups sort by their labels; `BTreeMap<GroupKey, _>` ordering is the
/// canonical row order of the assembled profile. Displayed with `|`
/// between labels, the form used in the saved artifact.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey(Vec<String>);

impl GroupKey {
    pub fn new(labels: Vec<String>) -> Self {
        Self(labels)
    }

    pub fn labels(&self) -> &[String] {
        &self.0
    }

    /// Inverse of `Display`, used when re-loading a saved artifact.
    pub fn parse(s: &str) -> Self {
        Self(s.split('|').map(str::to_string).collect())
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("|"))
    }
}

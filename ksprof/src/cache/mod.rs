//! Normalized feature cache client
//!
//! The cache holds one normalized-feature row per image, written once by
//! the cache-building tooling and read concurrently by worker tasks.
//! A handle is only a directory path: construction does no I/O, so every
//! dispatched task builds its own handle instead of sharing a live one
//! across the dispatch boundary.
//!
//! On-disk layout under the cache directory:
//!
//! ```text
//! colnames.txt                          ordered feature names, one per line
//! plate_index.json                      image key -> plate id
//! images/<image>.row                    little-endian f64, one per feature
//! normalization/robust_linear/<plate>.json   per-plate rescale parameters
//! ```

pub mod normalization;

pub use normalization::{Normalization, RobustLinearParams};

use ksprof_common::{Error, ImageKey, PlateId, Result};
use ndarray::Array2;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const COLNAMES_FILE: &str = "colnames.txt";
const PLATE_INDEX_FILE: &str = "plate_index.json";
const IMAGE_DIR: &str = "images";
const NORMALIZATION_DIR: &str = "normalization";

/// Cheap, re-constructible handle on a cache directory.
#[derive(Debug, Clone)]
pub struct CacheHandle {
    dir: PathBuf,
}

impl CacheHandle {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    /// The ordered feature-name list every row in this cache follows.
    pub fn feature_names(&self) -> Result<Vec<String>> {
        let path = self.dir.join(COLNAMES_FILE);
        let text = fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!(
                "cache at {} has no readable {COLNAMES_FILE}: {e}",
                self.dir.display()
            ))
        })?;
        Ok(text.lines().map(str::to_string).collect())
    }

    /// Load the feature matrix for `images`, one row per image in input
    /// order, under the given normalization strategy.
    ///
    /// Deterministic for a fixed cache state; any image without a cached
    /// row fails with `CacheMiss` naming the image.
    pub fn load(
        &self,
        images: &[ImageKey],
        normalization: Normalization,
    ) -> Result<(Array2<f64>, Vec<String>)> {
        let columns = self.feature_names()?;
        let mut data = Array2::zeros((images.len(), columns.len()));

        let plate_index = match normalization {
            Normalization::Raw => HashMap::new(),
            Normalization::RobustLinear => self.plate_index()?,
        };
        let mut params_by_plate: HashMap<PlateId, RobustLinearParams> = HashMap::new();

        for (r, image) in images.iter().enumerate() {
            let mut row = self.read_row(image, columns.len())?;
            if normalization == Normalization::RobustLinear {
                let plate = plate_index.get(&image.to_string()).ok_or_else(|| {
                    Error::CacheMiss {
                        image: image.clone(),
                    }
                })?;
                let plate = PlateId::from(plate.as_str());
                let params = match params_by_plate.entry(plate.clone()) {
                    std::collections::hash_map::Entry::Occupied(entry) => entry.into_mut(),
                    std::collections::hash_map::Entry::Vacant(entry) => {
                        entry.insert(self.robust_linear_params(&plate)?)
                    }
                };
                params.apply(&mut row)?;
            }
            for (c, value) in row.into_iter().enumerate() {
                data[[r, c]] = value;
            }
        }

        Ok((data, columns))
    }

    fn plate_index(&self) -> Result<HashMap<String, String>> {
        let path = self.dir.join(PLATE_INDEX_FILE);
        let text = fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!(
                "cache at {} has no readable {PLATE_INDEX_FILE}: {e}",
                self.dir.display()
            ))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            Error::Config(format!("corrupt {PLATE_INDEX_FILE}: {e}"))
        })
    }

    fn robust_linear_params(&self, plate: &PlateId) -> Result<RobustLinearParams> {
        let path = self
            .dir
            .join(NORMALIZATION_DIR)
            .join(Normalization::RobustLinear.as_str())
            .join(format!("{plate}.json"));
        let text = fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!(
                "no robust-linear parameters for plate {plate}: {e}"
            ))
        })?;
        serde_json::from_str(&text).map_err(|e| {
            Error::Config(format!(
                "corrupt normalization parameters for plate {plate}: {e}"
            ))
        })
    }

    fn read_row(&self, image: &ImageKey, width: usize) -> Result<Vec<f64>> {
        let path = self.dir.join(IMAGE_DIR).join(format!("{image}.row"));
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::CacheMiss {
                    image: image.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        if bytes.len() != width * 8 {
            return Err(Error::SchemaMismatch {
                detail: format!(
                    "row for image {image} holds {} values, cache schema has {width}",
                    bytes.len() / 8
                ),
            });
        }
        let mut row = Vec::with_capacity(width);
        for chunk in bytes.chunks_exact(8) {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(chunk);
            row.push(f64::from_le_bytes(buf));
        }
        Ok(row)
    }
}

/// Writes the cache layout `CacheHandle` reads. Used by the
/// cache-building tooling and the test fixtures.
#[derive(Debug)]
pub struct CacheWriter {
    dir: PathBuf,
    width: usize,
    plate_index: HashMap<String, String>,
}

impl CacheWriter {
    /// Create the cache directory skeleton and record the feature schema.
    pub fn create(dir: &Path, feature_names: &[String]) -> Result<Self> {
        fs::create_dir_all(dir.join(IMAGE_DIR))?;
        fs::create_dir_all(
            dir.join(NORMALIZATION_DIR)
                .join(Normalization::RobustLinear.as_str()),
        )?;
        fs::write(dir.join(COLNAMES_FILE), feature_names.join("\n"))?;
        Ok(Self {
            dir: dir.to_path_buf(),
            width: feature_names.len(),
            plate_index: HashMap::new(),
        })
    }

    /// Store one image's feature row and its plate membership.
    pub fn put_image(&mut self, image: &ImageKey, plate: &PlateId, row: &[f64]) -> Result<()> {
        if row.len() != self.width {
            return Err(Error::SchemaMismatch {
                detail: format!(
                    "row for image {image} holds {} values, cache schema has {}",
                    row.len(),
                    self.width
                ),
            });
        }
        let mut bytes = Vec::with_capacity(row.len() * 8);
        for value in row {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        fs::write(self.dir.join(IMAGE_DIR).join(format!("{image}.row")), bytes)?;
        self.plate_index
            .insert(image.to_string(), plate.to_string());
        Ok(())
    }

    /// Store the robust-linear rescale parameters for one plate.
    pub fn put_robust_linear_params(
        &self,
        plate: &PlateId,
        params: &RobustLinearParams,
    ) -> Result<()> {
        let path = self
            .dir
            .join(NORMALIZATION_DIR)
            .join(Normalization::RobustLinear.as_str())
            .join(format!("{plate}.json"));
        let text = serde_json::to_string(params)
            .map_err(|e| Error::Config(format!("cannot encode parameters: {e}")))?;
        fs::write(path, text)?;
        Ok(())
    }

    /// Write the plate index and finish the cache.
    pub fn finish(self) -> Result<()> {
        let text = serde_json::to_string(&self.plate_index)
            .map_err(|e| Error::Config(format!("cannot encode plate index: {e}")))?;
        fs::write(self.dir.join(PLATE_INDEX_FILE), text)?;
        Ok(())
    }
}

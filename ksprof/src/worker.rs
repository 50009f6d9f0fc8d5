//! Per-group profile computation
//!
//! One call per group, pure and synchronous: load both populations from
//! the cache, check the integrity invariants, and run the signed
//! statistic down every feature column. Safe to execute on any worker —
//! the cache handle is built inside the call, so nothing live crosses
//! the dispatch boundary.

use crate::cache::{CacheHandle, Normalization};
use crate::stats::signed_ks_2samp;
use ksprof_common::{Error, ImageKey, Result};
use std::path::Path;
use tracing::{debug, warn};

/// Compute one group's feature-length vector of signed divergences.
///
/// Both loads use the same normalization strategy. Fails (for this group
/// only) when the two loads disagree on feature names, when the control
/// sample is smaller than the treatment sample, or when a feature column
/// has no finite values left after NaN exclusion.
pub fn compute_group_profile(
    cache_dir: &Path,
    normalization: Normalization,
    treatment: &[ImageKey],
    controls: &[ImageKey],
) -> Result<Vec<f64>> {
    let cache = CacheHandle::new(cache_dir);
    let (treated, columns) = cache.load(treatment, normalization)?;
    let (control, control_columns) = cache.load(controls, normalization)?;

    if columns != control_columns {
        return Err(Error::SchemaMismatch {
            detail: format!(
                "treatment load returned {} features, control load {}",
                columns.len(),
                control_columns.len()
            ),
        });
    }
    if treated.nrows() == 0 || control.nrows() < treated.nrows() {
        return Err(Error::InsufficientSample {
            controls: control.nrows(),
            treatments: treated.nrows(),
        });
    }

    debug!(
        treatment_images = treated.nrows(),
        control_images = control.nrows(),
        features = columns.len(),
        "computing group profile"
    );

    let mut profile = Vec::with_capacity(columns.len());
    for (j, name) in columns.iter().enumerate() {
        let control_column = control.column(j).to_vec();
        let treatment_column = treated.column(j).to_vec();
        let ks = match signed_ks_2samp(&control_column, &treatment_column) {
            Ok(ks) => ks,
            // Samples were non-empty going in, so an empty sample here
            // means NaN exclusion consumed a whole column.
            Err(Error::InsufficientSample { .. }) => {
                return Err(Error::NanOnlyColumn {
                    column: name.clone(),
                })
            }
            Err(e) => return Err(e),
        };
        if ks.control_excluded > 0 || ks.treatment_excluded > 0 {
            warn!(
                feature = name.as_str(),
                control_excluded = ks.control_excluded,
                treatment_excluded = ks.treatment_excluded,
                "NaN values excluded from statistic"
            );
        }
        profile.push(ks.statistic);
    }
    Ok(profile)
}

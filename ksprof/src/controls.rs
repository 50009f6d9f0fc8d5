//! Plate-local control resolution
//!
//! Each treatment group is compared against the control images on the
//! plates its own images sit on. The plate and control mappings are
//! queried once per run, before any group is resolved, and shared by
//! value with every dispatched task.

use ksprof_common::{Error, ImageKey, PlateId, Result};
use std::collections::{HashMap, HashSet};

/// How control images gathered across a group's treatment images are
/// combined.
///
/// `PerImageRepeat` concatenates each treatment image's plate controls,
/// so a plate contributing via N treatment images contributes its control
/// list N times. The repetition weights the control sample by plate
/// occupancy and is the default. `Deduplicate` collapses the list to
/// first-seen order for an unweighted control population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlPolicy {
    PerImageRepeat,
    Deduplicate,
}

/// Once-per-run lookup tables for control resolution.
#[derive(Debug, Clone)]
pub struct ControlMap {
    plate_by_image: HashMap<ImageKey, PlateId>,
    controls_by_plate: HashMap<PlateId, Vec<ImageKey>>,
}

impl ControlMap {
    pub fn new(
        plate_by_image: HashMap<ImageKey, PlateId>,
        controls_by_plate: HashMap<PlateId, Vec<ImageKey>>,
    ) -> Self {
        Self {
            plate_by_image,
            controls_by_plate,
        }
    }

    /// Resolve the control images for one group of treatment images.
    ///
    /// Fails with `MissingControls` (naming the plate) when a treatment
    /// image's plate has no controls under the configured filter, and
    /// with a configuration error when an image has no plate at all.
    pub fn resolve(
        &self,
        group_images: &[ImageKey],
        policy: ControlPolicy,
    ) -> Result<Vec<ImageKey>> {
        let mut controls = Vec::new();
        for image in group_images {
            let plate = self.plate_by_image.get(image).ok_or_else(|| {
                Error::Config(format!(
                    "image {image} has no plate in the metadata database"
                ))
            })?;
            let plate_controls = self
                .controls_by_plate
                .get(plate)
                .filter(|c| !c.is_empty())
                .ok_or_else(|| Error::MissingControls {
                    plate: plate.clone(),
                })?;
            controls.extend_from_slice(plate_controls);
        }

        if policy == ControlPolicy::Deduplicate {
            let mut seen = HashSet::new();
            controls.retain(|image| seen.insert(image.clone()));
        }

        Ok(controls)
    }
}

//! Shared fixtures for the integration tests

use ksprof::cache::CacheWriter;
use ksprof_common::{ImageKey, PlateId};
use std::path::Path;

/// Build a raw-normalization cache: every entry is (image, plate, row).
pub fn build_cache(dir: &Path, features: &[&str], entries: &[(ImageKey, &str, Vec<f64>)]) {
    let names: Vec<String> = features.iter().map(|f| f.to_string()).collect();
    let mut writer = CacheWriter::create(dir, &names).expect("cache skeleton");
    for (image, plate, row) in entries {
        writer
            .put_image(image, &PlateId::from(*plate), row)
            .expect("cache row");
    }
    writer.finish().expect("cache index");
}

pub fn image(n: i64) -> ImageKey {
    ImageKey::new(vec![0, n])
}

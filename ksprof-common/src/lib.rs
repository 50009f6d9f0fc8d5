//! # ksprof Common Library
//!
//! Shared code for the ksprof profiler:
//! - Error taxonomy and failure classification
//! - Properties file loading (metadata tables, named filters, group queries)
//! - Opaque identifier types (images, plates, groups)

pub mod config;
pub mod error;
pub mod keys;

pub use error::{Error, FailureClass, Result};
pub use keys::{GroupKey, ImageKey, PlateId};

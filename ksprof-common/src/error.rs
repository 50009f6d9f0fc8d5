//! Common error types for ksprof

use crate::keys::{ImageKey, PlateId};
use thiserror::Error;

/// Common result type for ksprof operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types across the profiling pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A requested image has no entry in the feature cache
    #[error("Image {image} not present in cache")]
    CacheMiss { image: ImageKey },

    /// A plate touched by treatment images has no control images
    #[error("Plate {plate} has no control images")]
    MissingControls { plate: PlateId },

    /// Control sample smaller than treatment sample, or a sample is empty
    #[error("Control sample ({controls}) smaller than treatment sample ({treatments})")]
    InsufficientSample { controls: usize, treatments: usize },

    /// The two cache loads of one computation disagree on feature names
    #[error("Feature schema mismatch: {detail}")]
    SchemaMismatch { detail: String },

    /// A feature column contains no finite values in one sample
    #[error("Feature '{column}' has no finite values in one sample")]
    NanOnlyColumn { column: String },

    /// A dispatched task exceeded its deadline
    #[error("Task exceeded {seconds}s timeout")]
    TaskTimeout { seconds: u64 },

    /// A worker task panicked or was lost by the executor
    #[error("Worker failed: {0}")]
    WorkerPanic(String),

    /// Profile assembly error (zero usable rows, row/schema mismatch)
    #[error("Assembly error: {0}")]
    Assembly(String),
}

/// Failure classes reported by the dispatcher, so operators can tell
/// configuration mistakes from bad data from executor trouble.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Configuration,
    DataIntegrity,
    Execution,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureClass::Configuration => write!(f, "configuration"),
            FailureClass::DataIntegrity => write!(f, "data-integrity"),
            FailureClass::Execution => write!(f, "execution"),
        }
    }
}

impl Error {
    /// Classify this error for the dispatcher's failure report.
    ///
    /// Cache misses count as configuration: the cache was built from a
    /// different image set than the metadata database describes.
    pub fn failure_class(&self) -> FailureClass {
        match self {
            Error::Database(_)
            | Error::Config(_)
            | Error::CacheMiss { .. }
            | Error::SchemaMismatch { .. }
            | Error::Assembly(_) => FailureClass::Configuration,
            Error::MissingControls { .. }
            | Error::InsufficientSample { .. }
            | Error::NanOnlyColumn { .. } => FailureClass::DataIntegrity,
            Error::Io(_) | Error::TaskTimeout { .. } | Error::WorkerPanic(_) => {
                FailureClass::Execution
            }
        }
    }
}

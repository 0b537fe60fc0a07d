pub mod config;
pub mod error;
pub mod logging;
pub mod metrics;
pub mod plate_detection;

pub use config::ReaderConfig;
pub use error::{PlateError, Result};
pub use plate_detection::plate_reader::PlateReader;
pub use plate_detection::{BoundingBox, ExtractionFailure, PlateReading, PlateText};

/// What callers report when no plate could be read.
pub const DETECT_FAILED: &str = "DETECT_FAILED";

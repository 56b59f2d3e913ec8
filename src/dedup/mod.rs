mod detector;
pub mod matcher;

pub use detector::{DuplicateDetector, SimilarityThresholds};

use std::fmt;
use thiserror::Error;

/// Outcome of a value-range check over one array.
#[derive(Clone, Debug, PartialEq)]
pub struct RangeReport {
    pub name: String,
    pub min: f32,
    pub max: f32,
    pub expected_min: f32,
    pub expected_max: f32,
}

impl RangeReport {
    pub fn is_valid(&self) -> bool {
        self.min == self.expected_min && self.max == self.expected_max
    }
}

impl fmt::Display for RangeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} spans [{}, {}] but must span exactly [{}, {}]",
            self.name, self.min, self.max, self.expected_min, self.expected_max
        )
    }
}

#[derive(Debug, Error)]
pub enum FovPatchError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("value range violation: {0}")]
    ValueRange(RangeReport),
    #[error("configuration mismatch: {0}")]
    Configuration(String),
    #[error("unknown mode '{0}'")]
    UnknownMode(String),
    #[error("gave up sampling a patch in image {image} after {attempts} rejected candidates")]
    RejectionLimit { image: i32, attempts: u64 },
    #[error("manifest line {line}: {reason}")]
    Manifest { line: usize, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FovPatchError>;

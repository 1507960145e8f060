//! Error taxonomy for the heatmap pipeline.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HeatmapError>;

/// Which extent a resize request targeted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeAxis {
    Width,
    Height,
}

impl std::fmt::Display for ResizeAxis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResizeAxis::Width => write!(f, "width"),
            ResizeAxis::Height => write!(f, "height"),
        }
    }
}

#[derive(Debug, Error)]
pub enum HeatmapError {
    /// Fewer than two features were requested.
    #[error("at least two features are required, got {found}")]
    InsufficientFeatures { found: usize },

    /// The visibility filter removed every sample.
    #[error("no samples left after filtering by condition")]
    EmptySampleSet,

    #[error("{axis} {requested}px is outside [{min}, {max}]")]
    OutOfBoundsResize {
        axis: ResizeAxis,
        requested: u32,
        min: u32,
        max: u32,
    },

    #[error("{requested} features requested, the limit is {limit}")]
    TooManyFeatures { requested: usize, limit: usize },

    /// A requested annotation column is absent from the metadata.
    #[error("unknown metadata column: {0}")]
    UnknownColumn(String),

    #[error("ambiguous trigger: {0}")]
    AmbiguousTrigger(String),

    #[error("no sample values available for feature {0}")]
    UnknownFeature(String),

    #[error("unknown condition: {0}")]
    UnknownCondition(String),

    #[error("invalid comparison '{0}', expected A-vs-B")]
    InvalidComparison(String),

    #[error("invalid color: {0}")]
    InvalidColor(String),

    /// Geometry bounds that cannot hold a heatmap.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("sample metadata has no 'condition' column")]
    MissingConditionColumn,

    /// Broken structural invariant (leaf permutation, track length).
    #[error("internal invariant violated: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("table parse error: {0}")]
    Csv(#[from] csv::Error),

    #[error("config parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image encoding error: {0}")]
    Image(#[from] image::ImageError),
}

impl HeatmapError {
    /// Recoverable errors are answered with a placeholder scene rather
    /// than tearing down the session.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            HeatmapError::Internal(_)
                | HeatmapError::InvalidGeometry(_)
                | HeatmapError::Io(_)
                | HeatmapError::Csv(_)
                | HeatmapError::Json(_)
                | HeatmapError::Image(_)
        )
    }

    /// Short user-facing explanation shown inside the placeholder.
    pub fn placeholder_message(&self) -> String {
        match self {
            HeatmapError::InsufficientFeatures { .. } => "Select at least two features".to_string(),
            HeatmapError::EmptySampleSet => "No samples match the visible conditions".to_string(),
            HeatmapError::TooManyFeatures { limit, .. } => {
                format!("Select at most {} features", limit)
            }
            HeatmapError::AmbiguousTrigger(_) => "Select features to draw a heatmap".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverable_classification() {
        assert!(HeatmapError::EmptySampleSet.is_recoverable());
        assert!(HeatmapError::UnknownColumn("age".into()).is_recoverable());
        assert!(!HeatmapError::Internal("bad".into()).is_recoverable());
        assert!(!HeatmapError::InvalidGeometry("max_height".into()).is_recoverable());
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert!(!HeatmapError::from(io).is_recoverable());
    }

    #[test]
    fn placeholder_text() {
        let err = HeatmapError::InsufficientFeatures { found: 1 };
        assert_eq!(err.placeholder_message(), "Select at least two features");
        let err = HeatmapError::OutOfBoundsResize {
            axis: ResizeAxis::Height,
            requested: 10,
            min: 300,
            max: 1600,
        };
        assert_eq!(err.placeholder_message(), "height 10px is outside [300, 1600]");
    }
}

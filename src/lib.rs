//! Clustered expression heatmaps: matrix assembly, average-linkage
//! clustering, annotation tracks, condition visibility, layout and
//! rendering, driven by a per-session dispatcher.

pub mod assembler;
pub mod cluster;
pub mod config;
pub mod error;
pub mod layout;
pub mod metadata;
pub mod scene;
pub mod series;
pub mod session;
pub mod tracks;
pub mod visibility;

pub use assembler::{assemble, FeatureMatrix, SampleFilter};
pub use cluster::{cluster_axis, Axis, Dendrogram};
pub use config::{GeometryConfig, HeatmapConfig};
pub use error::{HeatmapError, Result};
pub use layout::LayoutGeometry;
pub use metadata::SampleMetadata;
pub use scene::{ExportDescriptor, Scene};
pub use series::{DirectorySource, FeatureSeries, FeatureSource, MemorySource};
pub use session::{dispatch_shared, Rendered, Route, Session, SharedSession, Snapshot, Trigger};
pub use tracks::AnnotationTrack;
pub use visibility::{Comparison, LegendSelection, VisibilityState};

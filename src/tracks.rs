//! Color-encoded metadata tracks stacked above the matrix.

use crate::config::{lerp_color, HeatmapConfig, Rgb};
use crate::error::{HeatmapError, Result};
use crate::metadata::{ColumnValues, SampleMetadata, CONDITION_COLUMN};
use log::debug;
use rustc_hash::FxHashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackCell {
    /// Index into the discrete category list.
    Category(usize),
    Scalar(f64),
    Unknown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackEncoding {
    Discrete {
        categories: Vec<String>,
        colors: Vec<Rgb>,
    },
    Continuous {
        min: f64,
        max: f64,
        low: Rgb,
        high: Rgb,
    },
}

/// Legend item. Whether a condition entry is shown, dimmed or left out is
/// read from `VisibilityState` at render time.
#[derive(Debug, Clone, PartialEq)]
pub struct LegendEntry {
    pub label: String,
    pub color: Rgb,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationTrack {
    pub column: String,
    /// Cells aligned to the current sample order.
    pub cells: Vec<TrackCell>,
    pub encoding: TrackEncoding,
    pub unknown: Rgb,
    pub legend: Vec<LegendEntry>,
}

impl AnnotationTrack {
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn is_discrete(&self) -> bool {
        matches!(self.encoding, TrackEncoding::Discrete { .. })
    }

    pub fn color_of(&self, cell: TrackCell) -> Rgb {
        match (cell, &self.encoding) {
            (TrackCell::Category(i), TrackEncoding::Discrete { colors, .. }) => colors[i],
            (TrackCell::Scalar(v), TrackEncoding::Continuous { min, max, low, high }) => {
                let t = if max > min { (v - min) / (max - min) } else { 0.0 };
                lerp_color(*low, *high, t)
            }
            _ => self.unknown,
        }
    }

    pub fn color_at(&self, i: usize) -> Rgb {
        self.color_of(self.cells[i])
    }

    /// Display label for one cell.
    pub fn label_at(&self, i: usize) -> String {
        match (self.cells[i], &self.encoding) {
            (TrackCell::Category(c), TrackEncoding::Discrete { categories, .. }) => {
                categories[c].clone()
            }
            (TrackCell::Scalar(v), _) => format!("{}", v),
            _ => crate::metadata::MISSING.to_string(),
        }
    }
}

fn discrete_track(
    column: &str,
    categories: Vec<String>,
    values: &[Option<String>],
    positions: &[usize],
    palette: &[Rgb],
    unknown: Rgb,
) -> AnnotationTrack {
    let colors: Vec<Rgb> = (0..categories.len()).map(|i| palette[i % palette.len()]).collect();
    let index: FxHashMap<&str, usize> = categories
        .iter()
        .enumerate()
        .map(|(i, c)| (c.as_str(), i))
        .collect();
    let cells = positions
        .iter()
        .map(|&p| match &values[p] {
            Some(v) => index
                .get(v.as_str())
                .map_or(TrackCell::Unknown, |&i| TrackCell::Category(i)),
            None => TrackCell::Unknown,
        })
        .collect();
    let legend = categories
        .iter()
        .zip(&colors)
        .map(|(label, &color)| LegendEntry {
            label: label.clone(),
            color,
        })
        .collect();
    AnnotationTrack {
        column: column.to_string(),
        cells,
        encoding: TrackEncoding::Discrete { categories, colors },
        unknown,
        legend,
    }
}

fn continuous_track(
    column: &str,
    values: &[Option<f64>],
    positions: &[usize],
    gradient: (Rgb, Rgb),
    unknown: Rgb,
) -> AnnotationTrack {
    // range over the whole column so colors do not shift when samples are filtered
    let (min, max) = values
        .iter()
        .flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let (min, max) = if min.is_finite() { (min, max) } else { (0.0, 0.0) };
    let cells = positions
        .iter()
        .map(|&p| values[p].map_or(TrackCell::Unknown, TrackCell::Scalar))
        .collect();
    let (low, high) = gradient;
    AnnotationTrack {
        column: column.to_string(),
        cells,
        encoding: TrackEncoding::Continuous { min, max, low, high },
        unknown,
        legend: vec![
            LegendEntry {
                label: format!("{}", min),
                color: low,
            },
            LegendEntry {
                label: format!("{}", max),
                color: high,
            },
        ],
    }
}

/// One track per requested column, the condition track first, each aligned
/// to `sample_order`. Category colors are assigned over the full metadata
/// so they stay put when samples are filtered.
pub fn build_tracks(
    sample_order: &[String],
    metadata: &SampleMetadata,
    columns: &[String],
    config: &HeatmapConfig,
) -> Result<Vec<AnnotationTrack>> {
    let palette = config.palette_colors()?;
    let unknown = config.unknown_rgb()?;
    let gradient = config.gradient()?;

    let positions = sample_order
        .iter()
        .map(|s| {
            metadata
                .position(s)
                .ok_or_else(|| HeatmapError::Internal(format!("sample {} not in metadata", s)))
        })
        .collect::<Result<Vec<usize>>>()?;

    let condition_values: Vec<Option<String>> = (0..metadata.len())
        .map(|i| Some(metadata.condition(i).to_string()))
        .collect();
    let mut tracks = vec![discrete_track(
        CONDITION_COLUMN,
        config.order_conditions(&metadata.condition_labels()),
        &condition_values,
        &positions,
        &palette,
        unknown,
    )];

    let mut seen: Vec<&str> = vec![CONDITION_COLUMN];
    for name in columns {
        if seen.contains(&name.as_str()) {
            continue;
        }
        seen.push(name);
        let column = metadata.column(name)?;
        let track = match &column.values {
            ColumnValues::Categorical(values) => discrete_track(
                name,
                column.categories(),
                values,
                &positions,
                &palette,
                unknown,
            ),
            ColumnValues::Continuous(values) => {
                continuous_track(name, values, &positions, gradient, unknown)
            }
        };
        debug!(
            "Track {}: {} cells, {}",
            name,
            track.len(),
            if track.is_discrete() { "discrete" } else { "continuous" }
        );
        tracks.push(track);
    }

    debug_assert!(tracks.iter().all(|t| t.len() == sample_order.len()));
    Ok(tracks)
}

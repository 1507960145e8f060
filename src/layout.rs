//! Pixel extents and normalized axis domains for the heatmap panels.

use crate::config::GeometryConfig;
use crate::error::{HeatmapError, ResizeAxis, Result};
use log::debug;

/// What the geometry is computed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutRequest {
    pub rows: usize,
    pub cols: usize,
    /// Annotation tracks besides the condition track.
    pub tracks: usize,
    pub sample_dendrogram: bool,
    pub feature_dendrogram: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min: u32,
    pub max: u32,
}

impl Bounds {
    fn clamp(&self, v: u32) -> u32 {
        v.clamp(self.min, self.max)
    }

    fn contains(&self, v: u32) -> bool {
        self.min <= v && v <= self.max
    }
}

pub type Domain = (f64, f64);

/// Fractions of the plot height, stacked bottom to top.
#[derive(Debug, Clone, PartialEq)]
pub struct VerticalDomains {
    pub matrix: Domain,
    /// In track order; the first sits directly below the condition track.
    pub tracks: Vec<Domain>,
    pub condition: Domain,
    pub sample_dendrogram: Option<Domain>,
}

/// Fractions of the plot width, left to right.
#[derive(Debug, Clone, PartialEq)]
pub struct HorizontalDomains {
    pub feature_dendrogram: Option<Domain>,
    pub matrix: Domain,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayoutGeometry {
    pub width: u32,
    pub height: u32,
    pub matrix_width: u32,
    pub matrix_height: u32,
    pub dendrogram_height: u32,
    pub feature_dendrogram_width: u32,
    pub condition_track_height: u32,
    pub track_height: u32,
    pub legend_height: u32,
    pub label_width: u32,
    pub y_domains: VerticalDomains,
    pub x_domains: HorizontalDomains,
    pub width_bounds: Bounds,
    pub height_bounds: Bounds,
    pub width_override: Option<u32>,
    pub height_override: Option<u32>,
    request: LayoutRequest,
    config: GeometryConfig,
}

impl LayoutGeometry {
    pub fn compute(request: LayoutRequest, config: &GeometryConfig) -> Self {
        Self::build(request, config.clone(), None, None)
    }

    fn build(
        request: LayoutRequest,
        config: GeometryConfig,
        width_override: Option<u32>,
        height_override: Option<u32>,
    ) -> Self {
        let rows = request.rows as u32;
        let cols = request.cols as u32;
        let dendrogram_height = if request.sample_dendrogram {
            config.dendrogram_height
        } else {
            0
        };
        let feature_dendrogram_width = if request.feature_dendrogram {
            config.feature_dendrogram_width
        } else {
            0
        };

        let tracks_height =
            config.condition_track_height + request.tracks as u32 * config.track_height;
        let fixed_v = config.legend_height + dendrogram_height + tracks_height;
        let height_bounds = bounds(
            fixed_v + rows * config.min_row_unit,
            config.min_height,
            config.max_height,
        );
        let height = height_override
            .unwrap_or_else(|| height_bounds.clamp(fixed_v + rows * config.row_unit));

        let fixed_h = config.label_width + feature_dendrogram_width;
        let width_bounds = bounds(
            fixed_h + cols * config.min_column_unit,
            config.min_width,
            config.max_width,
        );
        let width = width_override
            .unwrap_or_else(|| width_bounds.clamp(fixed_h + cols * config.column_unit));

        let matrix_height = height.saturating_sub(fixed_v);
        let matrix_width = width.saturating_sub(fixed_h);

        // vertical: plot area excludes the legend margin
        let plot_h = (matrix_height + tracks_height + dendrogram_height).max(1) as f64;
        let mut cursor = matrix_height as f64 / plot_h;
        let matrix = (0.0, cursor);
        let mut tracks = vec![(0.0, 0.0); request.tracks];
        for slot in tracks.iter_mut().rev() {
            let top = cursor + config.track_height as f64 / plot_h;
            *slot = (cursor, top);
            cursor = top;
        }
        let condition_top = if request.sample_dendrogram {
            cursor + config.condition_track_height as f64 / plot_h
        } else {
            1.0
        };
        let condition = (cursor, condition_top);
        let sample_dendrogram = request.sample_dendrogram.then_some((condition_top, 1.0));

        // horizontal: plot area excludes the label margin
        let plot_w = (matrix_width + feature_dendrogram_width).max(1) as f64;
        let split = feature_dendrogram_width as f64 / plot_w;
        let x_domains = HorizontalDomains {
            feature_dendrogram: request.feature_dendrogram.then_some((0.0, split)),
            matrix: (split, 1.0),
        };

        debug!(
            "Layout {}x{} (matrix {}x{}), height bounds [{}, {}], width bounds [{}, {}]",
            width,
            height,
            matrix_width,
            matrix_height,
            height_bounds.min,
            height_bounds.max,
            width_bounds.min,
            width_bounds.max
        );

        LayoutGeometry {
            width,
            height,
            matrix_width,
            matrix_height,
            dendrogram_height,
            feature_dendrogram_width,
            condition_track_height: config.condition_track_height,
            track_height: config.track_height,
            legend_height: config.legend_height,
            label_width: config.label_width,
            y_domains: VerticalDomains {
                matrix,
                tracks,
                condition,
                sample_dendrogram,
            },
            x_domains,
            width_bounds,
            height_bounds,
            width_override,
            height_override,
            request,
            config,
        }
    }

    pub fn request(&self) -> LayoutRequest {
        self.request
    }

    /// Apply explicit extents. Values outside the bounds are rejected and
    /// the receiver is left as it was; an axis not given keeps its override.
    pub fn resize(&self, width: Option<u32>, height: Option<u32>) -> Result<LayoutGeometry> {
        if let Some(w) = width {
            check(ResizeAxis::Width, w, self.width_bounds)?;
        }
        if let Some(h) = height {
            check(ResizeAxis::Height, h, self.height_bounds)?;
        }
        Ok(Self::build(
            self.request,
            self.config.clone(),
            width.or(self.width_override),
            height.or(self.height_override),
        ))
    }

    /// Height in pixels of one matrix row.
    pub fn row_height(&self) -> f64 {
        self.matrix_height as f64 / self.request.rows.max(1) as f64
    }

    pub fn column_width(&self) -> f64 {
        self.matrix_width as f64 / self.request.cols.max(1) as f64
    }

    /// Convert a vertical domain into a pixel span `(top, bottom)` measured from the canvas top.
    pub fn y_span(&self, domain: Domain) -> (f64, f64) {
        let plot_h = self.height.saturating_sub(self.legend_height) as f64;
        let top = self.legend_height as f64 + (1.0 - domain.1) * plot_h;
        let bottom = self.legend_height as f64 + (1.0 - domain.0) * plot_h;
        (top, bottom)
    }

    /// Convert a horizontal domain into a pixel span `(left, right)`.
    pub fn x_span(&self, domain: Domain) -> (f64, f64) {
        let plot_w = self.width.saturating_sub(self.label_width) as f64;
        (domain.0 * plot_w, domain.1 * plot_w)
    }
}

fn bounds(content_min: u32, min: u32, max: u32) -> Bounds {
    Bounds {
        min: content_min.max(min).min(max),
        max,
    }
}

fn check(axis: ResizeAxis, requested: u32, b: Bounds) -> Result<()> {
    if b.contains(requested) {
        Ok(())
    } else {
        Err(HeatmapError::OutOfBoundsResize {
            axis,
            requested,
            min: b.min,
            max: b.max,
        })
    }
}

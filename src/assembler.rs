//! Merges per-feature series and sample metadata into one standardized matrix.

use crate::config::HeatmapConfig;
use crate::error::{HeatmapError, Result};
use crate::metadata::SampleMetadata;
use crate::series::FeatureSource;
use log::{debug, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeSet;

/// Per-row transform parameters, kept so standardization can be reversed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowScaling {
    pub mean: f64,
    pub sd: f64,
}

/// Feature-by-sample matrix of log2-transformed, row-standardized values.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    features: Vec<String>,
    samples: Vec<String>,
    /// Row-major.
    values: Vec<f64>,
    scaling: Vec<RowScaling>,
}

/// Which samples the assembler keeps, by condition label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SampleFilter {
    All,
    Conditions(BTreeSet<String>),
}

impl SampleFilter {
    pub fn passes(&self, condition: &str) -> bool {
        match self {
            SampleFilter::All => true,
            SampleFilter::Conditions(visible) => visible.contains(condition),
        }
    }
}

/// log2 with non-finite results (from zero or negative input) clamped to 0.
pub fn log2_clamped(x: f64) -> f64 {
    let v = x.log2();
    if v.is_finite() {
        v
    } else {
        0.0
    }
}

/// Z-score a row using the population standard deviation.
pub fn standardize(row: &[f64]) -> (Vec<f64>, RowScaling) {
    let n = row.len() as f64;
    if row.is_empty() {
        return (Vec::new(), RowScaling { mean: 0.0, sd: 0.0 });
    }
    let mean = row.iter().sum::<f64>() / n;
    let var = row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let sd = var.sqrt();
    let z = if sd > f64::EPSILON {
        row.iter().map(|v| (v - mean) / sd).collect()
    } else {
        vec![0.0; row.len()]
    };
    (z, RowScaling { mean, sd })
}

impl FeatureMatrix {
    /// Build from already-standardized rows.
    pub fn from_rows(
        features: Vec<String>,
        samples: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if rows.len() != features.len() || rows.iter().any(|r| r.len() != samples.len()) {
            return Err(HeatmapError::Internal(format!(
                "matrix shape does not match {} features x {} samples",
                features.len(),
                samples.len()
            )));
        }
        let scaling = vec![RowScaling { mean: 0.0, sd: 1.0 }; rows.len()];
        Ok(FeatureMatrix {
            features,
            samples,
            values: rows.into_iter().flatten().collect(),
            scaling,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.features.len()
    }

    pub fn n_cols(&self) -> usize {
        self.samples.len()
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn scaling(&self) -> &[RowScaling] {
        &self.scaling
    }

    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.n_cols();
        &self.values[i * n..(i + 1) * n]
    }

    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.n_rows()).map(|i| self.value(i, j)).collect()
    }

    pub fn value(&self, i: usize, j: usize) -> f64 {
        self.values[i * self.n_cols() + j]
    }

    /// The log2 values a row was standardized from.
    pub fn unstandardized_row(&self, i: usize) -> Vec<f64> {
        let RowScaling { mean, sd } = self.scaling[i];
        self.row(i).iter().map(|z| z * sd + mean).collect()
    }

    pub fn max_abs(&self) -> f64 {
        self.values.iter().fold(0.0f64, |m, v| m.max(v.abs()))
    }

    /// Permute rows and columns; both orders index into the current axes.
    pub fn reordered(&self, row_order: &[usize], col_order: &[usize]) -> FeatureMatrix {
        let mut values = Vec::with_capacity(row_order.len() * col_order.len());
        for &i in row_order {
            let row = self.row(i);
            values.extend(col_order.iter().map(|&j| row[j]));
        }
        FeatureMatrix {
            features: row_order.iter().map(|&i| self.features[i].clone()).collect(),
            samples: col_order.iter().map(|&j| self.samples[j].clone()).collect(),
            values,
            scaling: row_order.iter().map(|&i| self.scaling[i]).collect(),
        }
    }

    /// Little-endian bytes of every cell, row-major.
    pub fn value_bytes(&self) -> Vec<u8> {
        self.values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

/// Collapse duplicate identifiers, keeping the first occurrence.
pub fn dedup_features(features: &[String]) -> Vec<String> {
    let mut seen = FxHashSet::default();
    let mut out = Vec::with_capacity(features.len());
    for f in features {
        if seen.insert(f.as_str()) {
            out.push(f.clone());
        } else {
            warn!("Feature {} requested more than once, keeping the first", f);
        }
    }
    out
}

/// Fetch, align, transform and standardize the requested features over the
/// samples that pass `filter`.
pub fn assemble(
    features: &[String],
    source: &dyn FeatureSource,
    metadata: &SampleMetadata,
    filter: &SampleFilter,
    config: &HeatmapConfig,
) -> Result<FeatureMatrix> {
    let features = dedup_features(features);
    if features.len() < 2 {
        return Err(HeatmapError::InsufficientFeatures {
            found: features.len(),
        });
    }
    if features.len() > config.max_features {
        return Err(HeatmapError::TooManyFeatures {
            requested: features.len(),
            limit: config.max_features,
        });
    }

    let candidates: Vec<usize> = (0..metadata.len())
        .filter(|&i| filter.passes(metadata.condition(i)))
        .collect();
    if candidates.is_empty() {
        return Err(HeatmapError::EmptySampleSet);
    }

    let series = features
        .iter()
        .map(|f| source.fetch(f))
        .collect::<Result<Vec<_>>>()?;
    let lookups: Vec<FxHashMap<&str, f64>> = series.iter().map(|s| s.lookup()).collect();

    let retained: Vec<usize> = candidates
        .into_iter()
        .filter(|&i| {
            let sample = metadata.samples()[i].as_str();
            let present = lookups.iter().all(|l| l.contains_key(sample));
            if !present {
                warn!("Sample {} is missing from at least one feature, dropping it", sample);
            }
            present
        })
        .collect();
    if retained.is_empty() {
        return Err(HeatmapError::EmptySampleSet);
    }

    let samples: Vec<String> = retained.iter().map(|&i| metadata.samples()[i].clone()).collect();
    let mut values = Vec::with_capacity(features.len() * samples.len());
    let mut scaling = Vec::with_capacity(features.len());
    for lookup in &lookups {
        let row: Vec<f64> = samples.iter().map(|s| log2_clamped(lookup[s.as_str()])).collect();
        let (z, s) = standardize(&row);
        values.extend(z);
        scaling.push(s);
    }

    debug!(
        "Retained {} of {} samples for filter {:?}",
        samples.len(),
        metadata.len(),
        filter
    );
    info!("Assembled {} features x {} samples", features.len(), samples.len());

    Ok(FeatureMatrix {
        features,
        samples,
        values,
        scaling,
    })
}

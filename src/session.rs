//! Interactive session: classifies each trigger into exactly one
//! recomputation path and keeps the last immutable snapshot.
//!
//! Paths:
//! - full rebuild: assemble, cluster, build tracks, compute geometry;
//! - resize-only: geometry only, against the current snapshot;
//! - visibility-only: re-filter and re-track, keeping the feature order.
//!
//! Each path computes into locals and commits at the end, so a failed
//! resize leaves geometry untouched.

use crate::assembler::{assemble, FeatureMatrix};
use crate::cluster::{cluster_axis, Axis, Dendrogram};
use crate::config::HeatmapConfig;
use crate::error::{HeatmapError, Result};
use crate::layout::{LayoutGeometry, LayoutRequest};
use crate::metadata::{SampleMetadata, CONDITION_COLUMN};
use crate::scene::{self, ExportDescriptor, RenderInput, Scene};
use crate::series::FeatureSource;
use crate::tracks::{build_tracks, AnnotationTrack};
use crate::visibility::{Comparison, LegendSelection, VisibilityChange, VisibilityState};
use log::{debug, info, warn};
use rustc_hash::{FxHashMap, FxHashSet};
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex};

/// One discrete user interaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Trigger {
    SelectFeatures(Vec<String>),
    SetAnnotations(Vec<String>),
    SetSampleClustering(bool),
    SetFeatureClustering(bool),
    Rebuild,
    Resize {
        width: Option<u32>,
        height: Option<u32>,
    },
    ToggleCondition(String),
    SetComparisonOnly(Option<Comparison>),
    SetHideUnselected(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    FullRebuild,
    ResizeOnly,
    VisibilityOnly,
    Rejected(String),
}

/// Inputs of the last requested full rebuild.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSettings {
    pub features: Vec<String>,
    pub annotations: Vec<String>,
    pub cluster_samples: bool,
    pub cluster_features: bool,
}

/// Result of one rebuild: matrix in leaf order on both axes, the
/// dendrograms that produced that order, and the aligned tracks.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub features: Vec<String>,
    pub annotations: Vec<String>,
    pub matrix: FeatureMatrix,
    pub feature_dendrogram: Dendrogram,
    pub sample_dendrogram: Dendrogram,
    /// Sample tree of the last full rebuild; refilters prune this one.
    pub base_sample_dendrogram: Dendrogram,
    pub tracks: Vec<AnnotationTrack>,
}

fn invariant(holds: bool, what: &str) -> Result<()> {
    debug_assert!(holds, "{}", what);
    if holds {
        Ok(())
    } else {
        Err(HeatmapError::Internal(what.to_string()))
    }
}

impl Snapshot {
    /// SHA-256 over both leaf orders and the matrix values.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for f in self.matrix.features() {
            hasher.update(f.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update([1u8]);
        for s in self.matrix.samples() {
            hasher.update(s.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(self.matrix.value_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn check_invariants(&self) -> Result<()> {
        invariant(
            self.feature_dendrogram.is_permutation(),
            "feature leaf order is not a permutation",
        )?;
        invariant(
            self.sample_dendrogram.is_permutation(),
            "sample leaf order is not a permutation",
        )?;
        invariant(
            self.matrix.features() == self.feature_dendrogram.ordered_labels().as_slice(),
            "matrix rows are not in feature leaf order",
        )?;
        invariant(
            self.matrix.samples() == self.sample_dendrogram.ordered_labels().as_slice(),
            "matrix columns are not in sample leaf order",
        )?;
        invariant(
            self.tracks.first().map(|t| t.column.as_str()) == Some(CONDITION_COLUMN),
            "first track is not the condition track",
        )?;
        invariant(
            self.tracks.iter().all(|t| t.len() == self.matrix.n_cols()),
            "track length differs from sample order",
        )
    }

    fn layout_request(&self) -> LayoutRequest {
        LayoutRequest {
            rows: self.matrix.n_rows(),
            cols: self.matrix.n_cols(),
            tracks: self.tracks.len().saturating_sub(1),
            sample_dendrogram: self.sample_dendrogram.is_clustered(),
            feature_dendrogram: self.feature_dendrogram.is_clustered(),
        }
    }
}

/// What a dispatch hands back to the host.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub route: Route,
    pub scene: Scene,
    pub export: ExportDescriptor,
    pub legend: LegendSelection,
    /// Explanation when `scene` is a placeholder.
    pub placeholder: Option<String>,
}

pub struct Session {
    config: HeatmapConfig,
    metadata: SampleMetadata,
    source: Box<dyn FeatureSource + Send>,
    settings: RenderSettings,
    visibility: Option<VisibilityState>,
    snapshot: Option<Arc<Snapshot>>,
    geometry: Option<LayoutGeometry>,
    /// Set while the snapshot lags behind `visibility` after a failed
    /// refilter. A stale snapshot is never drawn.
    stale: bool,
}

/// A session shared between threads; the lock serializes invocations.
pub type SharedSession = Arc<Mutex<Session>>;

pub fn dispatch_shared(session: &SharedSession, trigger: Trigger) -> Result<Rendered> {
    let mut guard = session
        .lock()
        .map_err(|_| HeatmapError::Internal("session lock poisoned".to_string()))?;
    guard.dispatch_or_placeholder(trigger)
}

impl Session {
    pub fn new(
        config: HeatmapConfig,
        metadata: SampleMetadata,
        source: Box<dyn FeatureSource + Send>,
    ) -> Result<Self> {
        config.validate()?;
        let settings = RenderSettings {
            features: Vec::new(),
            annotations: Vec::new(),
            cluster_samples: config.cluster_samples,
            cluster_features: config.cluster_features,
        };
        Ok(Session {
            config,
            metadata,
            source,
            settings,
            visibility: None,
            snapshot: None,
            geometry: None,
            stale: false,
        })
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn config(&self) -> &HeatmapConfig {
        &self.config
    }

    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub fn snapshot(&self) -> Option<Arc<Snapshot>> {
        self.snapshot.clone()
    }

    pub fn geometry(&self) -> Option<&LayoutGeometry> {
        self.geometry.as_ref()
    }

    pub fn visibility(&self) -> Option<&VisibilityState> {
        self.visibility.as_ref()
    }

    /// Decide the recomputation path for a trigger without running it.
    pub fn classify(&self, trigger: &Trigger) -> Route {
        let built = self.snapshot.is_some();
        match trigger {
            Trigger::SelectFeatures(_)
            | Trigger::SetAnnotations(_)
            | Trigger::SetSampleClustering(_)
            | Trigger::SetFeatureClustering(_)
            | Trigger::Rebuild => Route::FullRebuild,
            Trigger::Resize { width: None, height: None } => {
                Route::Rejected("resize without width or height".to_string())
            }
            Trigger::Resize { .. } if !built => {
                Route::Rejected("resize before any heatmap was built".to_string())
            }
            Trigger::Resize { .. } => Route::ResizeOnly,
            Trigger::ToggleCondition(_)
            | Trigger::SetComparisonOnly(_)
            | Trigger::SetHideUnselected(_)
                if !built =>
            {
                Route::Rejected("visibility change before any heatmap was built".to_string())
            }
            Trigger::ToggleCondition(_)
            | Trigger::SetComparisonOnly(_)
            | Trigger::SetHideUnselected(_) => Route::VisibilityOnly,
        }
    }

    pub fn dispatch(&mut self, trigger: Trigger) -> Result<Rendered> {
        let route = self.classify(&trigger);
        debug!("{:?} -> {:?}", trigger, route);
        match route {
            Route::Rejected(reason) => Err(HeatmapError::AmbiguousTrigger(reason)),
            Route::FullRebuild => self.full_rebuild(trigger),
            Route::ResizeOnly => self.resize_only(trigger),
            Route::VisibilityOnly => self.visibility_only(trigger),
        }
    }

    /// Like `dispatch`, but recoverable errors come back as a placeholder scene.
    pub fn dispatch_or_placeholder(&mut self, trigger: Trigger) -> Result<Rendered> {
        let route = self.classify(&trigger);
        match self.dispatch(trigger) {
            Ok(rendered) => Ok(rendered),
            Err(e) if e.is_recoverable() => {
                warn!("{}", e);
                Ok(self.placeholder(route, &e))
            }
            Err(e) => Err(e),
        }
    }

    fn placeholder(&self, route: Route, error: &HeatmapError) -> Rendered {
        let (width, height) = match &self.geometry {
            Some(g) => (g.width, g.height),
            None => (self.config.geometry.min_width, self.config.geometry.min_height),
        };
        let message = error.placeholder_message();
        Rendered {
            route,
            scene: Scene::placeholder(&message, width, height),
            export: ExportDescriptor {
                width,
                height,
                filename: "heatmap_placeholder.png".to_string(),
            },
            legend: self
                .visibility
                .as_ref()
                .map(|v| v.legend_selection())
                .unwrap_or(LegendSelection { entries: Vec::new() }),
            placeholder: Some(message),
        }
    }

    fn full_rebuild(&mut self, trigger: Trigger) -> Result<Rendered> {
        let mut settings = self.settings.clone();
        match trigger {
            Trigger::SelectFeatures(features) => settings.features = features,
            Trigger::SetAnnotations(columns) => settings.annotations = columns,
            Trigger::SetSampleClustering(on) => settings.cluster_samples = on,
            Trigger::SetFeatureClustering(on) => settings.cluster_features = on,
            _ => {}
        }
        let conditions = self.config.order_conditions(&self.metadata.condition_labels());
        let visibility = self
            .visibility
            .clone()
            .unwrap_or_else(|| VisibilityState::new(conditions));

        // the new settings stick even if the rebuild fails, so a later
        // resize cannot resurrect a heatmap the user moved away from
        self.settings = settings.clone();
        self.visibility = Some(visibility.clone());
        self.stale = false;
        let snapshot = match self.build_snapshot(&settings, &visibility) {
            Ok(s) => s,
            Err(e) => {
                self.snapshot = None;
                self.geometry = None;
                return Err(e);
            }
        };

        let geometry = LayoutGeometry::compute(snapshot.layout_request(), &self.config.geometry);
        info!(
            "Full rebuild: {} features x {} samples, fingerprint {}",
            snapshot.matrix.n_rows(),
            snapshot.matrix.n_cols(),
            &snapshot.fingerprint()[..12]
        );
        self.snapshot = Some(Arc::new(snapshot));
        self.geometry = Some(geometry);
        self.render(Route::FullRebuild)
    }

    fn build_snapshot(
        &self,
        settings: &RenderSettings,
        visibility: &VisibilityState,
    ) -> Result<Snapshot> {
        let raw = assemble(
            &settings.features,
            self.source.as_ref(),
            &self.metadata,
            &visibility.filter(),
            &self.config,
        )?;

        let feature_dendrogram = if settings.cluster_features {
            cluster_axis(&raw, Axis::Rows)
        } else {
            Dendrogram::from_order(raw.features().to_vec(), (0..raw.n_rows()).collect())
        };
        let sample_dendrogram = if settings.cluster_samples {
            cluster_axis(&raw, Axis::Columns)
        } else {
            Dendrogram::by_condition(raw.samples(), &self.metadata, &self.config)
        };

        let matrix = raw.reordered(feature_dendrogram.leaves(), sample_dendrogram.leaves());
        let tracks = build_tracks(
            matrix.samples(),
            &self.metadata,
            &settings.annotations,
            &self.config,
        )?;
        let snapshot = Snapshot {
            features: raw.features().to_vec(),
            annotations: settings.annotations.clone(),
            matrix,
            feature_dendrogram,
            base_sample_dendrogram: sample_dendrogram.clone(),
            sample_dendrogram,
            tracks,
        };
        snapshot.check_invariants()?;
        Ok(snapshot)
    }

    fn resize_only(&mut self, trigger: Trigger) -> Result<Rendered> {
        let Trigger::Resize { width, height } = trigger else {
            return Err(HeatmapError::Internal("resize path without a resize trigger".to_string()));
        };
        if self.stale {
            self.refresh_visibility()?;
        }
        let current = self
            .geometry
            .as_ref()
            .ok_or_else(|| HeatmapError::AmbiguousTrigger("no geometry to resize".to_string()))?;
        let geometry = current.resize(width, height)?;
        info!("Resized to {}x{}", geometry.width, geometry.height);
        self.geometry = Some(geometry);
        self.render(Route::ResizeOnly)
    }

    fn visibility_only(&mut self, trigger: Trigger) -> Result<Rendered> {
        let mut visibility = self
            .visibility
            .clone()
            .ok_or_else(|| {
                HeatmapError::Internal("snapshot without visibility state".to_string())
            })?;

        let change = match trigger {
            Trigger::ToggleCondition(label) => visibility.toggle(&label)?,
            Trigger::SetComparisonOnly(comparison) => visibility.set_comparison_only(comparison)?,
            Trigger::SetHideUnselected(hide) => visibility.set_hide_unselected(hide),
            _ => {
                return Err(HeatmapError::Internal(
                    "visibility path without a visibility trigger".to_string(),
                ))
            }
        };
        debug!("Visibility change {:?}, mode {:?}", change, visibility.mode());

        // the toggle itself is kept even when the filtered set cannot be
        // drawn, so the user can toggle back; until then the snapshot is stale
        self.visibility = Some(visibility);
        if change == VisibilityChange::SampleSetChanged || self.stale {
            self.stale = true;
            self.refresh_visibility()?;
        }
        self.render(Route::VisibilityOnly)
    }

    /// Refilter the current snapshot against the committed visibility and
    /// recompute geometry, keeping size overrides that still fit.
    fn refresh_visibility(&mut self) -> Result<()> {
        let (previous, visibility) = match (&self.snapshot, &self.visibility) {
            (Some(p), Some(v)) => (Arc::clone(p), v.clone()),
            _ => return Err(HeatmapError::AmbiguousTrigger("no heatmap to filter".to_string())),
        };
        let snapshot = self.refilter(&previous, &visibility)?;
        let fresh = LayoutGeometry::compute(snapshot.layout_request(), &self.config.geometry);
        let (w, h) = self
            .geometry
            .as_ref()
            .map_or((None, None), |g| (g.width_override, g.height_override));
        let geometry = fresh.resize(w, h).unwrap_or_else(|e| {
            debug!("Dropping size override after filtering: {}", e);
            fresh.clone()
        });
        self.snapshot = Some(Arc::new(snapshot));
        self.geometry = Some(geometry);
        self.stale = false;
        Ok(())
    }

    /// Re-assemble over the new visible set without re-clustering. Features
    /// keep their order. Samples follow the pruned tree of the last full
    /// rebuild; samples that rebuild never saw follow in condition order.
    fn refilter(&self, previous: &Snapshot, visibility: &VisibilityState) -> Result<Snapshot> {
        let raw = assemble(
            &previous.features,
            self.source.as_ref(),
            &self.metadata,
            &visibility.filter(),
            &self.config,
        )?;

        let feature_index: FxHashMap<&str, usize> =
            raw.features().iter().enumerate().map(|(i, f)| (f.as_str(), i)).collect();
        let row_order = previous
            .matrix
            .features()
            .iter()
            .map(|f| {
                feature_index
                    .get(f.as_str())
                    .copied()
                    .ok_or_else(|| {
                        HeatmapError::Internal(format!("feature {} vanished on refilter", f))
                    })
            })
            .collect::<Result<Vec<usize>>>()?;

        let base = &previous.base_sample_dendrogram;
        let retained: FxHashSet<&str> = raw.samples().iter().map(|s| s.as_str()).collect();
        let in_base: FxHashSet<&str> = base.labels().iter().map(|s| s.as_str()).collect();
        let keep: Vec<bool> = base.labels().iter().map(|l| retained.contains(l.as_str())).collect();
        let pruned = base.prune(&keep);
        let added: Vec<String> = raw
            .samples()
            .iter()
            .filter(|s| !in_base.contains(s.as_str()))
            .cloned()
            .collect();
        let sample_dendrogram = if added.is_empty() {
            pruned
        } else {
            let mut order = pruned.ordered_labels();
            let appended = Dendrogram::by_condition(&added, &self.metadata, &self.config);
            order.extend(appended.ordered_labels());
            let index: FxHashMap<&str, usize> =
                raw.samples().iter().enumerate().map(|(i, s)| (s.as_str(), i)).collect();
            let leaves = order.iter().map(|s| index[s.as_str()]).collect();
            Dendrogram::from_order(raw.samples().to_vec(), leaves)
        };

        let sample_index: FxHashMap<&str, usize> =
            raw.samples().iter().enumerate().map(|(i, s)| (s.as_str(), i)).collect();
        let col_order: Vec<usize> = sample_dendrogram
            .ordered_labels()
            .iter()
            .map(|s| sample_index[s.as_str()])
            .collect();

        let matrix = raw.reordered(&row_order, &col_order);
        let tracks = build_tracks(
            matrix.samples(),
            &self.metadata,
            &previous.annotations,
            &self.config,
        )?;
        let snapshot = Snapshot {
            features: previous.features.clone(),
            annotations: previous.annotations.clone(),
            matrix,
            feature_dendrogram: previous.feature_dendrogram.clone(),
            sample_dendrogram,
            base_sample_dendrogram: base.clone(),
            tracks,
        };
        snapshot.check_invariants()?;
        info!(
            "Refiltered to {} samples, fingerprint {}",
            snapshot.matrix.n_cols(),
            &snapshot.fingerprint()[..12]
        );
        Ok(snapshot)
    }

    fn render(&self, route: Route) -> Result<Rendered> {
        let (snapshot, geometry, visibility) =
            match (&self.snapshot, &self.geometry, &self.visibility) {
                (Some(s), Some(g), Some(v)) => (s, g, v),
                _ => {
                    return Err(HeatmapError::Internal(
                        "render without a complete snapshot".to_string(),
                    ))
                }
            };
        invariant(!self.stale, "render of a stale snapshot")?;
        let scene = scene::render(&RenderInput {
            matrix: &snapshot.matrix,
            feature_dendrogram: &snapshot.feature_dendrogram,
            sample_dendrogram: &snapshot.sample_dendrogram,
            tracks: &snapshot.tracks,
            geometry,
            visibility,
            heat_scale: self.config.heat_scale()?,
        });
        let export = ExportDescriptor::new(
            geometry.width,
            geometry.height,
            &snapshot.tracks,
            self.settings.cluster_samples,
            "png",
        );
        Ok(Rendered {
            route,
            scene,
            export,
            legend: visibility.legend_selection(),
            placeholder: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::series::{FeatureSeries, MemorySource};

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn session() -> Session {
        let samples = ids(&["s1", "s2", "s3", "s4", "s5", "s6"]);
        let conditions = ids(&["A", "A", "B", "B", "C", "C"]);
        let metadata = SampleMetadata::new(samples.clone(), conditions).unwrap();
        let source: MemorySource = [
            ("g1", [1.0, 2.0, 8.0, 9.0, 30.0, 32.0]),
            ("g2", [40.0, 38.0, 9.0, 8.0, 2.0, 1.0]),
            ("g3", [5.0, 6.0, 5.0, 6.0, 5.0, 7.0]),
        ]
        .iter()
        .map(|(name, vals)| {
            FeatureSeries::new(name, samples.iter().cloned().zip(vals.iter().copied()).collect())
        })
        .collect();
        Session::new(HeatmapConfig::default(), metadata, Box::new(source)).unwrap()
    }

    #[test]
    fn classification_depends_on_snapshot() {
        let mut s = session();
        let resize = Trigger::Resize {
            width: None,
            height: Some(800),
        };
        assert!(matches!(s.classify(&resize), Route::Rejected(_)));
        assert!(matches!(s.classify(&Trigger::ToggleCondition("A".into())), Route::Rejected(_)));
        assert_eq!(s.classify(&Trigger::Rebuild), Route::FullRebuild);

        s.dispatch(Trigger::SelectFeatures(ids(&["g1", "g2", "g3"]))).unwrap();
        assert_eq!(s.classify(&resize), Route::ResizeOnly);
        assert_eq!(s.classify(&Trigger::SetHideUnselected(true)), Route::VisibilityOnly);
        assert!(matches!(
            s.classify(&Trigger::Resize {
                width: None,
                height: None
            }),
            Route::Rejected(_)
        ));
    }

    #[test]
    fn resize_before_build_is_ambiguous() {
        let mut s = session();
        let err = s
            .dispatch(Trigger::Resize {
                width: Some(900),
                height: None,
            })
            .unwrap_err();
        assert!(matches!(err, HeatmapError::AmbiguousTrigger(_)));
    }

    #[test]
    fn full_rebuild_produces_consistent_snapshot() {
        let mut s = session();
        let r = s.dispatch(Trigger::SelectFeatures(ids(&["g1", "g2", "g3"]))).unwrap();
        assert_eq!(r.route, Route::FullRebuild);
        let snap = s.snapshot().unwrap();
        snap.check_invariants().unwrap();
        assert_eq!(snap.matrix.n_cols(), 6);
        assert_eq!(r.export.filename, "heatmap_condition_clustered.png");
        assert_eq!(snap.fingerprint().len(), 64);
    }

    #[test]
    fn resize_keeps_snapshot() {
        let mut s = session();
        s.dispatch(Trigger::SelectFeatures(ids(&["g1", "g2"]))).unwrap();
        let before = s.snapshot().unwrap();
        let r = s
            .dispatch(Trigger::Resize {
                width: Some(900),
                height: Some(700),
            })
            .unwrap();
        assert_eq!(r.route, Route::ResizeOnly);
        assert!(Arc::ptr_eq(&before, &s.snapshot().unwrap()));
        assert_eq!((r.scene.width, r.scene.height), (900, 700));
    }

    #[test]
    fn failed_resize_keeps_geometry() {
        let mut s = session();
        s.dispatch(Trigger::SelectFeatures(ids(&["g1", "g2"]))).unwrap();
        let before = s.geometry().unwrap().clone();
        let r = s
            .dispatch_or_placeholder(Trigger::Resize {
                width: None,
                height: Some(10),
            })
            .unwrap();
        assert!(r.placeholder.is_some());
        assert_eq!(s.geometry().unwrap(), &before);
    }

    #[test]
    fn display_only_change_reuses_snapshot() {
        let mut s = session();
        s.dispatch(Trigger::SelectFeatures(ids(&["g1", "g2"]))).unwrap();
        s.dispatch(Trigger::ToggleCondition("C".into())).unwrap();
        let before = s.snapshot().unwrap();
        let r = s.dispatch(Trigger::SetHideUnselected(true)).unwrap();
        assert_eq!(r.route, Route::VisibilityOnly);
        assert!(Arc::ptr_eq(&before, &s.snapshot().unwrap()));
        assert!(r
            .legend
            .entries
            .contains(&("C".to_string(), crate::visibility::LegendVisibility::Hidden)));
    }

    #[test]
    fn hiding_then_showing_keeps_feature_order() {
        let mut s = session();
        s.dispatch(Trigger::SelectFeatures(ids(&["g1", "g2", "g3"]))).unwrap();
        let full = s.snapshot().unwrap();

        s.dispatch(Trigger::ToggleCondition("B".into())).unwrap();
        let hidden = s.snapshot().unwrap();
        assert_eq!(hidden.matrix.features(), full.matrix.features());
        assert_eq!(hidden.matrix.n_cols(), 4);
        let expected: Vec<String> = full
            .matrix
            .samples()
            .iter()
            .filter(|x| !["s3", "s4"].contains(&x.as_str()))
            .cloned()
            .collect();
        assert_eq!(hidden.matrix.samples(), expected.as_slice());
        assert!(hidden.sample_dendrogram.is_clustered());

        let r = s.dispatch(Trigger::ToggleCondition("B".into())).unwrap();
        let shown = s.snapshot().unwrap();
        assert_eq!(shown.matrix.features(), full.matrix.features());
        assert_eq!(shown.matrix.samples(), full.matrix.samples());
        assert_eq!(shown.sample_dendrogram, full.sample_dendrogram);
        assert_eq!(shown.fingerprint(), full.fingerprint());
        assert_eq!(r.export.filename, "heatmap_condition_clustered.png");
        assert!(s.geometry().unwrap().y_domains.sample_dendrogram.is_some());
    }

    #[test]
    fn samples_unseen_by_the_rebuild_follow_in_condition_order() {
        let mut s = session();
        s.dispatch(Trigger::SelectFeatures(ids(&["g1", "g2", "g3"]))).unwrap();
        s.dispatch(Trigger::ToggleCondition("C".into())).unwrap();
        s.dispatch(Trigger::Rebuild).unwrap();
        let rebuilt = s.snapshot().unwrap();
        assert_eq!(rebuilt.matrix.n_cols(), 4);

        let r = s.dispatch(Trigger::ToggleCondition("C".into())).unwrap();
        let shown = s.snapshot().unwrap();
        assert_eq!(&shown.matrix.samples()[..4], rebuilt.matrix.samples());
        assert_eq!(&shown.matrix.samples()[4..], &ids(&["s5", "s6"])[..]);
        assert!(!shown.sample_dendrogram.is_clustered());
        assert_eq!(shown.base_sample_dendrogram, rebuilt.sample_dendrogram);
        assert_eq!(r.export.filename, "heatmap_condition_clustered.png");
    }

    #[test]
    fn emptied_view_stays_a_placeholder_on_resize() {
        let mut s = session();
        s.dispatch(Trigger::SelectFeatures(ids(&["g1", "g2", "g3"]))).unwrap();
        s.dispatch(Trigger::ToggleCondition("A".into())).unwrap();
        s.dispatch(Trigger::ToggleCondition("B".into())).unwrap();
        let before = s.geometry().unwrap().clone();
        let r = s.dispatch_or_placeholder(Trigger::ToggleCondition("C".into())).unwrap();
        assert!(r.placeholder.is_some());

        let r = s
            .dispatch_or_placeholder(Trigger::Resize {
                width: Some(900),
                height: None,
            })
            .unwrap();
        assert_eq!(r.route, Route::ResizeOnly);
        assert_eq!(r.placeholder.as_deref(), Some("No samples match the visible conditions"));
        assert!(!r.scene.texts().any(|t| t == "g1"));
        assert_eq!(s.geometry().unwrap(), &before);

        let r = s.dispatch_or_placeholder(Trigger::SetHideUnselected(true)).unwrap();
        assert!(r.placeholder.is_some());

        let r = s.dispatch(Trigger::ToggleCondition("C".into())).unwrap();
        assert!(r.placeholder.is_none());
        let mut drawn = s.snapshot().unwrap().matrix.samples().to_vec();
        drawn.sort();
        assert_eq!(drawn, ids(&["s5", "s6"]));
        assert!(s.snapshot().unwrap().sample_dendrogram.is_clustered());
    }

    #[test]
    fn undrawable_geometry_is_refused() {
        let samples = ids(&["s1", "s2"]);
        let metadata = SampleMetadata::new(samples, ids(&["A", "B"])).unwrap();
        let mut config = HeatmapConfig::default();
        config.geometry.max_height = 50;
        let err = Session::new(config, metadata, Box::new(MemorySource::new())).err().unwrap();
        assert!(matches!(err, HeatmapError::InvalidGeometry(_)));
    }

    #[test]
    fn hiding_everything_gives_placeholder_and_recovers() {
        let mut s = session();
        s.dispatch(Trigger::SelectFeatures(ids(&["g1", "g2"]))).unwrap();
        s.dispatch(Trigger::ToggleCondition("A".into())).unwrap();
        s.dispatch(Trigger::ToggleCondition("B".into())).unwrap();
        let r = s.dispatch_or_placeholder(Trigger::ToggleCondition("C".into())).unwrap();
        assert_eq!(r.placeholder.as_deref(), Some("No samples match the visible conditions"));

        let r = s.dispatch(Trigger::ToggleCondition("C".into())).unwrap();
        assert!(r.placeholder.is_none());
        assert_eq!(s.snapshot().unwrap().matrix.n_cols(), 2);
    }

    #[test]
    fn failed_rebuild_drops_snapshot() {
        let mut s = session();
        s.dispatch(Trigger::SelectFeatures(ids(&["g1", "g2"]))).unwrap();
        let r = s.dispatch_or_placeholder(Trigger::SelectFeatures(ids(&["g1"]))).unwrap();
        assert_eq!(r.placeholder.as_deref(), Some("Select at least two features"));
        assert!(s.snapshot().is_none());
        assert!(matches!(
            s.classify(&Trigger::Resize {
                width: Some(900),
                height: None
            }),
            Route::Rejected(_)
        ));
    }

    #[test]
    fn sorted_mode_when_sample_clustering_disabled() {
        let mut s = session();
        s.dispatch(Trigger::SelectFeatures(ids(&["g1", "g2"]))).unwrap();
        let r = s.dispatch(Trigger::SetSampleClustering(false)).unwrap();
        let snap = s.snapshot().unwrap();
        assert_eq!(snap.matrix.samples(), &ids(&["s1", "s2", "s3", "s4", "s5", "s6"])[..]);
        assert_eq!(r.export.filename, "heatmap_condition_sorted.png");
        assert!(s.geometry().unwrap().y_domains.sample_dendrogram.is_none());
    }

    #[test]
    fn shared_session_serializes() {
        let shared = session().into_shared();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || {
                    let trigger = Trigger::SelectFeatures(ids(&["g1", "g2", "g3"]));
                    dispatch_shared(&shared, trigger).unwrap()
                })
            })
            .collect();
        let prints: Vec<String> = handles
            .into_iter()
            .map(|h| {
                h.join().unwrap();
                shared.lock().unwrap().snapshot().unwrap().fingerprint()
            })
            .collect();
        assert!(prints.windows(2).all(|w| w[0] == w[1]));
    }
}

//! Per-feature sample values and the retrieval boundary that supplies them.

use crate::error::{HeatmapError, Result};
use log::{debug, warn};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;

/// Raw (untransformed) values of one feature across samples.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSeries {
    pub feature: String,
    pub values: Vec<(String, f64)>,
}

impl FeatureSeries {
    pub fn new(feature: &str, values: Vec<(String, f64)>) -> Self {
        FeatureSeries {
            feature: feature.to_string(),
            values,
        }
    }

    pub fn lookup(&self) -> FxHashMap<&str, f64> {
        self.values.iter().map(|(s, v)| (s.as_str(), *v)).collect()
    }
}

/// Supplies already-materialized sample values for a feature.
pub trait FeatureSource {
    fn fetch(&self, feature: &str) -> Result<FeatureSeries>;
}

/// Reads `<dir>/<feature>.tsv`: two tab-separated columns (sample, value).
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        DirectorySource { dir: dir.into() }
    }
}

impl FeatureSource for DirectorySource {
    fn fetch(&self, feature: &str) -> Result<FeatureSeries> {
        let path = self.dir.join(format!("{}.tsv", feature));
        if !path.is_file() {
            return Err(HeatmapError::UnknownFeature(feature.to_string()));
        }
        let reader = BufReader::new(File::open(&path)?);
        let mut values = Vec::new();

        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() < 2 {
                warn!("{:?}:{}: expected two columns, skipping", path, line_no + 1);
                continue;
            }
            match parts[1].trim().parse::<f64>() {
                Ok(v) => values.push((parts[0].trim().to_string(), v)),
                // a header line
                Err(_) if values.is_empty() => continue,
                Err(_) => warn!("{:?}:{}: non-numeric value '{}'", path, line_no + 1, parts[1]),
            }
        }

        debug!("Read {} values for {}", values.len(), feature);
        Ok(FeatureSeries::new(feature, values))
    }
}

/// In-memory source, keyed by feature identifier.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    series: FxHashMap<String, FeatureSeries>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, series: FeatureSeries) {
        self.series.insert(series.feature.clone(), series);
    }
}

impl FromIterator<FeatureSeries> for MemorySource {
    fn from_iter<I: IntoIterator<Item = FeatureSeries>>(iter: I) -> Self {
        let mut source = MemorySource::new();
        for s in iter {
            source.insert(s);
        }
        source
    }
}

impl FeatureSource for MemorySource {
    fn fetch(&self, feature: &str) -> Result<FeatureSeries> {
        self.series
            .get(feature)
            .cloned()
            .ok_or_else(|| HeatmapError::UnknownFeature(feature.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_two_column_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("GENE1.tsv"),
            "sample\tcount\n# comment\ns1\t10\ns2\t0\nbroken\ns3\t3.5\n",
        )
        .unwrap();

        let source = DirectorySource::new(dir.path());
        let series = source.fetch("GENE1").unwrap();
        assert_eq!(series.feature, "GENE1");
        assert_eq!(
            series.values,
            vec![("s1".to_string(), 10.0), ("s2".to_string(), 0.0), ("s3".to_string(), 3.5)]
        );
        assert!(matches!(source.fetch("GENE2"), Err(HeatmapError::UnknownFeature(_))));
    }

    #[test]
    fn memory_source_round_trips() {
        let source: MemorySource = vec![FeatureSeries::new("g", vec![("s1".into(), 1.0)])]
            .into_iter()
            .collect();
        assert_eq!(source.fetch("g").unwrap().lookup()["s1"], 1.0);
        assert!(source.fetch("h").is_err());
    }
}

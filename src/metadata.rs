//! Sample-indexed metadata table with one reserved `condition` column.

use crate::error::{HeatmapError, Result};
use log::{debug, info};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

pub const CONDITION_COLUMN: &str = "condition";
pub const MISSING: &str = "NA";

#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValues {
    Categorical(Vec<Option<String>>),
    Continuous(Vec<Option<f64>>),
}

impl ColumnValues {
    /// Numeric when every non-missing cell parses as a float, categorical otherwise.
    pub fn infer(raw: &[String]) -> ColumnValues {
        let cells: Vec<Option<&str>> = raw
            .iter()
            .map(|s| {
                let s = s.trim();
                if s.is_empty() || s == MISSING {
                    None
                } else {
                    Some(s)
                }
            })
            .collect();

        let parsed: Option<Vec<Option<f64>>> = cells
            .iter()
            .map(|c| match c {
                None => Some(None),
                Some(s) => s.parse::<f64>().ok().filter(|v| v.is_finite()).map(Some),
            })
            .collect();

        match parsed {
            Some(values) if values.iter().any(|v| v.is_some()) => ColumnValues::Continuous(values),
            _ => ColumnValues::Categorical(
                cells.into_iter().map(|c| c.map(str::to_string)).collect(),
            ),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Categorical(v) => v.len(),
            ColumnValues::Continuous(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self, ColumnValues::Continuous(_))
    }

    pub fn is_missing(&self, idx: usize) -> bool {
        match self {
            ColumnValues::Categorical(v) => v[idx].is_none(),
            ColumnValues::Continuous(v) => v[idx].is_none(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MetadataColumn {
    pub name: String,
    pub values: ColumnValues,
}

impl MetadataColumn {
    /// Sorted distinct labels of a categorical column; empty for continuous ones.
    pub fn categories(&self) -> Vec<String> {
        match &self.values {
            ColumnValues::Categorical(v) => v
                .iter()
                .flatten()
                .cloned()
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            ColumnValues::Continuous(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleMetadata {
    samples: Vec<String>,
    index: FxHashMap<String, usize>,
    conditions: Vec<String>,
    columns: Vec<MetadataColumn>,
}

impl SampleMetadata {
    /// Build a table from sample identifiers and their condition labels.
    pub fn new(samples: Vec<String>, conditions: Vec<String>) -> Result<Self> {
        if samples.len() != conditions.len() {
            return Err(HeatmapError::Internal(format!(
                "{} samples but {} condition labels",
                samples.len(),
                conditions.len()
            )));
        }
        let mut index = FxHashMap::default();
        for (i, s) in samples.iter().enumerate() {
            if index.insert(s.clone(), i).is_some() {
                return Err(HeatmapError::Internal(format!("duplicate sample identifier {}", s)));
            }
        }
        Ok(SampleMetadata {
            samples,
            index,
            conditions,
            columns: Vec::new(),
        })
    }

    pub fn with_column(mut self, name: &str, values: ColumnValues) -> Result<Self> {
        if values.len() != self.samples.len() {
            return Err(HeatmapError::Internal(format!(
                "column {} has {} values for {} samples",
                name,
                values.len(),
                self.samples.len()
            )));
        }
        self.columns.push(MetadataColumn {
            name: name.to_string(),
            values,
        });
        Ok(self)
    }

    pub fn from_tsv(path: &Path) -> Result<Self> {
        info!("Loading sample metadata from {:?}", path);
        Self::from_reader(File::open(path)?)
    }

    /// Parse a tab-separated table; the first column holds sample identifiers.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        let condition_idx = headers
            .iter()
            .position(|h| h == CONDITION_COLUMN)
            .ok_or(HeatmapError::MissingConditionColumn)?;
        if condition_idx == 0 {
            return Err(HeatmapError::MissingConditionColumn);
        }

        let mut raw: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in rdr.records() {
            let record = record?;
            for (col, cell) in record.iter().enumerate() {
                raw[col].push(cell.trim().to_string());
            }
        }

        let samples = std::mem::take(&mut raw[0]);
        let conditions = raw[condition_idx]
            .iter()
            .map(|c| if c.is_empty() { MISSING.to_string() } else { c.clone() })
            .collect();
        let mut metadata = SampleMetadata::new(samples, conditions)?;

        for (col, name) in headers.iter().enumerate().skip(1) {
            if col == condition_idx {
                continue;
            }
            let values = ColumnValues::infer(&raw[col]);
            debug!(
                "Metadata column {}: {}",
                name,
                if values.is_continuous() { "continuous" } else { "categorical" }
            );
            metadata = metadata.with_column(name, values)?;
        }

        info!(
            "Loaded {} samples, {} annotation columns",
            metadata.len(),
            metadata.columns.len()
        );
        Ok(metadata)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn position(&self, sample: &str) -> Option<usize> {
        self.index.get(sample).copied()
    }

    pub fn condition(&self, idx: usize) -> &str {
        &self.conditions[idx]
    }

    pub fn condition_of(&self, sample: &str) -> Option<&str> {
        self.position(sample).map(|i| self.conditions[i].as_str())
    }

    /// Distinct condition labels in lexicographic order.
    pub fn condition_labels(&self) -> Vec<String> {
        self.conditions
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn column(&self, name: &str) -> Result<&MetadataColumn> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| HeatmapError::UnknownColumn(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "sample\tcondition\tbatch\tage\n\
                         s1\tA\tb1\t31\n\
                         s2\tA\tb2\tNA\n\
                         s3\tB\tb1\t45.5\n\
                         s4\tC\t\t60\n";

    #[test]
    fn infers_column_types() {
        let metadata = SampleMetadata::from_reader(TABLE.as_bytes()).unwrap();
        assert_eq!(metadata.len(), 4);
        assert_eq!(metadata.condition_of("s3"), Some("B"));
        assert_eq!(metadata.condition_labels(), vec!["A", "B", "C"]);

        let batch = metadata.column("batch").unwrap();
        assert_eq!(
            batch.values,
            ColumnValues::Categorical(vec![
                Some("b1".into()),
                Some("b2".into()),
                Some("b1".into()),
                None
            ])
        );
        assert_eq!(batch.categories(), vec!["b1", "b2"]);

        let age = metadata.column("age").unwrap();
        assert_eq!(
            age.values,
            ColumnValues::Continuous(vec![Some(31.0), None, Some(45.5), Some(60.0)])
        );
    }

    #[test]
    fn unknown_column_is_reported() {
        let metadata = SampleMetadata::from_reader(TABLE.as_bytes()).unwrap();
        assert!(matches!(
            metadata.column("sex"),
            Err(HeatmapError::UnknownColumn(c)) if c == "sex"
        ));
    }

    #[test]
    fn requires_condition_column() {
        let table = "sample\tgroup\ns1\tA\n";
        assert!(matches!(
            SampleMetadata::from_reader(table.as_bytes()),
            Err(HeatmapError::MissingConditionColumn)
        ));
    }

    #[test]
    fn all_missing_column_is_categorical() {
        let values = ColumnValues::infer(&["NA".to_string(), String::new()]);
        assert_eq!(values, ColumnValues::Categorical(vec![None, None]));
    }

    #[test]
    fn rejects_duplicate_samples() {
        let result = SampleMetadata::new(
            vec!["s1".into(), "s1".into()],
            vec!["A".into(), "B".into()],
        );
        assert!(matches!(result, Err(HeatmapError::Internal(_))));
    }
}

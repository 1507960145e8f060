//! Static options threaded through the pipeline at construction time.

use crate::error::{HeatmapError, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

pub type Rgb = (u8, u8, u8);

/// Parse a color given as `#rrggbb` or `r,g,b`.
pub fn parse_color(color_str: &str) -> Result<Rgb> {
    let s = color_str.trim();
    if let Some(hex) = s.strip_prefix('#') {
        if hex.len() != 6 || !hex.is_ascii() {
            return Err(HeatmapError::InvalidColor(s.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16)
                .map_err(|_| HeatmapError::InvalidColor(s.to_string()))
        };
        return Ok((channel(0..2)?, channel(2..4)?, channel(4..6)?));
    }

    let rgb_parts: Vec<u8> = s
        .split(',')
        .filter_map(|p| p.trim().parse().ok())
        .collect();
    if rgb_parts.len() == 3 {
        Ok((rgb_parts[0], rgb_parts[1], rgb_parts[2]))
    } else {
        Err(HeatmapError::InvalidColor(s.to_string()))
    }
}

pub fn format_color(rgb: Rgb) -> String {
    format!("#{:02x}{:02x}{:02x}", rgb.0, rgb.1, rgb.2)
}

/// Pixel units and bounds used by the layout engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    pub row_unit: u32,
    /// Smallest row height still considered readable when shrinking.
    pub min_row_unit: u32,
    pub column_unit: u32,
    pub min_column_unit: u32,
    pub dendrogram_height: u32,
    pub feature_dendrogram_width: u32,
    pub condition_track_height: u32,
    pub track_height: u32,
    pub legend_height: u32,
    /// Margin right of the matrix reserved for feature and track labels.
    pub label_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub min_width: u32,
    pub max_width: u32,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        GeometryConfig {
            row_unit: 24,
            min_row_unit: 8,
            column_unit: 18,
            min_column_unit: 4,
            dendrogram_height: 100,
            feature_dendrogram_width: 120,
            condition_track_height: 20,
            track_height: 20,
            legend_height: 60,
            label_width: 100,
            min_height: 350,
            max_height: 1600,
            min_width: 500,
            max_width: 2400,
        }
    }
}

/// Largest canvas side, keeps the PNG buffer well inside memory.
pub const MAX_EXTENT: u32 = 16_384;

impl GeometryConfig {
    /// Bounds must be ordered and leave room for the legend margin, the
    /// fixed panels and the label margin.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(HeatmapError::InvalidGeometry(msg));
        if self.min_height > self.max_height {
            return invalid(format!(
                "min_height {} > max_height {}",
                self.min_height, self.max_height
            ));
        }
        if self.min_width > self.max_width {
            return invalid(format!("min_width {} > max_width {}", self.min_width, self.max_width));
        }
        if self.max_height > MAX_EXTENT || self.max_width > MAX_EXTENT {
            return invalid(format!("extents are limited to {}px", MAX_EXTENT));
        }
        let fixed_v = self.legend_height + self.dendrogram_height + self.condition_track_height;
        if self.max_height <= fixed_v {
            return invalid(format!(
                "max_height {} leaves no room for the matrix below {}px of legend and panels",
                self.max_height, fixed_v
            ));
        }
        let fixed_h = self.label_width + self.feature_dendrogram_width;
        if self.max_width <= fixed_h {
            return invalid(format!(
                "max_width {} leaves no room for the matrix beside {}px of labels and dendrogram",
                self.max_width, fixed_h
            ));
        }
        if self.min_row_unit == 0 || self.min_column_unit == 0 {
            return invalid("min_row_unit and min_column_unit must be positive".to_string());
        }
        if self.min_row_unit > self.row_unit {
            return invalid("min_row_unit must not exceed row_unit".to_string());
        }
        if self.min_column_unit > self.column_unit {
            return invalid("min_column_unit must not exceed column_unit".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatmapConfig {
    /// Order conditions by `condition_list` instead of lexicographically.
    pub sorted_conditions: bool,
    pub condition_list: Vec<String>,
    /// Discrete palette, indexed by category position.
    pub palette: Vec<String>,
    pub cluster_samples: bool,
    pub cluster_features: bool,
    pub max_features: usize,
    pub unknown_color: String,
    pub gradient_low: String,
    pub gradient_high: String,
    pub heat_low: String,
    pub heat_mid: String,
    pub heat_high: String,
    pub geometry: GeometryConfig,
}

impl Default for HeatmapConfig {
    fn default() -> Self {
        HeatmapConfig {
            sorted_conditions: false,
            condition_list: Vec::new(),
            // ColorBrewer Set1 without the grey, which is reserved for unknowns
            palette: [
                "#e41a1c", "#377eb8", "#4daf4a", "#984ea3", "#ff7f00", "#ffff33", "#a65628",
                "#f781bf",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            cluster_samples: true,
            cluster_features: true,
            max_features: 50,
            unknown_color: "#999999".to_string(),
            gradient_low: "#f7fbff".to_string(),
            gradient_high: "#08306b".to_string(),
            heat_low: "#2166ac".to_string(),
            heat_mid: "#f7f7f7".to_string(),
            heat_high: "#b2182b".to_string(),
            geometry: GeometryConfig::default(),
        }
    }
}

impl HeatmapConfig {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let config: HeatmapConfig = serde_json::from_reader(reader)?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every color field parses and the geometry is drawable.
    pub fn validate(&self) -> Result<()> {
        self.geometry.validate()?;
        self.palette_colors()?;
        for c in [
            &self.unknown_color,
            &self.gradient_low,
            &self.gradient_high,
            &self.heat_low,
            &self.heat_mid,
            &self.heat_high,
        ] {
            parse_color(c)?;
        }
        Ok(())
    }

    /// Order condition labels: the configured list first when
    /// `sorted_conditions` is set, everything else lexicographically after it.
    pub fn order_conditions(&self, labels: &[String]) -> Vec<String> {
        let mut rest: Vec<String> = labels.to_vec();
        rest.sort();
        rest.dedup();
        if !self.sorted_conditions {
            return rest;
        }
        let mut ordered: Vec<String> = Vec::with_capacity(rest.len());
        for label in &self.condition_list {
            if rest.contains(label) && !ordered.contains(label) {
                ordered.push(label.clone());
            }
        }
        rest.retain(|l| !ordered.contains(l));
        ordered.extend(rest);
        ordered
    }

    pub fn palette_colors(&self) -> Result<Vec<Rgb>> {
        if self.palette.is_empty() {
            return Err(HeatmapError::InvalidColor("empty palette".to_string()));
        }
        self.palette.iter().map(|c| parse_color(c)).collect()
    }

    pub fn unknown_rgb(&self) -> Result<Rgb> {
        parse_color(&self.unknown_color)
    }

    pub fn gradient(&self) -> Result<(Rgb, Rgb)> {
        Ok((parse_color(&self.gradient_low)?, parse_color(&self.gradient_high)?))
    }

    pub fn heat_scale(&self) -> Result<[Rgb; 3]> {
        Ok([
            parse_color(&self.heat_low)?,
            parse_color(&self.heat_mid)?,
            parse_color(&self.heat_high)?,
        ])
    }
}

/// Linear interpolation between two colors, `t` clamped to [0, 1].
pub fn lerp_color(a: Rgb, b: Rgb, t: f64) -> Rgb {
    let t = t.clamp(0.0, 1.0);
    let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * t).round() as u8;
    (mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_and_triplets() {
        assert_eq!(parse_color("#ff8000").unwrap(), (255, 128, 0));
        assert_eq!(parse_color(" 12, 34 ,56").unwrap(), (12, 34, 56));
        assert!(parse_color("#ff80").is_err());
        assert!(parse_color("red").is_err());
        assert_eq!(format_color((255, 128, 0)), "#ff8000");
    }

    #[test]
    fn default_config_is_valid() {
        let config = HeatmapConfig::default();
        config.validate().unwrap();
        assert_eq!(config.palette_colors().unwrap()[0], (228, 26, 28));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let json = r#"{"sorted_conditions": true, "condition_list": ["ctrl", "treated"],
                       "geometry": {"min_height": 400}}"#;
        let config: HeatmapConfig = serde_json::from_str(json).unwrap();
        assert!(config.sorted_conditions);
        assert_eq!(config.condition_list, vec!["ctrl", "treated"]);
        assert_eq!(config.geometry.min_height, 400);
        assert_eq!(config.geometry.max_height, 1600);
        assert!(config.cluster_samples);
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let json = r##"{"palette": ["#000000", "#ffffff"], "max_features": 5}"##;
        std::fs::write(&path, json).unwrap();
        let config = HeatmapConfig::from_json_file(&path).unwrap();
        assert_eq!(config.max_features, 5);
        assert_eq!(config.palette_colors().unwrap(), vec![(0, 0, 0), (255, 255, 255)]);

        std::fs::write(&path, r#"{"palette": ["nope"]}"#).unwrap();
        assert!(matches!(
            HeatmapConfig::from_json_file(&path),
            Err(HeatmapError::InvalidColor(_))
        ));
    }

    #[test]
    fn rejects_undrawable_geometry() {
        let mut config = HeatmapConfig::default();
        config.geometry.max_height = 50;
        assert!(matches!(config.validate(), Err(HeatmapError::InvalidGeometry(_))));

        let mut config = HeatmapConfig::default();
        config.geometry.min_width = 3000;
        assert!(matches!(config.validate(), Err(HeatmapError::InvalidGeometry(_))));

        let mut config = HeatmapConfig::default();
        config.geometry.max_width = config.geometry.label_width;
        config.geometry.min_width = 10;
        assert!(matches!(config.validate(), Err(HeatmapError::InvalidGeometry(_))));

        let mut config = HeatmapConfig::default();
        config.geometry.max_height = 100_000;
        assert!(matches!(config.validate(), Err(HeatmapError::InvalidGeometry(_))));
    }

    #[test]
    fn condition_ordering() {
        let labels: Vec<String> = ["C", "A", "B", "A"].iter().map(|s| s.to_string()).collect();
        let mut config = HeatmapConfig::default();
        assert_eq!(config.order_conditions(&labels), vec!["A", "B", "C"]);

        config.condition_list = vec!["C".into(), "X".into(), "A".into()];
        assert_eq!(config.order_conditions(&labels), vec!["A", "B", "C"]);

        config.sorted_conditions = true;
        assert_eq!(config.order_conditions(&labels), vec!["C", "A", "B"]);
    }

    #[test]
    fn lerp_endpoints() {
        assert_eq!(lerp_color((0, 0, 0), (200, 100, 50), 0.0), (0, 0, 0));
        assert_eq!(lerp_color((0, 0, 0), (200, 100, 50), 1.0), (200, 100, 50));
        assert_eq!(lerp_color((0, 0, 0), (200, 100, 50), 2.0), (200, 100, 50));
        assert_eq!(lerp_color((0, 0, 0), (200, 100, 50), 0.5), (100, 50, 25));
    }
}

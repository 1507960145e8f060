//! Projection of a computed heatmap into drawable primitives, plus SVG/PNG output.
//!
//! Nothing here clusters, filters or measures: every position comes from
//! `LayoutGeometry` and every order from the dendrograms handed in.

use crate::assembler::FeatureMatrix;
use crate::cluster::Dendrogram;
use crate::config::{format_color, lerp_color, Rgb};
use crate::error::{HeatmapError, Result};
use crate::layout::LayoutGeometry;
use crate::tracks::AnnotationTrack;
use crate::visibility::{LegendVisibility, VisibilityState};
use log::{debug, info};
use serde::Serialize;
use std::path::Path;

const WHITE: Rgb = (255, 255, 255);
const BLACK: Rgb = (0, 0, 0);
const GREY: Rgb = (128, 128, 128);
const FONT_SIZE: f64 = 11.0;
const LEGEND_SWATCH: f64 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    Start,
    Middle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    Rect {
        x: f64,
        y: f64,
        w: f64,
        h: f64,
        fill: Rgb,
    },
    Polyline {
        points: Vec<(f64, f64)>,
        stroke: Rgb,
    },
    Text {
        x: f64,
        y: f64,
        text: String,
        fill: Rgb,
        anchor: Anchor,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub width: u32,
    pub height: u32,
    pub primitives: Vec<Primitive>,
}

/// What a host needs to offer the scene for download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportDescriptor {
    pub width: u32,
    pub height: u32,
    pub filename: String,
}

impl ExportDescriptor {
    /// `heatmap_<colour dimension>_<clustered|sorted>.<ext>`
    pub fn new(
        width: u32,
        height: u32,
        tracks: &[AnnotationTrack],
        clustered: bool,
        ext: &str,
    ) -> Self {
        let dims: Vec<&str> = tracks.iter().skip(1).map(|t| t.column.as_str()).collect();
        let colour = if dims.is_empty() {
            crate::metadata::CONDITION_COLUMN.to_string()
        } else {
            dims.join("+")
        };
        let mode = if clustered { "clustered" } else { "sorted" };
        let sanitized: String = colour
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '+' || c == '-' { c } else { '_' })
            .collect();
        ExportDescriptor {
            width,
            height,
            filename: format!("heatmap_{}_{}.{}", sanitized, mode, ext),
        }
    }
}

/// Everything the renderer reads. Matrix axes are already in leaf order.
pub struct RenderInput<'a> {
    pub matrix: &'a FeatureMatrix,
    pub feature_dendrogram: &'a Dendrogram,
    pub sample_dendrogram: &'a Dendrogram,
    pub tracks: &'a [AnnotationTrack],
    pub geometry: &'a LayoutGeometry,
    pub visibility: &'a VisibilityState,
    /// Low, mid and high colors of the diverging matrix scale.
    pub heat_scale: [Rgb; 3],
}

/// Diverging color for a z-score, symmetric around 0.
pub fn heat_color(value: f64, limit: f64, scale: [Rgb; 3]) -> Rgb {
    let limit = if limit > 0.0 { limit } else { 1.0 };
    let t = (value / limit).clamp(-1.0, 1.0);
    if t < 0.0 {
        lerp_color(scale[1], scale[0], -t)
    } else {
        lerp_color(scale[1], scale[2], t)
    }
}

fn dim(color: Rgb) -> Rgb {
    lerp_color(color, WHITE, 0.65)
}

impl Scene {
    /// A neutral frame carrying an explanation, used instead of a chart
    /// whenever the input cannot be drawn.
    pub fn placeholder(message: &str, width: u32, height: u32) -> Scene {
        let (w, h) = (width as f64, height as f64);
        Scene {
            width,
            height,
            primitives: vec![
                Primitive::Rect {
                    x: 0.0,
                    y: 0.0,
                    w,
                    h,
                    fill: (245, 245, 245),
                },
                Primitive::Polyline {
                    points: vec![
                        (0.5, 0.5),
                        (w - 0.5, 0.5),
                        (w - 0.5, h - 0.5),
                        (0.5, h - 0.5),
                        (0.5, 0.5),
                    ],
                    stroke: (200, 200, 200),
                },
                Primitive::Text {
                    x: w / 2.0,
                    y: h / 2.0,
                    text: message.to_string(),
                    fill: GREY,
                    anchor: Anchor::Middle,
                },
            ],
        }
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.primitives.iter().filter_map(|p| match p {
            Primitive::Text { text, .. } => Some(text.as_str()),
            _ => None,
        })
    }
}

pub fn render(input: &RenderInput) -> Scene {
    let g = input.geometry;
    let m = input.matrix;
    let mut primitives = vec![Primitive::Rect {
        x: 0.0,
        y: 0.0,
        w: g.width as f64,
        h: g.height as f64,
        fill: WHITE,
    }];

    let (mx_left, mx_right) = g.x_span(g.x_domains.matrix);
    let (my_top, _) = g.y_span(g.y_domains.matrix);
    let rh = g.row_height();
    let cw = g.column_width();

    // matrix cells
    let limit = m.max_abs();
    for i in 0..m.n_rows() {
        let y = my_top + i as f64 * rh;
        for (j, &v) in m.row(i).iter().enumerate() {
            primitives.push(Primitive::Rect {
                x: mx_left + j as f64 * cw,
                y,
                w: cw,
                h: rh,
                fill: heat_color(v, limit, input.heat_scale),
            });
        }
        primitives.push(Primitive::Text {
            x: mx_right + 4.0,
            y: y + rh / 2.0 + FONT_SIZE / 3.0,
            text: m.features()[i].clone(),
            fill: BLACK,
            anchor: Anchor::Start,
        });
    }

    // annotation tracks: condition first, then the requested columns
    let mut spans = vec![g.y_span(g.y_domains.condition)];
    spans.extend(g.y_domains.tracks.iter().map(|&d| g.y_span(d)));
    for (track, (top, bottom)) in input.tracks.iter().zip(spans) {
        for i in 0..track.len() {
            primitives.push(Primitive::Rect {
                x: mx_left + i as f64 * cw,
                y: top,
                w: cw,
                h: bottom - top,
                fill: track.color_at(i),
            });
        }
        primitives.push(Primitive::Text {
            x: mx_right + 4.0,
            y: (top + bottom) / 2.0 + FONT_SIZE / 3.0,
            text: track.column.clone(),
            fill: BLACK,
            anchor: Anchor::Start,
        });
    }

    // sample dendrogram above the condition track
    if let Some(domain) = g.y_domains.sample_dendrogram {
        let d = input.sample_dendrogram;
        if d.is_clustered() && d.max_height() > 0.0 {
            let (top, bottom) = g.y_span(domain);
            let scale = (bottom - top - 4.0).max(1.0) / d.max_height();
            for seg in d.segments() {
                let points = seg
                    .x
                    .iter()
                    .zip(seg.y.iter())
                    .map(|(&lx, &ly)| {
                        (mx_left + (lx - 5.0) / 10.0 * cw + cw / 2.0, bottom - ly * scale)
                    })
                    .collect();
                primitives.push(Primitive::Polyline { points, stroke: BLACK });
            }
        }
    }

    // feature dendrogram left of the matrix, leaves pointing right
    if let Some(domain) = g.x_domains.feature_dendrogram {
        let d = input.feature_dendrogram;
        if d.is_clustered() && d.max_height() > 0.0 {
            let (left, right) = g.x_span(domain);
            let scale = (right - left - 4.0).max(1.0) / d.max_height();
            for seg in d.segments() {
                let points = seg
                    .x
                    .iter()
                    .zip(seg.y.iter())
                    .map(|(&lx, &ly)| {
                        (right - ly * scale, my_top + (lx - 5.0) / 10.0 * rh + rh / 2.0)
                    })
                    .collect();
                primitives.push(Primitive::Polyline { points, stroke: BLACK });
            }
        }
    }

    render_legend(input, &mut primitives);

    debug!("Scene has {} primitives", primitives.len());
    Scene {
        width: g.width,
        height: g.height,
        primitives,
    }
}

/// Condition legend along the top margin. Legend-only entries are dimmed,
/// hidden ones are left out.
fn render_legend(input: &RenderInput, primitives: &mut Vec<Primitive>) {
    let Some(condition) = input.tracks.first() else {
        return;
    };
    let g = input.geometry;
    let mut x = 4.0;
    let mut y = 6.0;
    for entry in &condition.legend {
        let (swatch, text_color) = match input.visibility.legend_state(&entry.label) {
            LegendVisibility::Visible => (entry.color, BLACK),
            LegendVisibility::LegendOnly => (dim(entry.color), GREY),
            LegendVisibility::Hidden => continue,
        };
        let label_width = entry.label.chars().count() as f64 * FONT_SIZE * 0.6;
        let item_width = LEGEND_SWATCH + 8.0 + label_width + 12.0;
        if x + item_width > g.width as f64 && x > 4.0 {
            x = 4.0;
            y += LEGEND_SWATCH + 6.0;
        }
        if y + LEGEND_SWATCH > g.legend_height as f64 {
            break;
        }
        primitives.push(Primitive::Rect {
            x,
            y,
            w: LEGEND_SWATCH,
            h: LEGEND_SWATCH,
            fill: swatch,
        });
        primitives.push(Primitive::Text {
            x: x + LEGEND_SWATCH + 4.0,
            y: y + LEGEND_SWATCH - 2.0,
            text: entry.label.clone(),
            fill: text_color,
            anchor: Anchor::Start,
        });
        x += item_width;
    }
}

/// Escape special XML characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub fn to_svg(scene: &Scene) -> String {
    let mut svg = String::new();
    svg.push_str(&format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}">
<style>
  text {{ font-family: 'DejaVu Sans', Arial, sans-serif; font-size: {fs}px; }}
</style>
"#,
        w = scene.width,
        h = scene.height,
        fs = FONT_SIZE
    ));

    for p in &scene.primitives {
        match p {
            Primitive::Rect { x, y, w, h, fill } => svg.push_str(&format!(
                r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="{}"/>"#,
                x,
                y,
                w,
                h,
                format_color(*fill)
            )),
            Primitive::Polyline { points, stroke } => {
                let pts: Vec<String> =
                    points.iter().map(|(x, y)| format!("{:.2},{:.2}", x, y)).collect();
                svg.push_str(&format!(
                    r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="1"/>"#,
                    pts.join(" "),
                    format_color(*stroke)
                ));
            }
            Primitive::Text { x, y, text, fill, anchor } => {
                let anchor = match anchor {
                    Anchor::Start => "start",
                    Anchor::Middle => "middle",
                };
                svg.push_str(&format!(
                    r#"<text x="{:.2}" y="{:.2}" fill="{}" text-anchor="{}">{}</text>"#,
                    x,
                    y,
                    format_color(*fill),
                    anchor,
                    escape_xml(text)
                ));
            }
        }
        svg.push('\n');
    }

    svg.push_str("</svg>\n");
    svg
}

fn put_pixel(buffer: &mut [u8], width: u32, height: u32, x: i64, y: i64, rgb: Rgb) {
    if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
        return;
    }
    let idx = (y as usize * width as usize + x as usize) * 3;
    buffer[idx] = rgb.0;
    buffer[idx + 1] = rgb.1;
    buffer[idx + 2] = rgb.2;
}

fn draw_line(buffer: &mut [u8], width: u32, height: u32, a: (f64, f64), b: (f64, f64), rgb: Rgb) {
    let steps = (b.0 - a.0).abs().max((b.1 - a.1).abs()).ceil().max(1.0) as usize;
    for s in 0..=steps {
        let t = s as f64 / steps as f64;
        let x = (a.0 + (b.0 - a.0) * t).floor() as i64;
        let y = (a.1 + (b.1 - a.1) * t).floor() as i64;
        put_pixel(buffer, width, height, x, y, rgb);
    }
}

/// Rasterize rectangles and lines. Text is not rasterized; labels only
/// appear in SVG output.
pub fn to_png(scene: &Scene) -> Result<image::RgbImage> {
    let (width, height) = (scene.width, scene.height);
    let mut buffer = vec![255u8; width as usize * height as usize * 3];

    for p in &scene.primitives {
        match p {
            Primitive::Rect { x, y, w, h, fill } => {
                let x0 = x.round().max(0.0) as u32;
                let y0 = y.round().max(0.0) as u32;
                let x1 = ((x + w).round().max(0.0) as u32).min(width);
                let y1 = ((y + h).round().max(0.0) as u32).min(height);
                for py in y0..y1 {
                    for px in x0..x1 {
                        put_pixel(&mut buffer, width, height, px as i64, py as i64, *fill);
                    }
                }
            }
            Primitive::Polyline { points, stroke } => {
                for pair in points.windows(2) {
                    draw_line(&mut buffer, width, height, pair[0], pair[1], *stroke);
                }
            }
            Primitive::Text { .. } => {}
        }
    }

    image::RgbImage::from_raw(width, height, buffer)
        .ok_or_else(|| HeatmapError::Internal("image buffer size mismatch".to_string()))
}

/// Write SVG or PNG depending on the file extension.
pub fn write_scene(scene: &Scene, path: &Path) -> Result<()> {
    let is_svg = path
        .extension()
        .map(|ext| ext.to_ascii_lowercase() == "svg")
        .unwrap_or(false);

    info!("Saving to {:?}...", path);
    if is_svg {
        std::fs::write(path, to_svg(scene))?;
    } else {
        to_png(scene)?.save(path)?;
    }
    Ok(())
}

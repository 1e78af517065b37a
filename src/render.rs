use crate::kde::DensityRaster;
use crate::types::{AggregatedCell, BoundingExtent, Grid, Marker, OverlaySet};
use anyhow::{anyhow, Context, Result};
use geo::Point;
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const BACKGROUND: Rgba<u8> = Rgba([245, 245, 245, 255]);
const EDGE: Rgba<u8> = Rgba([0, 0, 0, 255]);
const MARKER_RADIUS: i64 = 4;
const MAX_IMAGE_SIDE: u32 = 8192;

// viridis, low to high
const RAMP: [[u8; 3]; 5] = [
    [0x44, 0x01, 0x54],
    [0x3b, 0x52, 0x8b],
    [0x21, 0x91, 0x8c],
    [0x5e, 0xc9, 0x62],
    [0xfd, 0xe7, 0x25],
];

/// Maps world coordinates of an extent onto image pixels, y pointing down.
#[derive(Debug, Clone, Copy)]
pub struct Canvas {
    pub extent: BoundingExtent,
    pub width: u32,
    pub height: u32,
}

impl Canvas {
    /// Height follows the extent's aspect ratio.
    pub fn new(extent: BoundingExtent, width: u32) -> Self {
        let width = width.clamp(1, MAX_IMAGE_SIDE);
        let height = (width as f64 * extent.height() / extent.width())
            .round()
            .clamp(1.0, MAX_IMAGE_SIDE as f64) as u32;
        Self {
            extent,
            width,
            height,
        }
    }

    pub fn to_pixel(&self, x: f64, y: f64) -> (i64, i64) {
        let px = (x - self.extent.min_x) / self.extent.width() * self.width as f64;
        let py = (self.extent.max_y - y) / self.extent.height() * self.height as f64;
        (px.floor() as i64, py.floor() as i64)
    }

    /// World coordinates of a pixel center.
    pub fn to_world(&self, col: u32, row: u32) -> (f64, f64) {
        let x = self.extent.min_x + (col as f64 + 0.5) / self.width as f64 * self.extent.width();
        let y = self.extent.max_y - (row as f64 + 0.5) / self.height as f64 * self.extent.height();
        (x, y)
    }
}

/// Choropleth of `log_value` over the grid extent with cell outlines and
/// overlay markers.
pub fn render_cells(
    grid: &Grid,
    cells: &[AggregatedCell],
    overlays: &[OverlaySet],
    image_width: u32,
) -> Result<RgbaImage> {
    let canvas = Canvas::new(grid.extent(), image_width);
    let (lo, hi) = cells
        .iter()
        .map(|c| c.log_value)
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    let colors: HashMap<usize, Rgba<u8>> = cells
        .iter()
        .map(|c| (c.cell.index, ramp_color(normalize(c.log_value, lo, hi))))
        .collect();

    let mut img = paint(canvas, |x, y| {
        grid.locate(x, y)
            .and_then(|index| colors.get(&index).copied())
            .unwrap_or(BACKGROUND)
    })?;

    for agg in cells {
        let (x0, y1) = canvas.to_pixel(agg.cell.rect.min().x, agg.cell.rect.min().y);
        let (x1, y0) = canvas.to_pixel(agg.cell.rect.max().x, agg.cell.rect.max().y);
        draw_rect_outline(&mut img, x0, y0, x1, y1, EDGE);
    }

    draw_overlays(&mut img, &canvas, overlays);
    Ok(img)
}

/// Density raster drawn as `levels` quantized shades of `color`.
pub fn render_density(
    raster: &DensityRaster,
    levels: u32,
    color: &str,
    overlays: &[OverlaySet],
) -> Result<RgbaImage> {
    let canvas = Canvas {
        extent: raster.extent,
        width: raster.width,
        height: raster.height,
    };
    let base = hex_to_rgba(color);
    let mut img = paint(canvas, |_, _| BACKGROUND)?;
    img.enumerate_pixels_mut().for_each(|(col, row, px)| {
        let value = raster.get(col, row).unwrap_or(0.0);
        let level = raster.level_of(value, levels);
        if level > 0 {
            let alpha = level as f64 / (levels.max(2) - 1) as f64;
            *px = blend(BACKGROUND, base, alpha);
        }
    });
    draw_overlays(&mut img, &canvas, overlays);
    Ok(img)
}

pub fn save_png(path: &Path, img: &RgbaImage) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create output directory")?;
    }
    img.save(path)
        .with_context(|| format!("Failed to save image {:?}", path))
}

/// Fills every pixel from its world-space center, one row per rayon task.
fn paint<F>(canvas: Canvas, shade: F) -> Result<RgbaImage>
where
    F: Fn(f64, f64) -> Rgba<u8> + Sync,
{
    let buf: Vec<u8> = (0..canvas.height)
        .into_par_iter()
        .flat_map_iter(|row| {
            let shade = &shade;
            (0..canvas.width).flat_map(move |col| {
                let (x, y) = canvas.to_world(col, row);
                shade(x, y).0
            })
        })
        .collect();
    ImageBuffer::from_raw(canvas.width, canvas.height, buf)
        .ok_or_else(|| anyhow!("Image buffer does not match {}x{}", canvas.width, canvas.height))
}

fn draw_overlays(img: &mut RgbaImage, canvas: &Canvas, overlays: &[OverlaySet]) {
    for overlay in overlays {
        let color = hex_to_rgba(&overlay.color);
        for point in &overlay.points {
            draw_marker(img, canvas, *point, overlay.marker, color);
        }
    }
}

fn draw_marker(img: &mut RgbaImage, canvas: &Canvas, point: Point<f64>, marker: Marker, color: Rgba<u8>) {
    let (cx, cy) = canvas.to_pixel(point.x(), point.y());
    let r = MARKER_RADIUS;
    match marker {
        Marker::Dot => {
            for dy in -r / 2..=r / 2 {
                for dx in -r / 2..=r / 2 {
                    put(img, cx + dx, cy + dy, color);
                }
            }
        }
        Marker::Cross => {
            for d in -r..=r {
                put(img, cx + d, cy + d, color);
                put(img, cx + d, cy - d, color);
            }
        }
        // downward-pointing, filled
        Marker::Triangle => {
            for dy in -r..=r {
                let half = (r - dy) / 2;
                for dx in -half..=half {
                    put(img, cx + dx, cy + dy, color);
                }
            }
        }
    }
}

fn draw_rect_outline(img: &mut RgbaImage, x0: i64, y0: i64, x1: i64, y1: i64, color: Rgba<u8>) {
    for x in x0..=x1 {
        put(img, x, y0, color);
        put(img, x, y1, color);
    }
    for y in y0..=y1 {
        put(img, x0, y, color);
        put(img, x1, y, color);
    }
}

fn put(img: &mut RgbaImage, x: i64, y: i64, color: Rgba<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn normalize(v: f64, lo: f64, hi: f64) -> f64 {
    if !v.is_finite() || hi <= lo {
        return 0.5;
    }
    ((v - lo) / (hi - lo)).clamp(0.0, 1.0)
}

fn ramp_color(t: f64) -> Rgba<u8> {
    let scaled = t * (RAMP.len() - 1) as f64;
    let i = (scaled.floor() as usize).min(RAMP.len() - 2);
    let frac = scaled - i as f64;
    let (a, b) = (RAMP[i], RAMP[i + 1]);
    let mix = |c: usize| (a[c] as f64 + (b[c] as f64 - a[c] as f64) * frac).round() as u8;
    Rgba([mix(0), mix(1), mix(2), 255])
}

fn blend(under: Rgba<u8>, over: Rgba<u8>, alpha: f64) -> Rgba<u8> {
    let alpha = alpha.clamp(0.0, 1.0);
    let mix = |c: usize| (under[c] as f64 * (1.0 - alpha) + over[c] as f64 * alpha).round() as u8;
    Rgba([mix(0), mix(1), mix(2), 255])
}

fn hex_to_rgba(hex: &str) -> Rgba<u8> {
    let hex = hex.trim_start_matches('#');
    let channel = |range: std::ops::Range<usize>| {
        hex.get(range)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .unwrap_or(0)
    };
    Rgba([channel(0..2), channel(2..4), channel(4..6), 255])
}

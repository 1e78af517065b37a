//! Weighted 2-D kernel density estimation.
//!
//! Each point carries its own weight, so heavy points are not replicated to
//! fake a weighted estimate. The kernel is a Gaussian product kernel with a
//! per-axis bandwidth; the default bandwidth follows Scott's rule on the
//! weighted sample.

use crate::error::{Error, Result};
use crate::types::BoundingExtent;
use rayon::prelude::*;
use rstar::{RTree, RTreeObject, AABB};
use std::f64::consts::PI;

/// Kernel contributions beyond this many bandwidths are ignored.
const KERNEL_CUTOFF: f64 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedPoint {
    pub x: f64,
    pub y: f64,
    pub weight: f64,
}

impl RTreeObject for WeightedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.x, self.y])
    }
}

/// `floor(ln(value))`, the weight the permit density map gives a valuation.
pub fn log_weight(value: f64) -> f64 {
    value.ln().floor()
}

#[derive(Debug, Clone)]
pub struct WeightedKde {
    points: RTree<WeightedPoint>,
    total_weight: f64,
    bandwidth: (f64, f64),
}

impl WeightedKde {
    /// Points whose weight is not a positive finite number are skipped. The
    /// bandwidth comes from Scott's rule, which fails for a sample without
    /// spread on either axis.
    pub fn new(points: impl IntoIterator<Item = WeightedPoint>) -> Result<Self> {
        let mut kde = Self::collect(points)?;
        let (bx, by) = kde.scott_bandwidth();
        kde.set_bandwidth(bx, by)?;
        Ok(kde)
    }

    pub fn with_fixed_bandwidth(
        points: impl IntoIterator<Item = WeightedPoint>,
        bx: f64,
        by: f64,
    ) -> Result<Self> {
        let mut kde = Self::collect(points)?;
        kde.set_bandwidth(bx, by)?;
        Ok(kde)
    }

    fn collect(points: impl IntoIterator<Item = WeightedPoint>) -> Result<Self> {
        let points: Vec<WeightedPoint> = points
            .into_iter()
            .filter(|p| p.weight.is_finite() && p.weight > 0.0 && p.x.is_finite() && p.y.is_finite())
            .collect();
        if points.is_empty() {
            return Err(Error::NoPositiveWeight);
        }
        let total_weight = points.iter().map(|p| p.weight).sum();
        Ok(Self {
            points: RTree::bulk_load(points),
            total_weight,
            bandwidth: (0.0, 0.0),
        })
    }

    pub fn with_bandwidth(mut self, bx: f64, by: f64) -> Result<Self> {
        self.set_bandwidth(bx, by)?;
        Ok(self)
    }

    fn set_bandwidth(&mut self, bx: f64, by: f64) -> Result<()> {
        let valid = |h: f64| h.is_finite() && h > 0.0;
        if !valid(bx) || !valid(by) {
            return Err(Error::InvalidBandwidth(bx, by));
        }
        self.bandwidth = (bx, by);
        Ok(())
    }

    pub fn bandwidth(&self) -> (f64, f64) {
        self.bandwidth
    }

    pub fn len(&self) -> usize {
        self.points.size()
    }

    pub fn is_empty(&self) -> bool {
        self.points.size() == 0
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Weighted standard deviation per axis scaled by `n_eff^(-1/6)`, where
    /// `n_eff = (sum w)^2 / sum w^2`.
    fn scott_bandwidth(&self) -> (f64, f64) {
        let v1 = self.total_weight;
        let v2: f64 = self.points.iter().map(|p| p.weight * p.weight).sum();
        let n_eff = v1 * v1 / v2;
        let mean_x = self.points.iter().map(|p| p.weight * p.x).sum::<f64>() / v1;
        let mean_y = self.points.iter().map(|p| p.weight * p.y).sum::<f64>() / v1;
        let norm = v1 - v2 / v1;
        let (ssx, ssy) = self.points.iter().fold((0.0, 0.0), |(sx, sy), p| {
            (
                sx + p.weight * (p.x - mean_x).powi(2),
                sy + p.weight * (p.y - mean_y).powi(2),
            )
        });
        let sx = (ssx / norm).sqrt();
        let sy = (ssy / norm).sqrt();
        let factor = n_eff.powf(-1.0 / 6.0);
        (sx * factor, sy * factor)
    }

    /// Only points within `KERNEL_CUTOFF` bandwidths of `(x, y)` on both
    /// axes contribute.
    pub fn density(&self, x: f64, y: f64) -> f64 {
        let (bx, by) = self.bandwidth;
        let (rx, ry) = (KERNEL_CUTOFF * bx, KERNEL_CUTOFF * by);
        let window = AABB::from_corners([x - rx, y - ry], [x + rx, y + ry]);
        let sum: f64 = self
            .points
            .locate_in_envelope(&window)
            .map(|p| {
                let u = (x - p.x) / bx;
                let v = (y - p.y) / by;
                p.weight * (-0.5 * (u * u + v * v)).exp()
            })
            .sum();
        sum / (2.0 * PI * bx * by * self.total_weight)
    }

    /// Evaluates the density at pixel centers over `extent`. Rows run from
    /// the top (max y) down.
    pub fn raster(&self, extent: BoundingExtent, width: u32, height: u32) -> DensityRaster {
        let px = extent.width() / width as f64;
        let py = extent.height() / height as f64;
        let values: Vec<f64> = (0..height)
            .into_par_iter()
            .flat_map_iter(|row| {
                let y = extent.max_y - (row as f64 + 0.5) * py;
                (0..width).map(move |col| {
                    let x = extent.min_x + (col as f64 + 0.5) * px;
                    self.density(x, y)
                })
            })
            .collect();
        DensityRaster {
            width,
            height,
            extent,
            values,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DensityRaster {
    pub width: u32,
    pub height: u32,
    pub extent: BoundingExtent,
    pub values: Vec<f64>,
}

impl DensityRaster {
    pub fn get(&self, col: u32, row: u32) -> Option<f64> {
        if col >= self.width || row >= self.height {
            return None;
        }
        self.values.get((row * self.width + col) as usize).copied()
    }

    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(0.0, f64::max)
    }

    /// Band of `value` when `[0, max]` is split into `levels` equal bands;
    /// zero density is band 0.
    pub fn level_of(&self, value: f64, levels: u32) -> u32 {
        let max = self.max();
        if max <= 0.0 || levels == 0 {
            return 0;
        }
        ((value / max) * levels as f64).floor().clamp(0.0, (levels - 1) as f64) as u32
    }
}

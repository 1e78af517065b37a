//! Containment join of points onto a [`Grid`], per-cell reduction of one
//! numeric attribute, and percentile trimming of the reduced values.
//!
//! The join is indexed. The default [`JoinStrategy::Bucket`] computes a
//! point's cell directly from the grid step (constant time per point);
//! [`JoinStrategy::RTree`] bulk-loads the cell rectangles into an R-tree and
//! resolves candidates with the exact half-open containment test. Both yield
//! the same membership.

use crate::error::{Error, Result};
use crate::types::{AggregatedCell, Grid, JoinedPoint, PointRecord};
use geo::Rect;
use rstar::{RTree, RTreeObject, AABB};
use serde::Deserialize;
use std::collections::BTreeMap;

pub const DEFAULT_LOG_OFFSET: f64 = 0.01;

/// Collapses the attribute values of one cell into a single scalar.
pub trait Reducer {
    /// `values` is never empty.
    fn reduce(&self, values: &[f64]) -> f64;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReducerKind {
    #[default]
    Mean,
    Median,
    Sum,
    Max,
}

impl Reducer for ReducerKind {
    fn reduce(&self, values: &[f64]) -> f64 {
        match self {
            ReducerKind::Mean => values.iter().sum::<f64>() / values.len() as f64,
            ReducerKind::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            ReducerKind::Sum => values.iter().sum(),
            ReducerKind::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JoinStrategy {
    #[default]
    Bucket,
    RTree,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BoundMode {
    /// Keep values equal to a percentile bound
    #[default]
    Inclusive,
    /// Drop values equal to a percentile bound
    Exclusive,
}

/// Percentile band, in percent, that reduced cell values must fall into.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FilterPolicy {
    pub low: f64,
    pub high: f64,
    #[serde(default)]
    pub bounds: BoundMode,
}

impl FilterPolicy {
    pub fn new(low: f64, high: f64) -> Result<Self> {
        let policy = Self {
            low,
            high,
            bounds: BoundMode::Inclusive,
        };
        policy.validate()?;
        Ok(policy)
    }

    /// `[0, 100]` inclusive: retains every cell.
    pub fn disabled() -> Self {
        Self {
            low: 0.0,
            high: 100.0,
            bounds: BoundMode::Inclusive,
        }
    }

    pub fn exclusive(mut self) -> Self {
        self.bounds = BoundMode::Exclusive;
        self
    }

    pub fn validate(&self) -> Result<()> {
        let in_range = |p: f64| (0.0..=100.0).contains(&p);
        if !in_range(self.low) || !in_range(self.high) || self.low > self.high {
            return Err(Error::InvalidFilterPolicy {
                low: self.low,
                high: self.high,
            });
        }
        Ok(())
    }

    fn admits(&self, value: f64, low: f64, high: f64) -> bool {
        match self.bounds {
            BoundMode::Inclusive => value >= low && value <= high,
            BoundMode::Exclusive => value > low && value < high,
        }
    }
}

impl Default for FilterPolicy {
    fn default() -> Self {
        Self {
            low: 5.0,
            high: 97.0,
            bounds: BoundMode::Inclusive,
        }
    }
}

/// Percentile `p` (0..=100) of ascending `sorted`, interpolating linearly
/// between the closest ranks.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let rank = (p.clamp(0.0, 100.0) / 100.0) * last as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let frac = rank - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * frac)
}

/// R-tree entry for a rectangle tagged with its position in a cell list.
#[derive(Debug, Clone)]
pub struct IndexedRect {
    pub index: usize,
    aabb: AABB<[f64; 2]>,
}

impl IndexedRect {
    pub fn new(index: usize, rect: &Rect<f64>) -> Self {
        Self {
            index,
            aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
        }
    }
}

impl RTreeObject for IndexedRect {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

#[derive(Debug, Clone)]
pub struct SpatialAggregator<R = ReducerKind> {
    reducer: R,
    join: JoinStrategy,
    log_offset: f64,
}

impl Default for SpatialAggregator {
    fn default() -> Self {
        Self::new(ReducerKind::Mean)
    }
}

impl<R: Reducer> SpatialAggregator<R> {
    pub fn new(reducer: R) -> Self {
        Self {
            reducer,
            join: JoinStrategy::Bucket,
            log_offset: DEFAULT_LOG_OFFSET,
        }
    }

    pub fn with_join_strategy(mut self, join: JoinStrategy) -> Self {
        self.join = join;
        self
    }

    pub fn with_log_offset(mut self, log_offset: f64) -> Self {
        self.log_offset = log_offset;
        self
    }

    /// Join, reduce, trim and log-transform in one pass.
    ///
    /// Every record must carry `attribute` as a finite number, whether or not
    /// it lands in a cell.
    pub fn aggregate<'g>(
        &self,
        points: &[PointRecord],
        grid: &'g Grid,
        attribute: &str,
        policy: &FilterPolicy,
    ) -> Result<Vec<AggregatedCell<'g>>> {
        policy.validate()?;
        for (record, point) in points.iter().enumerate() {
            attribute_value(point, attribute, record)?;
        }
        let joined = self.join(points, grid);
        let reduced = self.reduce_joined(points, grid, &joined, attribute)?;
        self.filter(reduced, policy, attribute)
    }

    /// Assigns each point to the one cell containing it. Points outside every
    /// cell are left out. Output follows input point order.
    pub fn join(&self, points: &[PointRecord], grid: &Grid) -> Vec<JoinedPoint> {
        match self.join {
            JoinStrategy::Bucket => points
                .iter()
                .enumerate()
                .filter_map(|(point_index, p)| {
                    grid.locate(p.x(), p.y()).map(|cell_index| JoinedPoint {
                        point_index,
                        cell_index,
                    })
                })
                .collect(),
            JoinStrategy::RTree => {
                let tree = RTree::bulk_load(
                    grid.cells()
                        .iter()
                        .map(|cell| IndexedRect::new(cell.index, &cell.rect))
                        .collect(),
                );
                points
                    .iter()
                    .enumerate()
                    .filter_map(|(point_index, p)| {
                        let (x, y) = (p.x(), p.y());
                        tree.locate_in_envelope_intersecting(&AABB::from_point([x, y]))
                            .map(|entry| entry.index)
                            .filter(|&i| grid.cells()[i].contains(x, y))
                            .min()
                            .map(|cell_index| JoinedPoint {
                                point_index,
                                cell_index,
                            })
                    })
                    .collect()
            }
        }
    }

    /// Reduces `attribute` over each cell's joined points. `joined` may be
    /// any subset of a [`join`](Self::join) result, which is how a predicate
    /// applied after the join is aggregated. Empty cells produce no entry;
    /// output is ordered by cell index. A membership pointing outside
    /// `points` or `grid` is an error.
    pub fn reduce_joined<'g>(
        &self,
        points: &[PointRecord],
        grid: &'g Grid,
        joined: &[JoinedPoint],
        attribute: &str,
    ) -> Result<Vec<AggregatedCell<'g>>> {
        let mut groups: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
        for member in joined {
            let point = points.get(member.point_index).ok_or(Error::UnknownPoint {
                index: member.point_index,
                len: points.len(),
            })?;
            let value = attribute_value(point, attribute, member.point_index)?;
            groups.entry(member.cell_index).or_default().push(value);
        }

        groups
            .into_iter()
            .map(|(index, values)| {
                let cell = grid.cell(index).ok_or(Error::UnknownCell {
                    index,
                    len: grid.len(),
                })?;
                let value = self.reducer.reduce(&values);
                Ok(AggregatedCell {
                    cell,
                    count: values.len(),
                    value,
                    log_value: (value + self.log_offset).ln(),
                })
            })
            .collect()
    }

    /// Keeps the cells whose value lies inside the policy's percentile band,
    /// with percentiles taken over the values of `cells` themselves.
    pub fn filter<'g>(
        &self,
        cells: Vec<AggregatedCell<'g>>,
        policy: &FilterPolicy,
        attribute: &str,
    ) -> Result<Vec<AggregatedCell<'g>>> {
        let empty = || Error::EmptyResult {
            attribute: attribute.to_string(),
        };
        let mut values: Vec<f64> = cells.iter().map(|c| c.value).collect();
        values.sort_by(f64::total_cmp);
        let low = percentile(&values, policy.low).ok_or_else(empty)?;
        let high = percentile(&values, policy.high).ok_or_else(empty)?;

        let kept: Vec<_> = cells
            .into_iter()
            .filter(|c| policy.admits(c.value, low, high))
            .collect();
        if kept.is_empty() {
            return Err(empty());
        }
        Ok(kept)
    }
}

fn attribute_value(point: &PointRecord, attribute: &str, record: usize) -> Result<f64> {
    match point.number(attribute) {
        Some(v) if v.is_finite() => Ok(v),
        Some(_) => Err(Error::AttributeNotNumeric {
            attribute: attribute.to_string(),
            record,
        }),
        None if point.attribute(attribute).is_some() => Err(Error::AttributeNotNumeric {
            attribute: attribute.to_string(),
            record,
        }),
        None => Err(Error::AttributeNotFound {
            attribute: attribute.to_string(),
            record,
        }),
    }
}

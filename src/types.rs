use crate::error::{Error, Result};
use geo::{BoundingRect, Coord, MultiPoint, Point, Polygon, Rect};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Number(f64),
    Text(String),
}

/// Named attribute access shared by located and unlocated records.
pub trait Attributed {
    fn attribute(&self, name: &str) -> Option<&AttributeValue>;

    fn number(&self, name: &str) -> Option<f64> {
        match self.attribute(name) {
            Some(AttributeValue::Number(v)) => Some(*v),
            _ => None,
        }
    }

    fn text(&self, name: &str) -> Option<&str> {
        match self.attribute(name) {
            Some(AttributeValue::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// An input row's attributes without a location, as read for summaries that
/// cover every row of the file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttributeRecord {
    attributes: HashMap<String, AttributeValue>,
}

impl AttributeRecord {
    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_number(self, name: impl Into<String>, value: f64) -> Self {
        self.with_attribute(name, AttributeValue::Number(value))
    }

    pub fn with_text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_attribute(name, AttributeValue::Text(value.into()))
    }
}

impl Attributed for AttributeRecord {
    fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

/// A located permit (or any other point observation) with named attributes.
///
/// Coordinates are validated on construction, so every `PointRecord` that
/// exists has finite coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct PointRecord {
    point: Point<f64>,
    attributes: HashMap<String, AttributeValue>,
}

impl PointRecord {
    pub fn new(x: f64, y: f64) -> Result<Self> {
        if !x.is_finite() || !y.is_finite() {
            return Err(Error::MalformedRecord { x, y });
        }
        Ok(Self {
            point: Point::new(x, y),
            attributes: HashMap::new(),
        })
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn with_number(self, name: impl Into<String>, value: f64) -> Self {
        self.with_attribute(name, AttributeValue::Number(value))
    }

    pub fn with_text(self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_attribute(name, AttributeValue::Text(value.into()))
    }

    pub fn point(&self) -> Point<f64> {
        self.point
    }

    pub fn x(&self) -> f64 {
        self.point.x()
    }

    pub fn y(&self) -> f64 {
        self.point.y()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        Attributed::number(self, name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        Attributed::text(self, name)
    }
}

impl Attributed for PointRecord {
    fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

/// Minimal axis-aligned rectangle around a point set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingExtent {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingExtent {
    /// Returns `None` for an empty slice.
    pub fn from_points(points: &[PointRecord]) -> Option<Self> {
        let multi: MultiPoint<f64> = points.iter().map(PointRecord::point).collect();
        multi.bounding_rect().map(Self::from)
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn to_rect(&self) -> Rect<f64> {
        Rect::new(
            Coord { x: self.min_x, y: self.min_y },
            Coord { x: self.max_x, y: self.max_y },
        )
    }
}

impl From<Rect<f64>> for BoundingExtent {
    fn from(rect: Rect<f64>) -> Self {
        Self {
            min_x: rect.min().x,
            max_x: rect.max().x,
            min_y: rect.min().y,
            max_y: rect.max().y,
        }
    }
}

/// One rectangle of a [`Grid`].
///
/// A cell owns `[x0, x1) x [y0, y1)`. Cells on the closing column or row of
/// a full grid also own their upper edge so the extent maximum is covered.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub index: usize,
    pub col: usize,
    pub row: usize,
    pub rect: Rect<f64>,
    pub(crate) closes_x: bool,
    pub(crate) closes_y: bool,
}

impl Cell {
    pub fn polygon(&self) -> Polygon<f64> {
        self.rect.to_polygon()
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        let (min, max) = (self.rect.min(), self.rect.max());
        let in_x = x >= min.x && (x < max.x || (self.closes_x && x == max.x));
        let in_y = y >= min.y && (y < max.y || (self.closes_y && y == max.y));
        in_x && in_y
    }
}

/// A regular tessellation over the extent of a point set.
///
/// Cells are stored x-major (x index outer, y index inner), so a cell's
/// `index` is `col * rows + row`.
#[derive(Debug, Clone)]
pub struct Grid {
    pub(crate) cells: Vec<Cell>,
    pub(crate) extent: BoundingExtent,
    pub(crate) x_lines: Vec<f64>,
    pub(crate) y_lines: Vec<f64>,
    pub(crate) resolution: usize,
    pub(crate) include_outer: bool,
    pub(crate) crs: Option<String>,
}

impl Grid {
    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn cell(&self, index: usize) -> Option<&Cell> {
        self.cells.get(index)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Extent of the source points (not of the emitted cells when truncated).
    pub fn extent(&self) -> BoundingExtent {
        self.extent
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn includes_outer(&self) -> bool {
        self.include_outer
    }

    pub fn crs(&self) -> Option<&str> {
        self.crs.as_deref()
    }

    /// Number of cell columns along x.
    pub fn cols(&self) -> usize {
        self.x_lines.len().saturating_sub(1)
    }

    /// Number of cell rows along y.
    pub fn rows(&self) -> usize {
        self.y_lines.len().saturating_sub(1)
    }

    pub fn step(&self) -> (f64, f64) {
        (
            self.extent.width() / self.resolution as f64,
            self.extent.height() / self.resolution as f64,
        )
    }
}

/// A point's membership in a grid cell, produced by the containment join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinedPoint {
    pub point_index: usize,
    pub cell_index: usize,
}

/// A grid cell with the reduced attribute of the points it contains.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedCell<'g> {
    pub cell: &'g Cell,
    pub count: usize,
    /// Reducer output; the arithmetic mean unless another reducer is chosen.
    pub value: f64,
    /// `ln(value + offset)`, for display only.
    pub log_value: f64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Marker {
    Triangle,
    Cross,
    Dot,
}

/// Flagged points drawn on top of the aggregated cells.
#[derive(Debug, Clone)]
pub struct OverlaySet {
    pub name: String,
    pub label: String,
    pub color: String, // Hex code
    pub marker: Marker,
    pub points: Vec<Point<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_finite_coordinates_rejected() {
        assert!(matches!(
            PointRecord::new(f64::NAN, 1.0),
            Err(Error::MalformedRecord { .. })
        ));
        assert!(PointRecord::new(1.0, f64::INFINITY).is_err());
    }

    #[test]
    fn test_typed_attribute_access() {
        let p = PointRecord::new(1.0, 2.0)
            .unwrap()
            .with_number("declared_valuation", 10.0)
            .with_text("description", "Erect");
        assert_eq!(p.number("declared_valuation"), Some(10.0));
        assert_eq!(p.text("declared_valuation"), None);
        assert_eq!(p.text("description"), Some("Erect"));
        assert_eq!(p.number("description"), None);

        let row = AttributeRecord::default()
            .with_number("declared_valuation", 10.0)
            .with_text("description", "Erect");
        assert_eq!(row.number("declared_valuation"), p.number("declared_valuation"));
        assert_eq!(row.text("description"), p.text("description"));
        assert_eq!(row.attribute("long"), None);
    }

    #[test]
    fn test_extent_from_points() {
        let points = vec![
            PointRecord::new(-1.0, 4.0).unwrap(),
            PointRecord::new(3.0, -2.0).unwrap(),
            PointRecord::new(0.0, 0.0).unwrap(),
        ];
        let extent = BoundingExtent::from_points(&points).unwrap();
        assert_eq!((extent.min_x, extent.max_x, extent.min_y, extent.max_y), (-1.0, 3.0, -2.0, 4.0));
        assert_eq!((extent.width(), extent.height()), (4.0, 6.0));
        assert!(BoundingExtent::from_points(&[]).is_none());
    }
}

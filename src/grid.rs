//! Regular tessellation over the bounding extent of a point set.

use crate::error::{Error, Result};
use crate::types::{BoundingExtent, Cell, Grid, PointRecord};
use geo::{Coord, Rect};

pub const DEFAULT_RESOLUTION: usize = 100;

#[derive(Debug, Clone)]
pub struct GridOptions {
    /// Emit the full n x n tessellation. When false the last two intervals on
    /// each axis are left out, giving (n-2) x (n-2) cells.
    pub include_outer: bool,
    /// Coordinate reference system label carried through untouched.
    pub crs: Option<String>,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            include_outer: true,
            crs: None,
        }
    }
}

/// Builds an `n` by `n` grid over the extent of `points`.
///
/// Cells are emitted with the x index outer and the y index inner, and each
/// cell's `index` is its position in that order.
pub fn build_grid(points: &[PointRecord], n: usize, options: &GridOptions) -> Result<Grid> {
    if n < 2 {
        return Err(Error::InvalidResolution(n));
    }
    let extent = BoundingExtent::from_points(points).ok_or(Error::EmptyInput)?;
    let (width, height) = (extent.width(), extent.height());
    if !(width > 0.0 && height > 0.0) {
        return Err(Error::DegenerateExtent { width, height });
    }

    let x_lines = grid_lines(extent.min_x, extent.max_x, n, options.include_outer);
    let y_lines = grid_lines(extent.min_y, extent.max_y, n, options.include_outer);
    let cols = x_lines.len().saturating_sub(1);
    let rows = y_lines.len().saturating_sub(1);

    let mut cells = Vec::with_capacity(cols * rows);
    for (col, xs) in x_lines.windows(2).enumerate() {
        for (row, ys) in y_lines.windows(2).enumerate() {
            cells.push(Cell {
                index: cells.len(),
                col,
                row,
                rect: Rect::new(Coord { x: xs[0], y: ys[0] }, Coord { x: xs[1], y: ys[1] }),
                closes_x: options.include_outer && col + 1 == cols,
                closes_y: options.include_outer && row + 1 == rows,
            });
        }
    }

    Ok(Grid {
        cells,
        extent,
        x_lines,
        y_lines,
        resolution: n,
        include_outer: options.include_outer,
        crs: options.crs.clone(),
    })
}

fn grid_lines(min: f64, max: f64, n: usize, include_outer: bool) -> Vec<f64> {
    let step = (max - min) / n as f64;
    let count = if include_outer { n + 1 } else { n - 1 };
    (0..count)
        .map(|i| if i == n { max } else { min + step * i as f64 })
        .collect()
}

impl Grid {
    /// Index of the cell containing `(x, y)`, computed directly from the
    /// step size rather than by scanning cells.
    pub fn locate(&self, x: f64, y: f64) -> Option<usize> {
        let (step_x, step_y) = self.step();
        let col = axis_slot(&self.x_lines, step_x, x, self.include_outer)?;
        let row = axis_slot(&self.y_lines, step_y, y, self.include_outer)?;
        Some(col * self.rows() + row)
    }
}

fn axis_slot(lines: &[f64], step: f64, v: f64, closed: bool) -> Option<usize> {
    let slots = lines.len().checked_sub(1).filter(|&s| s > 0)?;
    let (first, last) = (lines[0], lines[slots]);
    if !v.is_finite() || v < first || v > last || (v == last && !closed) {
        return None;
    }
    let mut i = (((v - first) / step).floor() as usize).min(slots - 1);
    // line positions carry rounding, trust them over the division
    while i > 0 && v < lines[i] {
        i -= 1;
    }
    while i + 1 < slots && v >= lines[i + 1] {
        i += 1;
    }
    Some(i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    fn corners() -> Vec<PointRecord> {
        vec![
            PointRecord::new(0.0, 0.0).unwrap(),
            PointRecord::new(10.0, 0.0).unwrap(),
            PointRecord::new(0.0, 5.0).unwrap(),
            PointRecord::new(10.0, 5.0).unwrap(),
        ]
    }

    #[test]
    fn test_full_grid_has_n_squared_cells() {
        let grid = build_grid(&corners(), 4, &GridOptions::default()).unwrap();
        assert_eq!(grid.len(), 16);
        assert_eq!(grid.cols(), 4);
        assert_eq!(grid.rows(), 4);
        assert_eq!(grid.step(), (2.5, 1.25));
    }

    #[test]
    fn test_truncated_grid_drops_outer_intervals() {
        let options = GridOptions {
            include_outer: false,
            crs: None,
        };
        let grid = build_grid(&corners(), 5, &options).unwrap();
        assert_eq!(grid.len(), 9);
        let last = grid.cells().last().unwrap();
        assert_eq!(last.rect.max(), Coord { x: 6.0, y: 3.0 });

        let tiny = build_grid(&corners(), 2, &options).unwrap();
        assert!(tiny.is_empty());
    }

    #[test]
    fn test_cells_are_ordered_x_major() {
        let grid = build_grid(&corners(), 3, &GridOptions::default()).unwrap();
        for (i, cell) in grid.cells().iter().enumerate() {
            assert_eq!(cell.index, i);
            assert_eq!(i, cell.col * grid.rows() + cell.row);
        }
        assert_eq!(grid.cell(1).unwrap().col, 0);
        assert_eq!(grid.cell(1).unwrap().row, 1);
        assert_eq!(grid.cell(3).unwrap().col, 1);

        let options = GridOptions {
            include_outer: false,
            ..GridOptions::default()
        };
        let truncated = build_grid(&corners(), 5, &options).unwrap();
        assert_eq!(truncated.rows(), 3);
        for cell in truncated.cells() {
            assert_eq!(cell.index, cell.col * truncated.rows() + cell.row);
        }
    }

    #[test]
    fn test_full_grid_tiles_extent() {
        let grid = build_grid(&corners(), 7, &GridOptions::default()).unwrap();
        let total: f64 = grid.cells().iter().map(|c| c.polygon().unsigned_area()).sum();
        assert!((total - 50.0).abs() < 1e-9);
        assert_eq!(grid.cells().last().unwrap().rect.max(), Coord { x: 10.0, y: 5.0 });
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            build_grid(&[], 10, &GridOptions::default()),
            Err(Error::EmptyInput)
        ));
        assert!(matches!(
            build_grid(&corners(), 1, &GridOptions::default()),
            Err(Error::InvalidResolution(1))
        ));
        let same = vec![PointRecord::new(3.0, 3.0).unwrap(); 5];
        assert!(matches!(
            build_grid(&same, 10, &GridOptions::default()),
            Err(Error::DegenerateExtent { width, height }) if width == 0.0 && height == 0.0
        ));
        let line = vec![
            PointRecord::new(0.0, 1.0).unwrap(),
            PointRecord::new(4.0, 1.0).unwrap(),
        ];
        assert!(matches!(
            build_grid(&line, 10, &GridOptions::default()),
            Err(Error::DegenerateExtent { .. })
        ));
    }

    #[test]
    fn test_locate_agrees_with_contains() {
        let grid = build_grid(&corners(), 10, &GridOptions::default()).unwrap();
        for &(x, y) in &[(0.0, 0.0), (1.0, 0.5), (9.999, 4.999), (10.0, 5.0), (3.3, 2.2), (5.0, 2.5)] {
            let index = grid.locate(x, y).unwrap();
            assert!(grid.cell(index).unwrap().contains(x, y), "({x}, {y})");
            let owners = grid.cells().iter().filter(|c| c.contains(x, y)).count();
            assert_eq!(owners, 1, "({x}, {y})");
        }
        assert_eq!(grid.locate(-0.1, 1.0), None);
        assert_eq!(grid.locate(10.1, 1.0), None);
    }

    #[test]
    fn test_truncated_grid_excludes_max_corner() {
        let options = GridOptions {
            include_outer: false,
            crs: Some("EPSG:2805".into()),
        };
        let grid = build_grid(&corners(), 10, &options).unwrap();
        assert_eq!(grid.locate(10.0, 5.0), None);
        assert_eq!(grid.locate(8.5, 1.0), None);
        assert_eq!(grid.locate(0.0, 0.0), Some(0));
        assert_eq!(grid.crs(), Some("EPSG:2805"));
    }
}

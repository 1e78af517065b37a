//! Property tests for the grid, the containment join and the percentile filter.

use permit_heatmap::aggregate::{percentile, JoinStrategy};
use permit_heatmap::subset::select_joined;
use permit_heatmap::{
    build_grid, select_subset, AggregatedCell, Error, FilterPolicy, GridOptions, Predicate,
    PointRecord, SpatialAggregator,
};
use proptest::prelude::*;

const OCCUPANCIES: [&str; 5] = ["1-2FAM", "3-9FAM", "Comm", "Mixed", "4unit"];
const DESCRIPTIONS: [&str; 5] = ["Electrical", "New construction", "Erect", "Addition", "Plumbing"];

fn arb_points() -> impl Strategy<Value = Vec<PointRecord>> {
    prop::collection::vec(
        (-100.0f64..100.0, -100.0f64..100.0, 0.0f64..1e6, 0usize..5, 0usize..5),
        2..150,
    )
    .prop_map(|rows| {
        rows.into_iter()
            .map(|(x, y, value, o, d)| {
                PointRecord::new(x, y)
                    .unwrap()
                    .with_number("declared_valuation", value)
                    .with_text("occupancytype", OCCUPANCIES[o])
                    .with_text("description", DESCRIPTIONS[d])
            })
            .collect()
    })
}

fn options(include_outer: bool) -> GridOptions {
    GridOptions {
        include_outer,
        crs: None,
    }
}

fn summary(cells: &[AggregatedCell]) -> Vec<(usize, usize, f64)> {
    cells.iter().map(|c| (c.cell.index, c.count, c.value)).collect()
}

proptest! {
    #[test]
    fn prop_cells_partition_inside_extent(
        points in arb_points(),
        n in 2usize..12,
        include_outer in any::<bool>(),
    ) {
        let grid = match build_grid(&points, n, &options(include_outer)) {
            Ok(grid) => grid,
            Err(Error::DegenerateExtent { .. }) => return Ok(()),
            Err(e) => return Err(TestCaseError::fail(e.to_string())),
        };
        let expected = if include_outer { n * n } else { (n - 2) * (n - 2) };
        prop_assert_eq!(grid.len(), expected);

        let extent = grid.extent();
        let eps = 1e-9 * (extent.width() + extent.height());
        for cell in grid.cells() {
            prop_assert!(cell.rect.min().x >= extent.min_x - eps);
            prop_assert!(cell.rect.min().y >= extent.min_y - eps);
            prop_assert!(cell.rect.max().x <= extent.max_x + eps);
            prop_assert!(cell.rect.max().y <= extent.max_y + eps);
        }
        for (i, a) in grid.cells().iter().enumerate() {
            for b in &grid.cells()[i + 1..] {
                let w = a.rect.max().x.min(b.rect.max().x) - a.rect.min().x.max(b.rect.min().x);
                let h = a.rect.max().y.min(b.rect.max().y) - a.rect.min().y.max(b.rect.min().y);
                prop_assert!(w <= eps || h <= eps, "cells {} and {} overlap", a.index, b.index);
            }
        }
    }

    #[test]
    fn prop_join_assigns_each_point_to_one_cell(
        points in arb_points(),
        n in 2usize..12,
        include_outer in any::<bool>(),
    ) {
        let Ok(grid) = build_grid(&points, n, &options(include_outer)) else {
            return Ok(());
        };
        let joined = SpatialAggregator::default().join(&points, &grid);
        let mut members = joined.iter().peekable();
        for (i, p) in points.iter().enumerate() {
            let owners: Vec<usize> = grid
                .cells()
                .iter()
                .filter(|c| c.contains(p.x(), p.y()))
                .map(|c| c.index)
                .collect();
            prop_assert!(owners.len() <= 1);
            let next = members.peek().map(|m| (m.point_index, m.cell_index));
            match next {
                Some((point_index, cell_index)) if point_index == i => {
                    prop_assert_eq!(owners, vec![cell_index]);
                    members.next();
                }
                _ => prop_assert!(owners.is_empty()),
            }
        }
        if include_outer {
            prop_assert_eq!(joined.len(), points.len());
        }
    }

    #[test]
    fn prop_join_strategies_agree(points in arb_points(), n in 2usize..20, include_outer in any::<bool>()) {
        let Ok(grid) = build_grid(&points, n, &options(include_outer)) else {
            return Ok(());
        };
        let bucket = SpatialAggregator::default().join(&points, &grid);
        let rtree = SpatialAggregator::default()
            .with_join_strategy(JoinStrategy::RTree)
            .join(&points, &grid);
        prop_assert_eq!(bucket, rtree);
    }

    #[test]
    fn prop_aggregate_is_idempotent(points in arb_points(), n in 2usize..20) {
        let Ok(grid) = build_grid(&points, n, &GridOptions::default()) else {
            return Ok(());
        };
        let aggregator = SpatialAggregator::default();
        let policy = FilterPolicy::new(5.0, 95.0).unwrap();
        let first = aggregator.aggregate(&points, &grid, "declared_valuation", &policy);
        let second = aggregator.aggregate(&points, &grid, "declared_valuation", &policy);
        match (first, second) {
            (Ok(a), Ok(b)) => prop_assert_eq!(summary(&a), summary(&b)),
            (Err(a), Err(b)) => prop_assert_eq!(a.to_string(), b.to_string()),
            _ => prop_assert!(false, "runs disagree"),
        }
    }

    #[test]
    fn prop_filter_keeps_subset_within_band(
        points in arb_points(),
        n in 2usize..20,
        low in 0.0f64..50.0,
        high in 50.0f64..=100.0,
    ) {
        let Ok(grid) = build_grid(&points, n, &GridOptions::default()) else {
            return Ok(());
        };
        let aggregator = SpatialAggregator::default();
        let all = aggregator
            .aggregate(&points, &grid, "declared_valuation", &FilterPolicy::disabled())
            .unwrap();
        let mut values: Vec<f64> = all.iter().map(|c| c.value).collect();
        values.sort_by(f64::total_cmp);
        let p_low = percentile(&values, low).unwrap();
        let p_high = percentile(&values, high).unwrap();

        let policy = FilterPolicy::new(low, high).unwrap();
        match aggregator.filter(all.clone(), &policy, "declared_valuation") {
            Ok(kept) => {
                let before = summary(&all);
                for cell in summary(&kept) {
                    prop_assert!(before.contains(&cell));
                    prop_assert!(cell.2 >= p_low && cell.2 <= p_high);
                }
            }
            Err(Error::EmptyResult { .. }) => {
                prop_assert!(values.iter().all(|&v| v < p_low || v > p_high));
            }
            Err(e) => return Err(TestCaseError::fail(e.to_string())),
        }
    }

    #[test]
    fn prop_filter_then_aggregate_commutes(points in arb_points(), n in 2usize..20) {
        let Ok(grid) = build_grid(&points, n, &GridOptions::default()) else {
            return Ok(());
        };
        let predicate = Predicate::new()
            .matches("occupancytype", "(.+FAM|.unit|Mixed)")
            .unwrap()
            .matches("description", "(Addition|Erect|New construction)")
            .unwrap();
        let aggregator = SpatialAggregator::default();

        let subset = select_subset(&points, &predicate);
        prop_assert!(subset.len() <= points.len());
        let joined = aggregator.join(&points, &grid);
        let members = select_joined(&points, &joined, &predicate).unwrap();
        let after_join = aggregator
            .reduce_joined(&points, &grid, &members, "declared_valuation")
            .unwrap();

        match aggregator.aggregate(&subset, &grid, "declared_valuation", &FilterPolicy::disabled()) {
            Ok(before_join) => prop_assert_eq!(summary(&before_join), summary(&after_join)),
            Err(Error::EmptyResult { .. }) => prop_assert!(after_join.is_empty()),
            Err(e) => return Err(TestCaseError::fail(e.to_string())),
        }
    }
}

//! One full run: load permits, build the shared grid, aggregate every view,
//! then export and render.

use crate::aggregate::SpatialAggregator;
use crate::config::{AppConfig, OverlayConfig, ViewConfig};
use crate::data::{self, LoadReport};
use crate::error::Error;
use crate::export;
use crate::grid::build_grid;
use crate::kde::{log_weight, WeightedKde, WeightedPoint};
use crate::render::{self, Canvas};
use crate::subset::{select_joined, select_subset, Predicate};
use crate::types::{AggregatedCell, Grid, JoinedPoint, OverlaySet, PointRecord};
use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Loaded permits and the grid built over all of them.
pub struct Prepared {
    pub points: Vec<PointRecord>,
    pub report: LoadReport,
    pub grid: Grid,
}

#[derive(Debug, Clone)]
pub struct ViewOutput {
    pub name: String,
    pub cells: usize,
    pub geojson: PathBuf,
    pub png: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub report: LoadReport,
    pub grid_cells: usize,
    pub joined: usize,
    pub views: Vec<ViewOutput>,
    pub overlays: Vec<(String, usize)>,
    pub density: Option<PathBuf>,
}

pub fn prepare(config: &AppConfig) -> Result<Prepared> {
    let (points, report) = data::load_permits(config)?;
    info!(rows = report.rows, loaded = report.loaded, "Loaded permits");
    if report.dropped() > 0 {
        warn!(
            unreadable_rows = report.unreadable_rows,
            malformed_coordinates = report.malformed_coordinates,
            missing_attribute = report.missing_attribute,
            "Dropped permits that cannot be read, placed or valued"
        );
    }

    let grid = build_grid(&points, config.grid.resolution, &config.grid.options())
        .context("Failed to build grid")?;
    info!(
        cells = grid.len(),
        resolution = grid.resolution(),
        include_outer = grid.includes_outer(),
        "Built grid"
    );

    Ok(Prepared {
        points,
        report,
        grid,
    })
}

pub fn aggregator(config: &AppConfig) -> SpatialAggregator {
    SpatialAggregator::new(config.aggregation.reducer)
        .with_join_strategy(config.grid.join)
        .with_log_offset(config.aggregation.log_offset)
}

/// Aggregates one view from an existing join. The view's predicate filters
/// the join membership, which gives the same cells as aggregating the
/// pre-filtered points over the same grid.
pub fn aggregate_view<'g>(
    config: &AppConfig,
    aggregator: &SpatialAggregator,
    prepared: &'g Prepared,
    joined: &[JoinedPoint],
    view: &ViewConfig,
) -> Result<Vec<AggregatedCell<'g>>> {
    let attribute = &config.aggregation.attribute;
    let predicate = Predicate::from_config(&view.clauses)
        .with_context(|| format!("View '{}' has an invalid predicate", view.name))?;
    let members = select_joined(&prepared.points, joined, &predicate)?;
    debug!(view = %view.name, members = members.len(), "Selected view members");

    let reduced = aggregator.reduce_joined(&prepared.points, &prepared.grid, &members, attribute)?;
    let before = reduced.len();
    let cells = aggregator
        .filter(reduced, &view.filter, attribute)
        .with_context(|| format!("View '{}' has no cells left to render", view.name))?;
    info!(
        view = %view.name,
        occupied = before,
        kept = cells.len(),
        low = view.filter.low,
        high = view.filter.high,
        "Aggregated view"
    );
    Ok(cells)
}

pub fn build_overlays(points: &[PointRecord], overlays: &[OverlayConfig]) -> Result<Vec<OverlaySet>> {
    overlays
        .iter()
        .map(|overlay| {
            let predicate = Predicate::from_config(&overlay.clauses)
                .with_context(|| format!("Overlay '{}' has an invalid predicate", overlay.name))?;
            let selected = select_subset(points, &predicate);
            Ok(OverlaySet {
                name: overlay.name.clone(),
                label: overlay.label.clone(),
                color: overlay.color.clone(),
                marker: overlay.marker,
                points: selected.iter().map(PointRecord::point).collect(),
            })
        })
        .collect()
}

pub fn density_points(config: &AppConfig, points: &[PointRecord]) -> Result<Vec<WeightedPoint>> {
    let attribute = &config.aggregation.attribute;
    let predicate = Predicate::from_config(&config.density.clauses)
        .context("Density section has an invalid predicate")?;
    Ok(points
        .iter()
        .filter(|p| predicate.test(p))
        .filter_map(|p| {
            let value = p.number(attribute).filter(|&v| v > config.density.min_value)?;
            Some(WeightedPoint {
                x: p.x(),
                y: p.y(),
                weight: log_weight(value),
            })
        })
        .collect())
}

pub fn run(config: &AppConfig) -> Result<RunSummary> {
    let prepared = prepare(config)?;
    let grid = &prepared.grid;
    let out_dir = &config.output.dir;
    let crs = grid.crs();

    let overlays = build_overlays(&prepared.points, &config.overlays)?;
    for overlay in &overlays {
        info!(overlay = %overlay.name, points = overlay.points.len(), "Selected overlay");
    }
    if !overlays.is_empty() {
        export::write_geojson(
            &out_dir.join("overlays.geojson"),
            &export::overlays_to_geojson(&overlays, crs),
        )?;
    }

    let aggregator = aggregator(config);
    let joined = aggregator.join(&prepared.points, grid);
    info!(
        joined = joined.len(),
        outside = prepared.points.len() - joined.len(),
        "Joined permits to grid cells"
    );

    let mut views = Vec::with_capacity(config.views.len());
    for view in &config.views {
        let cells = aggregate_view(config, &aggregator, &prepared, &joined, view)?;

        let geojson = out_dir.join(format!("{}.geojson", view.name));
        export::write_geojson(&geojson, &export::cells_to_geojson(&cells, crs))?;

        let png = out_dir.join(format!("{}.png", view.name));
        let img = render::render_cells(grid, &cells, &overlays, config.output.image_width)?;
        render::save_png(&png, &img)?;

        views.push(ViewOutput {
            name: view.name.clone(),
            cells: cells.len(),
            geojson,
            png,
        });
    }

    let density = if config.density.enabled {
        render_density(config, &prepared, &overlays)?
    } else {
        None
    };

    Ok(RunSummary {
        report: prepared.report,
        grid_cells: grid.len(),
        joined: joined.len(),
        views,
        overlays: overlays
            .iter()
            .map(|o| (o.name.clone(), o.points.len()))
            .collect(),
        density,
    })
}

fn render_density(
    config: &AppConfig,
    prepared: &Prepared,
    overlays: &[OverlaySet],
) -> Result<Option<PathBuf>> {
    let weighted = density_points(config, &prepared.points)?;
    let kde = match config.density.bandwidth {
        Some([bx, by]) => WeightedKde::with_fixed_bandwidth(weighted, bx, by),
        None => WeightedKde::new(weighted),
    };
    let kde = match kde {
        Ok(kde) => kde,
        // nothing to estimate, or no spread to derive a bandwidth from
        Err(e @ (Error::NoPositiveWeight | Error::InvalidBandwidth(..)))
            if config.density.bandwidth.is_none() || matches!(e, Error::NoPositiveWeight) =>
        {
            warn!(error = %e, "Skipping density map");
            return Ok(None);
        }
        Err(e) => return Err(e).context("Invalid density bandwidth"),
    };
    info!(
        points = kde.len(),
        total_weight = kde.total_weight(),
        bandwidth = ?kde.bandwidth(),
        "Estimating weighted density"
    );

    let canvas = Canvas::new(prepared.grid.extent(), config.density.width);
    let raster = kde.raster(prepared.grid.extent(), canvas.width, canvas.height);
    let img = render::render_density(&raster, config.density.levels, &config.density.color, overlays)?;
    let path = config.output.dir.join("density.png");
    render::save_png(&path, &img)?;
    Ok(Some(path))
}

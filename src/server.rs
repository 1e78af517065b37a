use crate::aggregate::IndexedRect;
use crate::config::AppConfig;
use crate::pipeline;
use crate::types::AggregatedCell;
use anyhow::{anyhow, Result};
use axum::{
    extract::{Query, State},
    response::Json,
    routing::get,
    Router,
};
use rstar::{RTree, AABB};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::info;

/// Owned copy of an aggregated cell for answering queries.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CellInfo {
    pub index: usize,
    pub col: usize,
    pub row: usize,
    pub count: usize,
    pub value: f64,
    pub log_value: f64,
    /// `[min_x, min_y, max_x, max_y]`
    pub bounds: [f64; 4],
    #[serde(skip)]
    closes: (bool, bool),
}

impl CellInfo {
    fn contains(&self, x: f64, y: f64) -> bool {
        let [min_x, min_y, max_x, max_y] = self.bounds;
        let in_x = x >= min_x && (x < max_x || (self.closes.0 && x == max_x));
        let in_y = y >= min_y && (y < max_y || (self.closes.1 && y == max_y));
        in_x && in_y
    }
}

impl From<&AggregatedCell<'_>> for CellInfo {
    fn from(agg: &AggregatedCell<'_>) -> Self {
        let (min, max) = (agg.cell.rect.min(), agg.cell.rect.max());
        Self {
            index: agg.cell.index,
            col: agg.cell.col,
            row: agg.cell.row,
            count: agg.count,
            value: agg.value,
            log_value: agg.log_value,
            bounds: [min.x, min.y, max.x, max.y],
            closes: (agg.cell.closes_x, agg.cell.closes_y),
        }
    }
}

pub struct AppState {
    pub view: String,
    pub cells: Vec<CellInfo>,
    pub tree: RTree<IndexedRect>,
}

impl AppState {
    pub fn new(view: String, cells: Vec<CellInfo>) -> Self {
        let tree = RTree::bulk_load(
            cells
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    let [min_x, min_y, max_x, max_y] = c.bounds;
                    IndexedRect::new(
                        i,
                        &geo::Rect::new(
                            geo::Coord { x: min_x, y: min_y },
                            geo::Coord { x: max_x, y: max_y },
                        ),
                    )
                })
                .collect(),
        );
        Self { view, cells, tree }
    }

    pub fn lookup(&self, x: f64, y: f64) -> Option<&CellInfo> {
        self.tree
            .locate_in_envelope_intersecting(&AABB::from_point([x, y]))
            .filter_map(|entry| self.cells.get(entry.index))
            .filter(|cell| cell.contains(x, y))
            .min_by_key(|cell| cell.index)
    }
}

#[derive(Deserialize)]
pub struct QueryParams {
    x: f64,
    y: f64,
}

#[derive(Serialize)]
pub struct QueryResponse {
    view: String,
    cell: CellInfo,
}

/// Aggregates the configured view and serves it, along with the output
/// directory, until the process is stopped.
pub async fn start_server(config: AppConfig) -> Result<()> {
    let view = match &config.server.view {
        Some(name) => config
            .views
            .iter()
            .find(|v| &v.name == name)
            .ok_or_else(|| anyhow!("View '{}' is not configured", name))?,
        None => config
            .views
            .first()
            .ok_or_else(|| anyhow!("No views configured"))?,
    };

    let prepared = pipeline::prepare(&config)?;
    let aggregator = pipeline::aggregator(&config);
    let joined = aggregator.join(&prepared.points, &prepared.grid);
    let cells = pipeline::aggregate_view(&config, &aggregator, &prepared, &joined, view)?;
    let cells: Vec<CellInfo> = cells.iter().map(CellInfo::from).collect();

    info!(view = %view.name, cells = cells.len(), "Building spatial index for API");
    let state = Arc::new(AppState::new(view.name.clone(), cells));

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    info!("Starting server on http://{}", addr);

    let app = Router::new()
        .route("/api/cell", get(query_handler))
        .fallback_service(ServeDir::new(&config.output.dir))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Option<QueryResponse>> {
    Json(state.lookup(params.x, params.y).map(|cell| QueryResponse {
        view: state.view.clone(),
        cell: cell.clone(),
    }))
}

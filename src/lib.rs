//! Grid aggregation of point-located permit valuations.
//!
//! [`grid::build_grid`] tessellates the extent of a point set,
//! [`aggregate::SpatialAggregator`] joins points onto the cells, reduces an
//! attribute per cell and trims outlying cells, and [`subset`] selects the
//! points a view or overlay is built from. The remaining modules load CSV
//! input, render and export results and serve them over HTTP.

pub mod aggregate;
pub mod config;
pub mod data;
pub mod error;
pub mod export;
pub mod grid;
pub mod kde;
pub mod pipeline;
pub mod render;
pub mod server;
pub mod stats;
pub mod subset;
pub mod types;

pub use aggregate::{FilterPolicy, Reducer, ReducerKind, SpatialAggregator};
pub use error::{Error, Result};
pub use grid::{build_grid, GridOptions};
pub use subset::{select_subset, Predicate};
pub use types::{AggregatedCell, AttributeRecord, Attributed, BoundingExtent, Cell, Grid, PointRecord};

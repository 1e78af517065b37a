//! Errors returned by the grid, aggregation, subset and density code.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// No points to derive an extent from
    #[error("cannot build a grid from an empty point set")]
    EmptyInput,

    #[error("grid resolution must be at least 2, got {0}")]
    InvalidResolution(usize),

    /// All points collapse onto a line or a single coordinate
    #[error("point extent is degenerate (width {width}, height {height})")]
    DegenerateExtent { width: f64, height: f64 },

    #[error("record {record} has no attribute '{attribute}'")]
    AttributeNotFound { attribute: String, record: usize },

    #[error("attribute '{attribute}' on record {record} is not numeric")]
    AttributeNotNumeric { attribute: String, record: usize },

    /// Filtering (or an empty join) left nothing to render
    #[error("no aggregated cells remain for attribute '{attribute}'")]
    EmptyResult { attribute: String },

    /// A join membership names a point outside the supplied slice
    #[error("membership refers to point {index}, but only {len} points were given")]
    UnknownPoint { index: usize, len: usize },

    #[error("membership refers to cell {index}, but the grid has {len} cells")]
    UnknownCell { index: usize, len: usize },

    #[error("record has non-finite coordinates ({x}, {y})")]
    MalformedRecord { x: f64, y: f64 },

    #[error("invalid percentile band [{low}, {high}]")]
    InvalidFilterPolicy { low: f64, high: f64 },

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("kernel bandwidth must be positive and finite, got ({0}, {1})")]
    InvalidBandwidth(f64, f64),

    #[error("no point carries a positive weight")]
    NoPositiveWeight,
}

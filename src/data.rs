use crate::config::{AppConfig, ColumnConfig};
use crate::types::{AttributeRecord, AttributeValue, PointRecord};
use anyhow::{anyhow, Context, Result};
use csv::{ReaderBuilder, StringRecord};
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use tracing::{info, warn};

pub const ISSUED_YEAR: &str = "issued_year";

/// Row accounting for one ingestion pass. Dropped rows are not errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub rows: usize,
    pub loaded: usize,
    /// Rows the CSV reader could not decode, e.g. invalid UTF-8
    pub unreadable_rows: usize,
    /// Missing, unparseable or non-finite longitude/latitude
    pub malformed_coordinates: usize,
    /// Valid coordinates but no usable value for the aggregation attribute
    pub missing_attribute: usize,
}

impl LoadReport {
    pub fn dropped(&self) -> usize {
        self.unreadable_rows + self.malformed_coordinates + self.missing_attribute
    }
}

pub fn load_permits(config: &AppConfig) -> Result<(Vec<PointRecord>, LoadReport)> {
    let path = &config.input.permits_csv;
    info!(?path, "Loading permits");
    let file = File::open(path).with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    read_permits(file, &config.input.columns, &config.aggregation.attribute)
        .with_context(|| format!("Failed to read permits from {:?}", path))
}

/// Loads every readable row of the permit file, located or not.
pub fn load_records(config: &AppConfig) -> Result<(Vec<AttributeRecord>, LoadReport)> {
    let path = &config.input.permits_csv;
    info!(?path, "Loading permit rows");
    let file = File::open(path).with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    read_records(file, &config.input.columns)
        .with_context(|| format!("Failed to read permit rows from {:?}", path))
}

/// Parses permit rows, keeping those with finite coordinates and a finite
/// value for `required`.
pub fn read_permits<R: Read>(
    reader: R,
    columns: &ColumnConfig,
    required: &str,
) -> Result<(Vec<PointRecord>, LoadReport)> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let layout = ColumnLayout::new(rdr.headers()?, columns)?;
    let lon_idx = layout.index_of(&columns.longitude)?;
    let lat_idx = layout.index_of(&columns.latitude)?;
    let required_idx = layout.index_of(required)?;

    let mut report = LoadReport::default();
    let mut points = Vec::new();

    for result in rdr.records() {
        let Some(record) = readable(result, &mut report)? else {
            continue;
        };

        let coordinate = |idx: usize| record.get(idx).and_then(parse_number);
        let point = match (coordinate(lon_idx), coordinate(lat_idx)) {
            (Some(x), Some(y)) => PointRecord::new(x, y).ok(),
            _ => None,
        };
        let Some(mut point) = point else {
            report.malformed_coordinates += 1;
            continue;
        };

        for (name, value) in layout.attributes(&record) {
            point = point.with_attribute(name, value);
        }
        // the required column may be absent from `numeric`
        if point.number(required).is_none() {
            if let Some(v) = record.get(required_idx).and_then(parse_number) {
                point = point.with_number(required, v);
            }
        }
        if !point.number(required).is_some_and(f64::is_finite) {
            report.missing_attribute += 1;
            continue;
        }

        points.push(point);
    }

    report.loaded = points.len();
    Ok((points, report))
}

/// Parses every readable row into its configured attributes. Coordinates and
/// missing values do not drop a row; only undecodable rows are skipped.
pub fn read_records<R: Read>(
    reader: R,
    columns: &ColumnConfig,
) -> Result<(Vec<AttributeRecord>, LoadReport)> {
    let mut rdr = ReaderBuilder::new().flexible(true).from_reader(reader);
    let layout = ColumnLayout::new(rdr.headers()?, columns)?;

    let mut report = LoadReport::default();
    let mut records = Vec::new();

    for result in rdr.records() {
        let Some(record) = readable(result, &mut report)? else {
            continue;
        };
        let row = layout
            .attributes(&record)
            .into_iter()
            .fold(AttributeRecord::default(), |row, (name, value)| {
                row.with_attribute(name, value)
            });
        records.push(row);
    }

    report.loaded = records.len();
    Ok((records, report))
}

/// Counts the row and passes it on; a row that fails to decode is counted as
/// unreadable and skipped. I/O failures still abort the read.
fn readable(
    result: csv::Result<StringRecord>,
    report: &mut LoadReport,
) -> Result<Option<StringRecord>> {
    report.rows += 1;
    match result {
        Ok(record) => Ok(Some(record)),
        Err(err) if !err.is_io_error() => {
            warn!(row = report.rows, error = %err, "Skipping unreadable row");
            report.unreadable_rows += 1;
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

/// Header positions of the configured attribute columns.
struct ColumnLayout<'c> {
    indices: HashMap<String, usize>,
    numeric: Vec<(&'c str, usize)>,
    text: Vec<(&'c str, usize)>,
    issued: Option<usize>,
}

impl<'c> ColumnLayout<'c> {
    fn new(headers: &StringRecord, columns: &'c ColumnConfig) -> Result<Self> {
        // Map column names to indices for faster lookup
        let indices: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_string(), i))
            .collect();
        let mut layout = Self {
            indices,
            numeric: Vec::new(),
            text: Vec::new(),
            issued: None,
        };
        for name in &columns.numeric {
            let idx = layout.index_of(name)?;
            layout.numeric.push((name.as_str(), idx));
        }
        for name in &columns.text {
            let idx = layout.index_of(name)?;
            layout.text.push((name.as_str(), idx));
        }
        let issued = columns.issued_date.as_deref().map(|name| layout.index_of(name)).transpose()?;
        layout.issued = issued;
        Ok(layout)
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.indices
            .get(name)
            .copied()
            .ok_or_else(|| anyhow!("Column '{}' not found in CSV", name))
    }

    /// Every configured attribute with a usable value in `record`. Blank
    /// text is absent; the issue date contributes its year.
    fn attributes(&self, record: &StringRecord) -> Vec<(&'c str, AttributeValue)> {
        let mut out = Vec::new();
        for &(name, idx) in &self.numeric {
            if let Some(v) = record.get(idx).and_then(parse_number) {
                out.push((name, AttributeValue::Number(v)));
            }
        }
        for &(name, idx) in &self.text {
            if let Some(s) = record.get(idx).map(str::trim).filter(|s| !s.is_empty()) {
                out.push((name, AttributeValue::Text(s.to_string())));
            }
        }
        if let Some(year) = self.issued.and_then(|idx| record.get(idx)).and_then(parse_year) {
            out.push((ISSUED_YEAR, AttributeValue::Number(year as f64)));
        }
        out
    }
}

fn parse_number(raw: &str) -> Option<f64> {
    let raw = raw.trim().trim_start_matches('$').replace(',', "");
    if raw.is_empty() {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Leading year of `YYYY-MM-DD...`.
fn parse_year(raw: &str) -> Option<i32> {
    raw.trim().split('-').next()?.trim().parse().ok()
}

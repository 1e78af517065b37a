//! GeoJSON output of aggregated cells and overlay point sets.

use crate::types::{AggregatedCell, OverlaySet};
use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue, Value};
use std::fs;
use std::path::Path;

pub fn cells_to_geojson(cells: &[AggregatedCell], crs: Option<&str>) -> GeoJson {
    let features = cells
        .iter()
        .map(|agg| {
            let mut properties = JsonObject::new();
            properties.insert("index".into(), agg.cell.index.into());
            properties.insert("col".into(), agg.cell.col.into());
            properties.insert("row".into(), agg.cell.row.into());
            properties.insert("count".into(), agg.count.into());
            properties.insert("value".into(), number(agg.value));
            properties.insert("log_value".into(), number(agg.log_value));
            Feature {
                bbox: None,
                geometry: Some(Geometry::new(Value::from(&agg.cell.polygon()))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();
    collection(features, crs)
}

pub fn overlays_to_geojson(overlays: &[OverlaySet], crs: Option<&str>) -> GeoJson {
    let features = overlays
        .iter()
        .flat_map(|overlay| {
            overlay.points.iter().map(move |point| {
                let mut properties = JsonObject::new();
                properties.insert("overlay".into(), overlay.name.clone().into());
                properties.insert("label".into(), overlay.label.clone().into());
                properties.insert("color".into(), overlay.color.clone().into());
                Feature {
                    bbox: None,
                    geometry: Some(Geometry::new(Value::from(point))),
                    id: None,
                    properties: Some(properties),
                    foreign_members: None,
                }
            })
        })
        .collect();
    collection(features, crs)
}

pub fn write_geojson(path: &Path, geojson: &GeoJson) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory: {:?}", parent))?;
    }
    fs::write(path, geojson.to_string())
        .with_context(|| format!("Failed to write GeoJSON: {:?}", path))
}

fn collection(features: Vec<Feature>, crs: Option<&str>) -> GeoJson {
    let foreign_members = crs.map(|crs| {
        let mut members = JsonObject::new();
        members.insert("crs".into(), crs.into());
        members
    });
    GeoJson::FeatureCollection(FeatureCollection {
        bbox: None,
        features,
        foreign_members,
    })
}

// JSON has no NaN or infinity
fn number(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

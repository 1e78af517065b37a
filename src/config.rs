use crate::aggregate::{FilterPolicy, JoinStrategy, ReducerKind, DEFAULT_LOG_OFFSET};
use crate::grid::{GridOptions, DEFAULT_RESOLUTION};
use crate::subset::ClauseConfig;
use crate::types::Marker;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub grid: GridConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default = "default_views")]
    pub views: Vec<ViewConfig>,
    #[serde(default = "default_overlays")]
    pub overlays: Vec<OverlayConfig>,
    #[serde(default)]
    pub density: DensityConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub permits_csv: PathBuf,
    #[serde(default)]
    pub columns: ColumnConfig,
}

/// Which CSV columns become coordinates and attributes.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ColumnConfig {
    pub longitude: String,
    pub latitude: String,
    pub numeric: Vec<String>,
    pub text: Vec<String>,
    /// Text columns the `stats` command ranks by
    pub occupancy: String,
    pub description: String,
    /// Date column whose leading `YYYY` becomes the `issued_year` attribute
    pub issued_date: Option<String>,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            longitude: "long".into(),
            latitude: "lat".into(),
            numeric: vec!["declared_valuation".into()],
            text: vec!["occupancytype".into(), "description".into()],
            occupancy: "occupancytype".into(),
            description: "description".into(),
            issued_date: Some("issued_date".into()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GridConfig {
    pub resolution: usize,
    pub include_outer: bool,
    pub crs: Option<String>,
    pub join: JoinStrategy,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            resolution: DEFAULT_RESOLUTION,
            include_outer: true,
            crs: Some("EPSG:2805".into()),
            join: JoinStrategy::Bucket,
        }
    }
}

impl GridConfig {
    pub fn options(&self) -> GridOptions {
        GridOptions {
            include_outer: self.include_outer,
            crs: self.crs.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AggregationConfig {
    pub attribute: String,
    pub reducer: ReducerKind,
    pub log_offset: f64,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            attribute: "declared_valuation".into(),
            reducer: ReducerKind::Mean,
            log_offset: DEFAULT_LOG_OFFSET,
        }
    }
}

/// One aggregation over the shared grid, optionally restricted by a predicate.
#[derive(Debug, Deserialize, Clone)]
pub struct ViewConfig {
    pub name: String,
    #[serde(default)]
    pub filter: FilterPolicy,
    #[serde(default, rename = "where")]
    pub clauses: Vec<ClauseConfig>,
}

/// A flagged point set drawn over every view.
#[derive(Debug, Deserialize, Clone)]
pub struct OverlayConfig {
    pub name: String,
    pub label: String,
    pub color: String, // Hex code
    pub marker: Marker,
    #[serde(default, rename = "where")]
    pub clauses: Vec<ClauseConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DensityConfig {
    pub enabled: bool,
    /// Points at or below this valuation are left out
    pub min_value: f64,
    #[serde(rename = "where")]
    pub clauses: Vec<ClauseConfig>,
    pub bandwidth: Option<[f64; 2]>,
    pub width: u32,
    pub levels: u32,
    pub color: String,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_value: 100.0,
            clauses: vec![new_construction_clause()],
            bandwidth: None,
            width: 512,
            levels: 25,
            color: "#d7301f".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
    #[serde(default = "default_image_width")]
    pub image_width: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// View whose cells answer point queries
    pub view: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            view: None,
        }
    }
}

fn default_image_width() -> u32 {
    1024
}

fn new_construction_clause() -> ClauseConfig {
    ClauseConfig {
        attribute: "description".into(),
        matches: Some("(Addition|Erect|New construction)".into()),
        ..Default::default()
    }
}

fn default_views() -> Vec<ViewConfig> {
    vec![
        ViewConfig {
            name: "all".into(),
            filter: FilterPolicy::default(),
            clauses: Vec::new(),
        },
        ViewConfig {
            name: "new_residential".into(),
            filter: FilterPolicy {
                high: 95.0,
                ..FilterPolicy::default()
            },
            clauses: vec![
                ClauseConfig {
                    attribute: "occupancytype".into(),
                    matches: Some("(.+FAM|.unit|Mixed)".into()),
                    ..Default::default()
                },
                new_construction_clause(),
            ],
        },
    ]
}

fn default_overlays() -> Vec<OverlayConfig> {
    let high_value = || ClauseConfig {
        attribute: "declared_valuation".into(),
        gt: Some(1e6),
        ..Default::default()
    };
    vec![
        OverlayConfig {
            name: "commercial".into(),
            label: "high value commercial sites".into(),
            color: "#ff0000".into(),
            marker: Marker::Triangle,
            clauses: vec![
                ClauseConfig {
                    attribute: "occupancytype".into(),
                    equals: Some("Comm".into()),
                    ..Default::default()
                },
                high_value(),
                ClauseConfig {
                    attribute: "description".into(),
                    matches: Some("New.+".into()),
                    ..Default::default()
                },
            ],
        },
        OverlayConfig {
            name: "public".into(),
            label: "high value public investment".into(),
            color: "#000000".into(),
            marker: Marker::Cross,
            clauses: vec![
                ClauseConfig {
                    attribute: "description".into(),
                    equals: Some("City of Boston".into()),
                    ..Default::default()
                },
                high_value(),
            ],
        },
    ]
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "Failed to parse TOML configuration")?;
        for view in &config.views {
            view.filter
                .validate()
                .with_context(|| format!("View '{}' has an invalid filter", view.name))?;
        }
        Ok(config)
    }
}

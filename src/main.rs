use clap::{Parser, Subcommand};
use permit_heatmap::{config, data, pipeline, server, stats};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate permits onto the grid and write maps for every view
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print exploratory statistics of the permit data
    Stats {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Rows shown per ranking
        #[arg(short, long, default_value_t = 5)]
        top: usize,
    },
    /// Serve the generated maps and a cell lookup API
    Serve {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Generate { config } => {
            info!(?config, "Generating maps");
            let app_config = config::AppConfig::load_from_file(config)?;

            let summary = pipeline::run(&app_config)?;
            for view in &summary.views {
                info!(view = %view.name, cells = view.cells, png = ?view.png, "Wrote view");
            }
            if let Some(path) = &summary.density {
                info!(?path, "Wrote density map");
            }
            info!(
                loaded = summary.report.loaded,
                dropped = summary.report.dropped(),
                joined = summary.joined,
                grid_cells = summary.grid_cells,
                "Generation complete"
            );
        }
        Commands::Stats { config, top } => {
            let app_config = config::AppConfig::load_from_file(config)?;
            let (rows, report) = data::load_records(&app_config)?;
            info!(rows = report.loaded, unreadable = report.unreadable_rows, "Loaded permit rows");

            let columns = &app_config.input.columns;
            let summary = stats::summarize(
                &rows,
                &app_config.aggregation.attribute,
                &columns.occupancy,
                &columns.description,
                *top,
            );
            println!("{summary}");
        }
        Commands::Serve { config } => {
            info!(?config, "Serving maps");
            let app_config = config::AppConfig::load_from_file(config)?;
            server::start_server(app_config).await?;
        }
    }

    Ok(())
}

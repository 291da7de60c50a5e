pub mod types;
pub mod config;
pub mod data;
pub mod processing;
pub mod render;
pub mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Choropleth world map of crime rates", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Shade the countries and render the map tiles
    Generate {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Serve the map viewer, tiles and country API
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
            println!("Generating map with config: {:?}", config);
            let app_config = config::AppConfig::load_or_default(config)?;

            // 1. Load Data
            let (rates, mut markers) = data::load_data(&app_config)?;

            // 2. Shade countries (only once)
            processing::shade_countries(&mut markers, &rates, &app_config.shading);

            // 3. Render Tiles
            render::generate_tiles(&app_config, &markers)?;
            render::write_shaded_geojson(&app_config.output.shaded_geojson, &markers, &rates)?;

            println!("Generation complete!");
        }
        Commands::Serve { config } => {
            println!("Serving map with config: {:?}", config);
            let app_config = config::AppConfig::load_or_default(config)?;

            let (rates, mut markers) = data::load_data(&app_config)?;
            processing::shade_countries(&mut markers, &rates, &app_config.shading);

            server::start_server(app_config, markers, rates).await?;
        }
    }

    Ok(())
}

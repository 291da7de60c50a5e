use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result, anyhow};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub input: InputConfig,
    pub shading: ShadingConfig,
    pub output: OutputConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InputConfig {
    pub geojson: PathBuf,
    pub data_csv: PathBuf,
    pub csv_has_headers: bool,
    /// Feature property holding the country id. The feature's own `id` member is used when unset.
    pub join_property: Option<String>,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            geojson: PathBuf::from("countries.geo.json"),
            data_csv: PathBuf::from("CrimeRate.csv"),
            csv_has_headers: false,
            join_property: None,
        }
    }
}

/// Linear ramp from crime rate to a red/blue color level.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ShadingConfig {
    pub domain: [f64; 2],
    pub levels: [f64; 2],
    pub green: u8,
    pub no_data: [u8; 3],
    pub alpha: u8, // tile fill opacity
}

impl Default for ShadingConfig {
    fn default() -> Self {
        ShadingConfig {
            domain: [0.0, 54.0],
            levels: [165.0, 10.0],
            green: 100,
            no_data: [150, 150, 150],
            alpha: 200,
        }
    }
}

/// Deepest zoom level whose world pixel size still fits in a `u32`.
pub const MAX_ZOOM: u8 = 23;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub tile_dir: PathBuf,
    pub shaded_geojson: PathBuf,
    pub min_zoom: u8,
    pub max_zoom: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            tile_dir: PathBuf::from("output/tiles"),
            shaded_geojson: PathBuf::from("output/countries.shaded.geojson"),
            min_zoom: 0,
            max_zoom: 4,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 3000,
            static_dir: PathBuf::from("web"),
        }
    }
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()
            .with_context(|| format!("Invalid configuration in {:?}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let output = &self.output;
        if output.max_zoom > MAX_ZOOM {
            return Err(anyhow!("max_zoom {} is above the supported maximum of {}", output.max_zoom, MAX_ZOOM));
        }
        if output.min_zoom > output.max_zoom {
            return Err(anyhow!("min_zoom {} is greater than max_zoom {}", output.min_zoom, output.max_zoom));
        }
        Ok(())
    }

    /// Like `load_from_file`, but falls back to the built-in defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::info!("Config file {:?} not found, using defaults", path);
            Ok(AppConfig::default())
        }
    }
}

use crate::config::AppConfig;
use crate::types::{CountryMarker, CrimeRateTable};
use anyhow::{Context, Result, anyhow};
use csv::ReaderBuilder;
use geo::MultiPolygon;
use geojson::GeoJson;
use geojson::feature::Id;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Value used by the source data for "no data available".
pub const MISSING_VALUE: &str = "..";

pub fn load_data(config: &AppConfig) -> Result<(CrimeRateTable, Vec<CountryMarker>)> {
    println!("Loading data...");

    // 1. Load crime rates
    let rates = load_crime_rates(&config.input.data_csv, config.input.csv_has_headers)?;

    // 2. Load country polygons
    let markers = load_country_markers(&config.input.geojson, config.input.join_property.as_deref())?;
    println!("Loaded {} country markers", markers.len());

    Ok((rates, markers))
}

pub fn load_crime_rates(path: &Path, has_headers: bool) -> Result<CrimeRateTable> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let table = parse_crime_rates(file, has_headers)
        .with_context(|| format!("Failed to load crime rates from {:?}", path))?;
    tracing::info!("Loaded {} data entries", table.len());
    Ok(table)
}

/// Reads `country,value` rows.
///
/// Fields are split on every comma (no quoting) and trailing empty fields are dropped.
/// Rows left without exactly two fields, rows whose id is not UTF-8 and rows whose
/// value is `..` are skipped. Any other value that does not parse as a number is an error.
pub fn parse_crime_rates<R: Read>(reader: R, has_headers: bool) -> Result<CrimeRateTable> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(has_headers)
        .flexible(true)
        .quoting(false)
        .from_reader(reader);

    let mut table = CrimeRateTable::default();

    for result in rdr.byte_records() {
        let record = result?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);

        let mut fields: Vec<&[u8]> = record.iter().collect();
        while fields.last().is_some_and(|f| f.is_empty()) {
            fields.pop();
        }

        let &[id, value] = &fields[..] else {
            tracing::debug!("Skipping line {}: expected 2 fields, found {}", line, fields.len());
            continue;
        };

        let Ok(id) = std::str::from_utf8(id) else {
            tracing::debug!("Skipping line {}: country id is not valid UTF-8", line);
            continue;
        };

        let value = String::from_utf8_lossy(value);
        let value = value.trim();
        if value == MISSING_VALUE {
            tracing::debug!("Skipping line {}: no data for {}", line, id);
            continue;
        }

        let rate: f64 = value.parse()
            .with_context(|| format!("Invalid crime rate {:?} for {:?} on line {}", value, id, line))?;
        table.insert(id.to_string(), rate);
    }

    Ok(table)
}

pub fn load_country_markers(path: &Path, join_property: Option<&str>) -> Result<Vec<CountryMarker>> {
    println!("Loading GeoJSON from {:?}...", path);
    let file = File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let reader = BufReader::new(file);

    // Parse the GeoJSON. warning: this loads the whole file into memory.
    let geojson = GeoJson::from_reader(reader).context("Failed to parse GeoJSON")?;
    parse_country_markers(geojson, join_property)
}

/// Turns every polygonal feature into an unshaded marker.
pub fn parse_country_markers(geojson: GeoJson, join_property: Option<&str>) -> Result<Vec<CountryMarker>> {
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut markers = Vec::new();

    for feature in collection.features {
        // 1. Get ID
        let id = match join_property {
            Some(name) => match feature.property(name) {
                Some(serde_json::Value::String(s)) => Some(s.clone()),
                Some(serde_json::Value::Number(n)) => Some(n.to_string()),
                _ => None,
            },
            None => match &feature.id {
                Some(Id::String(s)) => Some(s.clone()),
                Some(Id::Number(n)) => Some(n.to_string()),
                None => None,
            },
        };

        // 2. Get Geometry
        let geometry = match feature.geometry {
            Some(geom) => {
                let geo_geom: geo::Geometry<f64> = geom.value.try_into()
                    .map_err(|e| anyhow!("Failed to convert geometry of {:?}: {:?}", id, e))?;

                match geo_geom {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => {
                        tracing::debug!("Skipping non-polygon feature {:?}", id);
                        continue;
                    }
                }
            }
            None => {
                tracing::debug!("Skipping feature {:?} without geometry", id);
                continue;
            }
        };

        markers.push(CountryMarker { id, geometry, color: None });
    }

    Ok(markers)
}

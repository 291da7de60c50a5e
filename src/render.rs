use crate::config::AppConfig;
use crate::types::{CountryMarker, CrimeRateTable};
use anyhow::{Context, Result};
use geo::Polygon;
use geojson::feature::Id;
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

// Constants for Web Mercator
pub const TILE_SIZE: u32 = 256;
const MAX_LATITUDE: f64 = 85.05112878;

pub fn generate_tiles(config: &AppConfig, markers: &[CountryMarker]) -> Result<()> {
    config.validate()?;
    println!("Generating tiles from min_zoom {} to max_zoom {}...", config.output.min_zoom, config.output.max_zoom);

    let counts = (config.output.min_zoom..=config.output.max_zoom).into_par_iter()
        .map(|z| render_zoom_level(config, z, markers))
        .collect::<Result<Vec<usize>>>()?;

    let total: usize = counts.iter().sum();
    println!("Wrote {} tiles to {:?}", total, config.output.tile_dir);
    Ok(())
}

fn render_zoom_level(config: &AppConfig, zoom: u8, markers: &[CountryMarker]) -> Result<usize> {
    let tiles = rasterize(markers, zoom, config.shading.alpha);
    tracing::debug!("Rendered {} tiles at z{}", tiles.len(), zoom);

    // Save tiles: output/tiles/{z}/{x}/{y}.png
    let z_dir = config.output.tile_dir.join(zoom.to_string());
    fs::create_dir_all(&z_dir)
        .with_context(|| format!("Failed to create zoom directory {:?}", z_dir))?;

    for x in tiles.keys().map(|(x, _)| *x) {
        let x_dir = z_dir.join(x.to_string());
        fs::create_dir_all(&x_dir)
            .with_context(|| format!("Failed to create tile directory {:?}", x_dir))?;
    }

    tiles.par_iter().for_each(|((x, y), img)| {
        let path = z_dir.join(x.to_string()).join(format!("{}.png", y));
        if let Err(e) = img.save(&path) {
            tracing::warn!("Failed to save tile {:?}: {:?}", path, e);
        }
    });

    Ok(tiles.len())
}

/// Fills every shaded marker into the tiles of one zoom level. Tiles nothing touches are not allocated.
pub fn rasterize(markers: &[CountryMarker], zoom: u8, alpha: u8) -> HashMap<(u32, u32), RgbaImage> {
    let mut tiles: HashMap<(u32, u32), RgbaImage> = HashMap::new();

    for marker in markers {
        let Some(color) = marker.color else { continue };
        let fill = Rgba([color.r, color.g, color.b, alpha]);

        for polygon in &marker.geometry {
            fill_polygon(polygon, zoom, fill, &mut tiles);
        }
    }

    tiles
}

/// Even-odd scanline fill, sampled at pixel centers, so holes stay empty.
fn fill_polygon(
    polygon: &Polygon<f64>,
    zoom: u8,
    fill: Rgba<u8>,
    tiles: &mut HashMap<(u32, u32), RgbaImage>,
) {
    let world = world_size(zoom) as i64;

    let rings: Vec<Vec<(f64, f64)>> = std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| ring.coords().map(|c| lon_lat_to_pixel(c.x, c.y, zoom)).collect())
        .collect();

    let (min_y, max_y) = rings.iter().flatten()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), (_, y)| (lo.min(*y), hi.max(*y)));
    if !min_y.is_finite() {
        return;
    }

    let first_row = (min_y.floor() as i64).max(0);
    let last_row = (max_y.ceil() as i64).min(world - 1);
    let mut crossings = Vec::new();

    for row in first_row..=last_row {
        let yc = row as f64 + 0.5;
        crossings.clear();

        for ring in &rings {
            for edge in ring.windows(2) {
                let (a, b) = (edge[0], edge[1]);
                if (a.1 <= yc) != (b.1 <= yc) {
                    crossings.push(a.0 + (yc - a.1) * (b.0 - a.0) / (b.1 - a.1));
                }
            }
        }
        crossings.sort_by(|a, b| a.total_cmp(b));

        for span in crossings.chunks_exact(2) {
            let start = ((span[0] - 0.5).ceil() as i64).max(0);
            let end = ((span[1] - 0.5).ceil() as i64).min(world);
            for col in start..end {
                put_world_pixel(tiles, col as u32, row as u32, fill);
            }
        }
    }
}

fn put_world_pixel(tiles: &mut HashMap<(u32, u32), RgbaImage>, px: u32, py: u32, fill: Rgba<u8>) {
    let tile_img = tiles.entry((px / TILE_SIZE, py / TILE_SIZE))
        .or_insert_with(|| ImageBuffer::new(TILE_SIZE, TILE_SIZE));
    tile_img.put_pixel(px % TILE_SIZE, py % TILE_SIZE, fill);
}

fn world_size(zoom: u8) -> u32 {
    TILE_SIZE << zoom
}

// Coordinate conversions
pub fn lon_lat_to_pixel(lon: f64, lat: f64, zoom: u8) -> (f64, f64) {
    let world = world_size(zoom) as f64;
    let x = (lon + 180.0) / 360.0 * world;
    let lat_rad = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
    let y = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0 * world;
    (x, y)
}

/// The shaded markers as GeoJSON features carrying `id`, `crime_rate` and `fill`.
pub fn shaded_feature_collection(markers: &[CountryMarker], rates: &CrimeRateTable) -> FeatureCollection {
    let features = markers.iter().map(|marker| {
        let rate = marker.id.as_deref().and_then(|id| rates.get(id));

        let mut properties = JsonObject::new();
        properties.insert("id".to_string(), json!(marker.id));
        properties.insert("crime_rate".to_string(), json!(rate));
        properties.insert("fill".to_string(), json!(marker.color));

        Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&marker.geometry))),
            id: marker.id.clone().map(Id::String),
            properties: Some(properties),
            foreign_members: None,
        }
    }).collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

pub fn write_shaded_geojson(path: &Path, markers: &[CountryMarker], rates: &CrimeRateTable) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create output directory {:?}", parent))?;
    }
    let geojson = GeoJson::from(shaded_feature_collection(markers, rates));
    fs::write(path, geojson.to_string())
        .with_context(|| format!("Failed to write shaded GeoJSON: {:?}", path))?;
    println!("Wrote shaded countries to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Color;
    use approx::assert_abs_diff_eq;
    use geo::{polygon, MultiPolygon};
    use rstest::rstest;
    use testdir::testdir;

    const RED: Color = Color::new(245, 100, 10);

    fn marker(id: &str, polygon: Polygon<f64>, color: Option<Color>) -> CountryMarker {
        CountryMarker {
            id: Some(id.to_string()),
            geometry: MultiPolygon::new(vec![polygon]),
            color,
        }
    }

    fn square_with_hole() -> Polygon<f64> {
        polygon!(
            exterior: [
                (x: -90.0, y: -60.0),
                (x: 90.0, y: -60.0),
                (x: 90.0, y: 60.0),
                (x: -90.0, y: 60.0),
            ],
            interiors: [[
                (x: -10.0, y: -10.0),
                (x: 10.0, y: -10.0),
                (x: 10.0, y: 10.0),
                (x: -10.0, y: 10.0),
            ]],
        )
    }

    #[rstest]
    #[case(0.0, 0.0, 0, 128.0, 128.0)]
    #[case(-180.0, 0.0, 0, 0.0, 128.0)]
    #[case(180.0, 0.0, 1, 512.0, 256.0)]
    #[case(0.0, 90.0, 0, 128.0, 0.0)]
    #[case(0.0, -90.0, 0, 128.0, 256.0)]
    fn projects_to_world_pixels(
        #[case] lon: f64,
        #[case] lat: f64,
        #[case] zoom: u8,
        #[case] x: f64,
        #[case] y: f64,
    ) {
        let (px, py) = lon_lat_to_pixel(lon, lat, zoom);
        assert_abs_diff_eq!(px, x, epsilon = 1e-6);
        assert_abs_diff_eq!(py, y, epsilon = 1e-3);
    }

    #[test]
    fn fills_interior_and_leaves_hole_empty() {
        let markers = vec![marker("AAA", square_with_hole(), Some(RED))];
        let tiles = rasterize(&markers, 0, 200);
        assert_eq!(tiles.len(), 1);

        let tile = &tiles[&(0, 0)];
        let filled = Rgba([245, 100, 10, 200]);
        // lon -50, lat 0
        assert_eq!(*tile.get_pixel(92, 128), filled);
        // inside the hole
        assert_eq!(*tile.get_pixel(128, 128), Rgba([0, 0, 0, 0]));
        // outside the polygon
        assert_eq!(*tile.get_pixel(5, 5), Rgba([0, 0, 0, 0]));
        assert_eq!(*tile.get_pixel(250, 128), Rgba([0, 0, 0, 0]));
    }

    #[test]
    fn allocates_only_touched_tiles() {
        // north-eastern quadrant only
        let small = polygon![
            (x: 10.0, y: 10.0),
            (x: 20.0, y: 10.0),
            (x: 20.0, y: 20.0),
            (x: 10.0, y: 20.0),
        ];
        let tiles = rasterize(&[marker("AAA", small, Some(RED))], 1, 255);
        let keys: Vec<&(u32, u32)> = tiles.keys().collect();
        assert_eq!(keys, vec![&(1, 0)]);
    }

    #[test]
    fn unshaded_markers_are_not_drawn() {
        let tiles = rasterize(&[marker("AAA", square_with_hole(), None)], 0, 255);
        assert!(tiles.is_empty());
    }

    #[test]
    fn writes_tiles_per_zoom_level() {
        let dir = testdir!();
        let mut config = AppConfig::default();
        config.output.tile_dir = dir.join("tiles");
        config.output.min_zoom = 0;
        config.output.max_zoom = 1;

        generate_tiles(&config, &[marker("AAA", square_with_hole(), Some(RED))]).unwrap();

        assert!(dir.join("tiles/0/0/0.png").exists());
        assert!(dir.join("tiles/1/0/0.png").exists());
        assert!(dir.join("tiles/1/1/1.png").exists());
    }

    #[test]
    fn refuses_zoom_beyond_pixel_range() {
        let dir = testdir!();
        let mut config = AppConfig::default();
        config.output.tile_dir = dir.join("tiles");
        config.output.min_zoom = 24;
        config.output.max_zoom = 32;

        assert!(generate_tiles(&config, &[marker("AAA", square_with_hole(), Some(RED))]).is_err());
        assert!(!dir.join("tiles").exists());
    }

    #[test]
    fn shaded_collection_carries_rate_and_fill() {
        let rates: CrimeRateTable = vec![("AAA".to_string(), 54.0)].into_iter().collect();
        let markers = vec![
            marker("AAA", square_with_hole(), Some(RED)),
            marker("BBB", square_with_hole(), Some(Color::new(150, 150, 150))),
        ];

        let collection = shaded_feature_collection(&markers, &rates);
        assert_eq!(collection.features.len(), 2);

        let aaa = &collection.features[0];
        assert_eq!(aaa.property("crime_rate"), Some(&json!(54.0)));
        assert_eq!(aaa.property("fill"), Some(&json!("#f5640a")));

        let bbb = &collection.features[1];
        assert_eq!(bbb.property("crime_rate"), Some(&serde_json::Value::Null));
        assert_eq!(bbb.property("fill"), Some(&json!("#969696")));
        assert!(matches!(&bbb.id, Some(Id::String(s)) if s == "BBB"));
    }

    #[test]
    fn shaded_geojson_file_round_trips_through_loader() {
        let dir = testdir!();
        let path = dir.join("out/shaded.geojson");
        let rates = CrimeRateTable::default();
        write_shaded_geojson(&path, &[marker("AAA", square_with_hole(), Some(RED))], &rates).unwrap();

        let markers = crate::data::load_country_markers(&path, None).unwrap();
        assert_eq!(markers.len(), 1);
        assert_eq!(markers[0].id.as_deref(), Some("AAA"));
        assert_eq!(markers[0].geometry.0[0].interiors().len(), 1);
    }
}

use crate::config::AppConfig;
use crate::render::shaded_feature_collection;
use crate::types::{Color, CountryMarker, CrimeRateTable};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use geo::algorithm::contains::Contains;
use geo::bounding_rect::BoundingRect;
use geo::Point;
use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::cors::CorsLayer;

// Wrapper for RTree indexing
pub struct MarkerIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for MarkerIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub struct AppState {
    pub markers: Vec<CountryMarker>,
    pub rates: CrimeRateTable,
    pub tree: RTree<MarkerIndex>,
    /// Shaded countries, serialized once as a GeoJSON FeatureCollection.
    pub countries: Bytes,
}

impl AppState {
    pub fn new(markers: Vec<CountryMarker>, rates: CrimeRateTable) -> Result<Self> {
        // Markers without a bounding box (empty geometry) can never be hit
        let tree_items: Vec<MarkerIndex> = markers.iter().enumerate()
            .filter_map(|(i, marker)| {
                let rect = marker.geometry.bounding_rect()?;
                Some(MarkerIndex {
                    index: i,
                    aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
                })
            })
            .collect();

        let tree = RTree::bulk_load(tree_items);
        let countries = serde_json::to_vec(&shaded_feature_collection(&markers, &rates))
            .context("Failed to serialize shaded countries")?;

        Ok(AppState { markers, rates, tree, countries: Bytes::from(countries) })
    }

    /// The country containing the point, if any.
    pub fn find_country(&self, lon: f64, lat: f64) -> Option<CountryResponse> {
        let point = Point::new(lon, lat);
        let envelope = AABB::from_point([lon, lat]);

        self.tree.locate_in_envelope_intersecting(&envelope)
            .filter_map(|candidate| self.markers.get(candidate.index))
            .find(|marker| marker.geometry.contains(&point))
            .map(|marker| CountryResponse {
                id: marker.id.clone(),
                crime_rate: marker.id.as_deref().and_then(|id| self.rates.get(id)),
                fill: marker.color,
            })
    }

    pub fn summary(&self) -> SummaryResponse {
        let matched = self.markers.iter()
            .filter(|m| m.id.as_deref().and_then(|id| self.rates.get(id)).is_some())
            .count();
        SummaryResponse {
            entries: self.rates.len(),
            markers: self.markers.len(),
            matched,
        }
    }
}

#[derive(Deserialize)]
pub struct QueryParams {
    lat: f64,
    lon: f64,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct CountryResponse {
    id: Option<String>,
    crime_rate: Option<f64>,
    fill: Option<Color>,
}

#[derive(Serialize, Debug, PartialEq)]
pub struct SummaryResponse {
    entries: usize,
    markers: usize,
    matched: usize,
}

pub fn router(config: &AppConfig, state: Arc<AppState>) -> Router {
    let tile_service = ServeDir::new(&config.output.tile_dir);

    Router::new()
        .route("/api/query", get(query_handler))
        .route("/api/countries", get(countries_handler))
        .route("/api/summary", get(summary_handler))
        .nest_service("/tiles", tile_service)
        .fallback_service(ServeDir::new(&config.server.static_dir))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig, markers: Vec<CountryMarker>, rates: CrimeRateTable) -> Result<()> {
    println!("Building spatial index for API...");
    let state = Arc::new(AppState::new(markers, rates)?);
    println!("Spatial index built.");

    let addr = SocketAddr::from(([127, 0, 0, 1], config.server.port));
    println!("Starting server on http://{}", addr);

    let app = router(&config, state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn query_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<QueryParams>,
) -> Json<Option<CountryResponse>> {
    Json(state.find_country(params.lon, params.lat))
}

async fn countries_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "application/geo+json")], state.countries.clone())
}

async fn summary_handler(State(state): State<Arc<AppState>>) -> Json<SummaryResponse> {
    Json(state.summary())
}

use geo::MultiPolygon;
use serde::{Serialize, Serializer};
use std::collections::HashMap;

/// Crime rate per 100,000 inhabitants, keyed by country identifier.
///
/// Built once by the CSV loader and only read afterwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrimeRateTable(HashMap<String, f64>);

impl CrimeRateTable {
    pub fn get(&self, id: &str) -> Option<f64> {
        self.0.get(id).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    // Later rows for the same id overwrite earlier ones.
    pub(crate) fn insert(&mut self, id: String, rate: f64) {
        self.0.insert(id, rate);
    }
}

impl FromIterator<(String, f64)> for CrimeRateTable {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        CrimeRateTable(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Color { r, g, b }
    }

    /// Builds a color from unbounded channel values, saturating each into 0..=255.
    pub fn saturating(r: i64, g: i64, b: i64) -> Self {
        let clamp = |c: i64| c.clamp(0, 255) as u8;
        Color::new(clamp(r), clamp(g), clamp(b))
    }

    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

/// Anything the shader can color: it exposes an identifier and accepts a fill color.
pub trait Shadeable {
    fn id(&self) -> Option<&str>;
    fn set_color(&mut self, color: Color);
}

#[derive(Debug, Clone)]
pub struct CountryMarker {
    pub id: Option<String>,
    pub geometry: MultiPolygon<f64>,
    pub color: Option<Color>, // None until shaded
}

impl Shadeable for CountryMarker {
    fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_color(&mut self, color: Color) {
        self.color = Some(color);
    }
}

use crate::config::ShadingConfig;
use crate::types::{Color, CrimeRateTable, Shadeable};

/// Rescales `value` from the `from` range onto the `to` range.
///
/// Values outside `from` are extrapolated, not clamped.
pub fn linear_map(value: f64, from: [f64; 2], to: [f64; 2]) -> f64 {
    to[0] + (value - from[0]) * (to[1] - to[0]) / (from[1] - from[0])
}

/// Color level for a rate: high on the blue channel for low rates, falling towards red.
pub fn color_level(rate: f64, shading: &ShadingConfig) -> i64 {
    linear_map(rate, shading.domain, shading.levels).round() as i64
}

pub fn color_for_rate(rate: f64, shading: &ShadingConfig) -> Color {
    let level = color_level(rate, shading);
    Color::saturating(255 - level, shading.green as i64, level)
}

pub fn no_data_color(shading: &ShadingConfig) -> Color {
    let [r, g, b] = shading.no_data;
    Color::new(r, g, b)
}

/// Colors every marker from its crime rate, or gray when the table has no entry for it.
pub fn shade_countries<M: Shadeable>(markers: &mut [M], rates: &CrimeRateTable, shading: &ShadingConfig) {
    let mut matched = 0;

    for marker in markers.iter_mut() {
        let rate = marker.id().and_then(|id| rates.get(id));
        let color = match rate {
            Some(rate) => {
                matched += 1;
                color_for_rate(rate, shading)
            }
            None => no_data_color(shading),
        };
        marker.set_color(color);
    }

    tracing::info!("Shaded {} markers, {} with crime rate data", markers.len(), matched);
}

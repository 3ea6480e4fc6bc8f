//! User-facing text helpers.

use crate::Coordinate;

/// Human-readable distance: "0 m" below 1 m, whole meters below 1 km,
/// one decimal of kilometers above.
pub fn format_distance(meters: f64) -> String {
    if !meters.is_finite() || meters < 1.0 {
        return "0 m".to_string();
    }
    if meters < 1000.0 {
        return format!("{} m", meters.round() as u64);
    }
    format!("{:.1} km", meters / 1000.0)
}

/// Describe a live-sharing duration. `0` means unlimited.
pub fn format_sharing_duration(minutes: u32) -> String {
    if minutes == 0 {
        return "until manually stopped".to_string();
    }
    let hours = minutes / 60;
    let rest = minutes % 60;
    match (hours, rest) {
        (0, m) => format!("{}min", m),
        (h, 0) => format!("{}h", h),
        (h, m) => format!("{}h {}min", h, m),
    }
}

/// Public map link for a coordinate.
pub fn map_link(coord: &Coordinate) -> String {
    format!(
        "https://www.google.com/maps?q={},{}",
        coord.latitude, coord.longitude
    )
}

/// Message shared with trusted contacts when a live session starts.
pub fn share_message(
    user_name: &str,
    tracking_url: &str,
    last_known: Option<&Coordinate>,
    duration_minutes: u32,
) -> String {
    let map = last_known
        .map(map_link)
        .unwrap_or_else(|| "Location pending...".to_string());
    format!(
        "HerShield Live Location\n\n\
         {} is sharing live location\n\n\
         Track live location:\n{}\n\n\
         View on map:\n{}\n\n\
         Duration: {}",
        user_name,
        tracking_url,
        map,
        format_sharing_duration(duration_minutes)
    )
}

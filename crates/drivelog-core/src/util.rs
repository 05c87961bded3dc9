//! Utility functions for drivelog-core.

use std::time::Duration;

/// Format an elapsed time as `HH:MM:SS`.
///
/// Hours are not wrapped, so a 27-hour drive reads `27:00:00`.
///
/// ```
/// use drivelog_core::util::format_elapsed;
/// use std::time::Duration;
///
/// assert_eq!(format_elapsed(Duration::from_secs(3725)), "01:02:05");
/// ```
pub fn format_elapsed(elapsed: Duration) -> String {
    let total = elapsed.as_secs();
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Format a distance in meters for display (`850 m`, `12.3 km`).
pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{:.0} m", meters)
    } else {
        format!("{:.1} km", meters / 1000.0)
    }
}

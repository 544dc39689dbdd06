use jiff::{SignedDuration, civil};
use serde::Serialize;

use courier_core::geopoint::GeoPoint;
use courier_providers::package_api::Package;

/// Fixed handling time spent at every stop, on top of travel time.
pub const STOP_HANDLING_SECONDS: u32 = 300;

/// Full regulatory rest.
const FULL_BREAK_SECONDS: u32 = 2700;

/// Second half of the 15+30 split-break pattern.
const SPLIT_COMPLETION_SECONDS: u32 = 1800;

/// First half of the split-break pattern.
const SPLIT_FIRST_SECONDS: u32 = 900;

/// 4.5 hours, the continuous-driving limit.
const DRIVE_LIMIT_SECONDS: u32 = 16_200;

/// Margin before the limit within which the first break must land.
const EARLY_MARGIN_SECONDS: u32 = 1_800;

/// 6 hours.
const LONG_DRIVE_SECONDS: u32 = 21_600;

/// A mandatory rest slotted between two consecutive stops. `after_package`
/// is the stop the break follows, `before_package` the stop it precedes;
/// both always exist, a break is never scheduled past the final stop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Break {
    pub id: String,
    pub after_package: String,
    pub before_package: String,
    pub duration_seconds: u32,
    /// Derived for display, not authoritative.
    pub scheduled_time_of_day: civil::Time,
    /// Snapshot of the preceding stop's delivery location.
    pub location: GeoPoint,
}

/// Walks the ordered stop list accumulating travel and handling time, and
/// inserts rest breaks when the cumulative thresholds are crossed.
///
/// The three branches are evaluated first-match-wins in the order listed;
/// their preconditions overlap and the precedence mirrors long-standing
/// dispatcher behavior, so reordering them is a behavior change even where
/// it looks like a cleanup.
pub fn schedule_breaks(route_id: &str, packages: &[Package], start: civil::Time) -> Vec<Break> {
    let mut breaks = Vec::new();

    let mut elapsed: u32 = 0;
    let mut scheduled_break: u32 = 0;

    for (index, package) in packages.iter().enumerate() {
        elapsed += package.estimated_travel_time_seconds.unwrap_or(0) + STOP_HANDLING_SECONDS;

        let Some(next) = packages.get(index + 1) else {
            // Never a break after the final stop.
            break;
        };

        let duration = if elapsed >= LONG_DRIVE_SECONDS && scheduled_break < FULL_BREAK_SECONDS {
            Some(FULL_BREAK_SECONDS)
        } else if elapsed >= DRIVE_LIMIT_SECONDS - EARLY_MARGIN_SECONDS && scheduled_break == 0 {
            Some(FULL_BREAK_SECONDS)
        } else if scheduled_break == SPLIT_FIRST_SECONDS && elapsed < DRIVE_LIMIT_SECONDS {
            Some(SPLIT_COMPLETION_SECONDS)
        } else {
            None
        };

        if let Some(duration) = duration {
            let offset = SignedDuration::from_secs((elapsed + scheduled_break) as i64);

            breaks.push(Break {
                id: format!("break-{}-{}", route_id, breaks.len() + 1),
                after_package: package.id.clone(),
                before_package: next.id.clone(),
                duration_seconds: duration,
                scheduled_time_of_day: start.wrapping_add(offset),
                location: package.location,
            });

            scheduled_break += duration;
        }
    }

    breaks
}

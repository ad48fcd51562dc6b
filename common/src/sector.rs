use chrono::NaiveTime;

use crate::types::Sector;

fn end_of_evening() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN)
}

/// Picks the time-of-day sector. Intervals are half-open, so a boundary
/// instant belongs to the later sector.
pub fn sector_at(now: NaiveTime, sunrise: NaiveTime, sunset: NaiveTime) -> Sector {
    if sunrise <= now && now < sunset {
        Sector::Day
    } else if sunset <= now && now < end_of_evening() {
        Sector::Evening
    } else {
        Sector::Night
    }
}

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    away::{AwayAdjustment, AwayTracker},
    config::{EngineConfig, RoomConfig},
    types::{Presence, Sector, WeatherSnapshot},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TargetBreakdown {
    pub base: f32,
    pub sun_correction: f32,
    pub away: AwayAdjustment,
    pub target: f32,
}

/// Sector target, minus sun correction, then the away setback.
pub fn assemble_target(
    config: &EngineConfig,
    room: &RoomConfig,
    sector: Sector,
    weather: &WeatherSnapshot,
    away: &mut AwayTracker,
    presence: Presence,
    now: DateTime<Utc>,
) -> TargetBreakdown {
    let base = room.target_for(sector);

    let sun_correction = match room.sun_correction {
        Some(offset)
            if config.sun_correction.applies(
                sector,
                weather.weather_code,
                weather.current_temp,
            ) =>
        {
            offset
        }
        _ => 0.0,
    };

    let corrected = base - sun_correction;
    let adjustment = away.apply(config, presence, corrected, now);

    TargetBreakdown {
        base,
        sun_correction,
        away: adjustment,
        target: adjustment.apply_to(corrected),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GasHeatKind, GasHeatSource};
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn room(sun_correction: Option<f32>) -> RoomConfig {
        RoomConfig {
            id: "lounge".into(),
            day: 18.0,
            evening: 20.0,
            night: 16.0,
            sun_correction,
            gas: GasHeatSource {
                climate_entity: "climate.lounge".into(),
                power_w: 2_000.0,
                kind: GasHeatKind::SmartThermostat,
            },
            electric: None,
            temperature_sensor: None,
            presence_sensor: None,
        }
    }

    fn weather(code: u16, outdoor: f32) -> WeatherSnapshot {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        WeatherSnapshot {
            current_temp: outdoor,
            hour_temps: [outdoor, outdoor, outdoor],
            sunrise: now,
            sunset: now,
            weather_code: code,
            condition: "clear sky".into(),
            fetched_at: now,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn uses_sector_target_when_home() {
        let config = EngineConfig::default();
        let mut away = AwayTracker::new();

        let evening = assemble_target(
            &config,
            &room(None),
            Sector::Evening,
            &weather(500, 5.0),
            &mut away,
            Presence::Home,
            now(),
        );

        assert_eq!(
            evening,
            TargetBreakdown {
                base: 20.0,
                sun_correction: 0.0,
                away: AwayAdjustment::None,
                target: 20.0,
            }
        );
    }

    #[test]
    fn sun_correction_needs_clear_sky_warmth_and_sector() {
        let config = EngineConfig::default();
        let room = room(Some(1.5));
        let mut away = AwayTracker::new();

        let sunny = assemble_target(
            &config,
            &room,
            Sector::Day,
            &weather(800, 12.0),
            &mut away,
            Presence::Home,
            now(),
        );
        assert_eq!(sunny.target, 16.5);

        let cloudy = assemble_target(
            &config,
            &room,
            Sector::Day,
            &weather(804, 12.0),
            &mut away,
            Presence::Home,
            now(),
        );
        assert_eq!(cloudy.target, 18.0);

        let cold = assemble_target(
            &config,
            &room,
            Sector::Day,
            &weather(800, 4.0),
            &mut away,
            Presence::Home,
            now(),
        );
        assert_eq!(cold.target, 18.0);

        let night = assemble_target(
            &config,
            &room,
            Sector::Night,
            &weather(800, 12.0),
            &mut away,
            Presence::Home,
            now(),
        );
        assert_eq!(night.target, 16.0);
    }

    #[test]
    fn sun_correction_sectors_are_configurable() {
        let mut config = EngineConfig::default();
        config.sun_correction.sectors = vec![Sector::Day, Sector::Evening];
        let mut away = AwayTracker::new();

        let evening = assemble_target(
            &config,
            &room(Some(1.0)),
            Sector::Evening,
            &weather(801, 15.0),
            &mut away,
            Presence::Home,
            now(),
        );

        assert_eq!(evening.target, 19.0);
    }

    #[test]
    fn away_setback_applies_after_sun_correction() {
        let config = EngineConfig::default();
        let mut away = AwayTracker::new();

        let result = assemble_target(
            &config,
            &room(None),
            Sector::Day,
            &weather(500, 5.0),
            &mut away,
            Presence::Away,
            now(),
        );

        assert!(matches!(result.away, AwayAdjustment::Reduce(_)));
        assert!((result.target - 16.2).abs() < 1e-4);
    }
}

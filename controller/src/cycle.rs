use std::collections::HashMap;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::{info, warn};

use climate_common::{
    sector_at, AwayTracker, Command, CycleContext, Decision, EngineError, GridContext, RoomEngine,
    RuntimeConfig, Sector, TariffSnapshot, WeatherSnapshot,
};

use crate::{platform::ClimatePlatform, store::AwayState};

#[derive(Debug, Clone, Serialize)]
pub struct RoomOutcome {
    pub decision: Decision,
    pub failed_commands: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedRoom {
    pub room: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub at: DateTime<Utc>,
    pub local_time: String,
    pub sector: Sector,
    pub outdoor_temp: f32,
    pub hour_temps: [f32; 3],
    pub weather_code: u16,
    pub condition: String,
    pub electric_price: f32,
    pub gas_price: f32,
    pub importing: bool,
    pub rooms: Vec<RoomOutcome>,
    pub skipped: Vec<SkippedRoom>,
}

/// One control pass over every configured room.
///
/// Missing or stale snapshots defer the whole cycle. Per-room failures skip
/// only that room; command failures are logged and counted, never retried.
pub async fn run_cycle<P: ClimatePlatform + ?Sized>(
    platform: &P,
    config: &RuntimeConfig,
    tz: Tz,
    weather: Option<&WeatherSnapshot>,
    tariff: Option<&TariffSnapshot>,
    engines: &mut HashMap<String, RoomEngine>,
    now: DateTime<Utc>,
) -> Result<CycleReport, EngineError> {
    let weather = weather.ok_or(EngineError::StaleSnapshot("weather"))?;
    let tariff = tariff.ok_or(EngineError::StaleSnapshot("tariff"))?;

    let local = now.with_timezone(&tz);
    let sector = sector_at(
        local.time(),
        weather.sunrise.with_timezone(&tz).time(),
        weather.sunset.with_timezone(&tz).time(),
    );

    let grid = match &config.grid_power_sensor {
        Some(sensor) => platform.grid_context(sensor).await.unwrap_or_else(|err| {
            warn!("grid sensor {sensor} unreadable, assuming export: {err}");
            GridContext { importing: false }
        }),
        None => GridContext::default(),
    };

    let ctx = CycleContext {
        sector,
        weather,
        tariff,
        grid,
        now,
    };
    ctx.ensure_fresh(&config.engine)?;

    info!(
        "cycle at {} | sector {} | electricity {:.2}p | gas {:.2}p | importing {}",
        local.format("%H:%M:%S"),
        sector.as_str().to_uppercase(),
        tariff.electric_price,
        tariff.gas_price,
        grid.importing
    );
    info!(
        "outside {:.2} | {:.2} | {:.2} | weather {} ({}) | sunrise {} sunset {}",
        weather.hour_temps[0],
        weather.hour_temps[1],
        weather.hour_temps[2],
        weather.weather_code,
        weather.condition,
        weather.sunrise.with_timezone(&tz).format("%H:%M"),
        weather.sunset.with_timezone(&tz).format("%H:%M"),
    );

    let (rooms, invalid) = config.valid_rooms();
    let mut skipped: Vec<SkippedRoom> = invalid
        .into_iter()
        .map(|(room, err)| {
            warn!("skipping room: {err}");
            SkippedRoom {
                room,
                reason: err.to_string(),
            }
        })
        .collect();

    engines.retain(|id, _| rooms.iter().any(|room| &room.id == id));

    let mut outcomes = Vec::with_capacity(rooms.len());
    for room in &rooms {
        let state = match platform.room_state(room).await {
            Ok(state) => state,
            Err(err) => {
                warn!("{}: room state unavailable: {err}", room.id);
                skipped.push(SkippedRoom {
                    room: room.id.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
        };

        info!(
            "{} | temperature {:.2} | gas {} | electric {} | presence {}",
            room.display_name().to_uppercase(),
            state.current_temp,
            state.gas_mode.as_str().to_uppercase(),
            state
                .electric_mode
                .map(|mode| mode.as_str().to_uppercase())
                .unwrap_or_else(|| "N/A".to_string()),
            state.presence.as_str()
        );

        let engine = engines
            .entry(room.id.clone())
            .or_insert_with(|| RoomEngine::new(room.id.clone()));
        let decision = match engine.evaluate(&config.engine, room, &state, &ctx) {
            Ok(decision) => decision,
            Err(err) => {
                warn!("{}: not evaluated: {err}", room.id);
                skipped.push(SkippedRoom {
                    room: room.id.clone(),
                    reason: err.to_string(),
                });
                continue;
            }
        };

        info!(
            "{} | base {:.2} | sun {:.2} | away {:?} | target {:.2} | {} via {}",
            room.id,
            decision.base_target,
            decision.sun_correction,
            decision.away,
            decision.target,
            decision.reason.as_str(),
            decision.fuel.as_str()
        );

        if let Err(err) = platform.publish_target(room, decision.target).await {
            warn!("{}: target entity not updated: {err}", room.id);
        }

        let failed_commands = apply_commands(platform, &room.id, &decision.commands).await;
        outcomes.push(RoomOutcome {
            decision,
            failed_commands,
        });
    }

    info!(
        "cycle finished: {} rooms evaluated, {} skipped",
        outcomes.len(),
        skipped.len()
    );

    Ok(CycleReport {
        at: now,
        local_time: local.format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        sector,
        outdoor_temp: weather.current_temp,
        hour_temps: weather.hour_temps,
        weather_code: weather.weather_code,
        condition: weather.condition.clone(),
        electric_price: tariff.electric_price,
        gas_price: tariff.gas_price,
        importing: grid.importing,
        rooms: outcomes,
        skipped,
    })
}

async fn apply_commands<P: ClimatePlatform + ?Sized>(
    platform: &P,
    room_id: &str,
    commands: &[Command],
) -> usize {
    let mut failed = 0;
    for command in commands {
        let result = match command {
            Command::SetMode { entity, mode } => {
                info!("{room_id}: {entity} -> {}", mode.as_str().to_uppercase());
                platform.set_hvac_mode(entity, *mode).await
            }
            Command::SetTemperature { entity, target } => {
                info!("{room_id}: {entity} -> {target:.2}");
                platform.set_temperature(entity, *target).await
            }
        };
        if let Err(err) = result {
            warn!("{room_id}: command {command:?} failed: {err}");
            failed += 1;
        }
    }
    failed
}

pub fn restore_engines(away: &AwayState) -> HashMap<String, RoomEngine> {
    away.iter()
        .map(|(room, since)| {
            (
                room.clone(),
                RoomEngine::with_tracker(room.clone(), AwayTracker::restore(Some(*since))),
            )
        })
        .collect()
}

pub fn away_state(engines: &HashMap<String, RoomEngine>) -> AwayState {
    engines
        .iter()
        .filter_map(|(room, engine)| engine.away().away_since().map(|since| (room.clone(), since)))
        .collect()
}

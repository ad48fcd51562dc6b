use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    away::{AwayAdjustment, AwayTracker},
    config::{EngineConfig, GasHeatKind, RoomConfig},
    cost::{self, CostComparison},
    error::EngineError,
    target::{self, TargetBreakdown},
    types::{Fuel, GridContext, HvacMode, RoomState, Sector, TariffSnapshot, WeatherSnapshot},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    SetMode { entity: String, mode: HvacMode },
    SetTemperature { entity: String, target: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    OutdoorLookahead,
    TargetMet,
    HeatingGas,
    HeatingElectric,
}

impl DecisionReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutdoorLookahead => "outdoor lookahead",
            Self::TargetMet => "target met",
            Self::HeatingGas => "heating via gas",
            Self::HeatingElectric => "heating via electric",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub room: String,
    pub sector: Sector,
    pub current_temp: f32,
    pub base_target: f32,
    pub sun_correction: f32,
    pub away: AwayAdjustment,
    pub target: f32,
    pub fuel: Fuel,
    pub reason: DecisionReason,
    pub gas_cost: f32,
    pub electric_cost: Option<f32>,
    pub break_even_price: Option<f32>,
    pub commands: Vec<Command>,
}

/// Everything shared by all rooms during one cycle.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext<'a> {
    pub sector: Sector,
    pub weather: &'a WeatherSnapshot,
    pub tariff: &'a TariffSnapshot,
    pub grid: GridContext,
    pub now: DateTime<Utc>,
}

impl CycleContext<'_> {
    pub fn ensure_fresh(&self, config: &EngineConfig) -> Result<(), EngineError> {
        let weather_age = (self.now - self.weather.fetched_at).num_seconds();
        if weather_age < 0 || weather_age as u64 > config.max_weather_age_secs {
            return Err(EngineError::StaleSnapshot("weather"));
        }
        if !self.weather.hour_temps.iter().all(|temp| temp.is_finite()) {
            return Err(EngineError::StaleSnapshot("weather"));
        }

        let tariff_age = (self.now - self.tariff.fetched_at).num_seconds();
        if tariff_age < 0 || tariff_age as u64 > config.max_tariff_age_secs {
            return Err(EngineError::StaleSnapshot("tariff"));
        }
        if !(self.tariff.electric_price.is_finite() && self.tariff.gas_price.is_finite()) {
            return Err(EngineError::StaleSnapshot("tariff"));
        }
        Ok(())
    }
}

/// Per-room decision engine. Owns the room's away tracker across cycles;
/// everything else arrives as a snapshot on each call.
#[derive(Debug, Clone)]
pub struct RoomEngine {
    room_id: String,
    away: AwayTracker,
}

impl RoomEngine {
    pub fn new(room_id: impl Into<String>) -> Self {
        Self::with_tracker(room_id, AwayTracker::new())
    }

    pub fn with_tracker(room_id: impl Into<String>, away: AwayTracker) -> Self {
        Self {
            room_id: room_id.into(),
            away,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn away(&self) -> &AwayTracker {
        &self.away
    }

    pub fn evaluate(
        &mut self,
        config: &EngineConfig,
        room: &RoomConfig,
        state: &RoomState,
        ctx: &CycleContext<'_>,
    ) -> Result<Decision, EngineError> {
        ctx.ensure_fresh(config)?;
        self.check_state(config, room, state)?;

        let breakdown = target::assemble_target(
            config,
            room,
            ctx.sector,
            ctx.weather,
            &mut self.away,
            state.presence,
            ctx.now,
        );
        let comparison = cost::compare(
            room,
            ctx.tariff.electric_price,
            ctx.tariff.gas_price,
            ctx.grid,
        );

        let mut commands = Vec::new();
        let (fuel, reason) =
            Self::decide(room, state, ctx.weather, &breakdown, &comparison, &mut commands);

        Ok(Decision {
            room: room.id.clone(),
            sector: ctx.sector,
            current_temp: state.current_temp,
            base_target: breakdown.base,
            sun_correction: breakdown.sun_correction,
            away: breakdown.away,
            target: breakdown.target,
            fuel,
            reason,
            gas_cost: comparison.gas_cost,
            electric_cost: comparison.electric_cost,
            break_even_price: comparison.break_even_price,
            commands,
        })
    }

    fn check_state(
        &self,
        config: &EngineConfig,
        room: &RoomConfig,
        state: &RoomState,
    ) -> Result<(), EngineError> {
        let temp = state.current_temp;
        if !temp.is_finite() || !(config.min_valid_temp_c..=config.max_valid_temp_c).contains(&temp)
        {
            return Err(EngineError::MissingSensorData(format!(
                "{}: implausible room temperature {temp}",
                room.id
            )));
        }
        if room.has_electric_override() && state.electric_mode.is_none() {
            return Err(EngineError::MissingSensorData(format!(
                "{}: electric radiator mode unavailable",
                room.id
            )));
        }
        Ok(())
    }

    // Order matters: lookahead, then target met, then heating.
    fn decide(
        room: &RoomConfig,
        state: &RoomState,
        weather: &WeatherSnapshot,
        breakdown: &TargetBreakdown,
        comparison: &CostComparison,
        commands: &mut Vec<Command>,
    ) -> (Fuel, DecisionReason) {
        let target = breakdown.target;

        if weather.hour_temps[0] >= target || weather.hour_temps[1] >= target {
            Self::all_off(room, state, commands);
            return (Fuel::None, DecisionReason::OutdoorLookahead);
        }

        if state.current_temp >= target {
            Self::all_off(room, state, commands);
            return (Fuel::None, DecisionReason::TargetMet);
        }

        match (&room.electric, state.electric_mode) {
            (Some(electric), Some(electric_mode)) if comparison.use_electric => {
                Self::switch_off(&room.gas.climate_entity, state.gas_mode, commands);
                if electric_mode != HvacMode::Heat {
                    commands.push(Command::SetMode {
                        entity: electric.climate_entity.clone(),
                        mode: HvacMode::Heat,
                    });
                }
                commands.push(Command::SetTemperature {
                    entity: electric.climate_entity.clone(),
                    target,
                });
                (Fuel::Electric, DecisionReason::HeatingElectric)
            }
            (electric, electric_mode) => {
                if let (Some(electric), Some(mode)) = (electric, electric_mode) {
                    Self::switch_off(&electric.climate_entity, mode, commands);
                }
                if room.gas.kind == GasHeatKind::Valve && state.gas_mode.is_off() {
                    commands.push(Command::SetMode {
                        entity: room.gas.climate_entity.clone(),
                        mode: HvacMode::Heat,
                    });
                }
                commands.push(Command::SetTemperature {
                    entity: room.gas.climate_entity.clone(),
                    target,
                });
                (Fuel::Gas, DecisionReason::HeatingGas)
            }
        }
    }

    fn all_off(room: &RoomConfig, state: &RoomState, commands: &mut Vec<Command>) {
        Self::switch_off(&room.gas.climate_entity, state.gas_mode, commands);
        if let (Some(electric), Some(mode)) = (&room.electric, state.electric_mode) {
            Self::switch_off(&electric.climate_entity, mode, commands);
        }
    }

    fn switch_off(entity: &str, current: HvacMode, commands: &mut Vec<Command>) {
        if current.is_off() {
            return;
        }
        commands.push(Command::SetMode {
            entity: entity.to_string(),
            mode: HvacMode::Off,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ElectricRadiator, GasHeatSource},
        types::Presence,
    };
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 12, 11, 0, 0).unwrap()
    }

    fn room() -> RoomConfig {
        RoomConfig {
            id: "lounge".into(),
            day: 18.0,
            evening: 20.0,
            night: 16.0,
            sun_correction: Some(0.0),
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

    fn electric_room() -> RoomConfig {
        RoomConfig {
            electric: Some(ElectricRadiator {
                climate_entity: "climate.lounge_electric".into(),
                power_w: 1_000.0,
            }),
            ..room()
        }
    }

    fn weather(hour0: f32, hour1: f32) -> WeatherSnapshot {
        WeatherSnapshot {
            current_temp: hour0,
            hour_temps: [hour0, hour1, hour1],
            sunrise: now() - Duration::hours(3),
            sunset: now() + Duration::hours(5),
            weather_code: 803,
            condition: "broken clouds".into(),
            fetched_at: now() - Duration::minutes(5),
        }
    }

    fn tariff(electric: f32, gas: f32) -> TariffSnapshot {
        TariffSnapshot {
            electric_price: electric,
            gas_price: gas,
            fetched_at: now() - Duration::minutes(20),
        }
    }

    fn state(temp: f32, gas: HvacMode, electric: Option<HvacMode>) -> RoomState {
        RoomState {
            current_temp: temp,
            gas_mode: gas,
            electric_mode: electric,
            presence: Presence::Home,
        }
    }

    fn ctx<'a>(weather: &'a WeatherSnapshot, tariff: &'a TariffSnapshot) -> CycleContext<'a> {
        CycleContext {
            sector: Sector::Day,
            weather,
            tariff,
            grid: GridContext { importing: true },
            now: now(),
        }
    }

    #[test]
    fn heats_via_gas_when_cold_outside() {
        let config = EngineConfig::default();
        let weather = weather(14.0, 15.0);
        let tariff = tariff(25.0, 6.0);
        let mut engine = RoomEngine::new("lounge");

        let decision = engine
            .evaluate(
                &config,
                &room(),
                &state(16.0, HvacMode::Off, None),
                &ctx(&weather, &tariff),
            )
            .unwrap();

        assert_eq!(decision.fuel, Fuel::Gas);
        assert_eq!(decision.reason, DecisionReason::HeatingGas);
        assert_eq!(decision.target, 18.0);
        assert_eq!(
            decision.commands,
            vec![Command::SetTemperature {
                entity: "climate.lounge".into(),
                target: 18.0,
            }]
        );
    }

    #[test]
    fn outdoor_lookahead_turns_off_even_when_room_is_cold() {
        let config = EngineConfig::default();
        let weather = weather(19.0, 15.0);
        let tariff = tariff(25.0, 6.0);
        let mut engine = RoomEngine::new("lounge");

        let decision = engine
            .evaluate(
                &config,
                &room(),
                &state(16.0, HvacMode::Heat, None),
                &ctx(&weather, &tariff),
            )
            .unwrap();

        assert_eq!(decision.fuel, Fuel::None);
        assert_eq!(decision.reason, DecisionReason::OutdoorLookahead);
        assert_eq!(
            decision.commands,
            vec![Command::SetMode {
                entity: "climate.lounge".into(),
                mode: HvacMode::Off,
            }]
        );
    }

    #[test]
    fn hour_one_forecast_equal_to_target_counts() {
        let config = EngineConfig::default();
        let weather = weather(10.0, 18.0);
        let tariff = tariff(25.0, 6.0);
        let mut engine = RoomEngine::new("lounge");

        let decision = engine
            .evaluate(
                &config,
                &room(),
                &state(12.0, HvacMode::Off, None),
                &ctx(&weather, &tariff),
            )
            .unwrap();

        assert_eq!(decision.reason, DecisionReason::OutdoorLookahead);
        assert!(decision.commands.is_empty());
    }

    #[test]
    fn target_met_switches_off_active_actuators_only() {
        let config = EngineConfig::default();
        let weather = weather(5.0, 5.0);
        let tariff = tariff(25.0, 6.0);
        let mut engine = RoomEngine::new("lounge");

        let decision = engine
            .evaluate(
                &config,
                &electric_room(),
                &state(18.0, HvacMode::Off, Some(HvacMode::Heat)),
                &ctx(&weather, &tariff),
            )
            .unwrap();

        assert_eq!(decision.reason, DecisionReason::TargetMet);
        assert_eq!(
            decision.commands,
            vec![Command::SetMode {
                entity: "climate.lounge_electric".into(),
                mode: HvacMode::Off,
            }]
        );
    }

    #[test]
    fn cheaper_electric_turns_gas_off_and_heats_electric() {
        let config = EngineConfig::default();
        let weather = weather(5.0, 5.0);
        // gas 2kW * 6p = 12p/h, electric 1kW * 8p = 8p/h
        let tariff = tariff(8.0, 6.0);
        let mut engine = RoomEngine::new("lounge");

        let decision = engine
            .evaluate(
                &config,
                &electric_room(),
                &state(15.0, HvacMode::Heat, Some(HvacMode::Off)),
                &ctx(&weather, &tariff),
            )
            .unwrap();

        assert_eq!(decision.fuel, Fuel::Electric);
        assert_eq!(
            decision.commands,
            vec![
                Command::SetMode {
                    entity: "climate.lounge".into(),
                    mode: HvacMode::Off,
                },
                Command::SetMode {
                    entity: "climate.lounge_electric".into(),
                    mode: HvacMode::Heat,
                },
                Command::SetTemperature {
                    entity: "climate.lounge_electric".into(),
                    target: 18.0,
                },
            ]
        );
        assert_eq!(decision.break_even_price, Some(12.0));
    }

    #[test]
    fn electric_stays_off_while_exporting() {
        let config = EngineConfig::default();
        let weather = weather(5.0, 5.0);
        let tariff = tariff(1.0, 6.0);
        let mut engine = RoomEngine::new("lounge");
        let mut context = ctx(&weather, &tariff);
        context.grid = GridContext { importing: false };

        let decision = engine
            .evaluate(
                &config,
                &electric_room(),
                &state(15.0, HvacMode::Heat, Some(HvacMode::Heat)),
                &context,
            )
            .unwrap();

        assert_eq!(decision.fuel, Fuel::Gas);
        assert_eq!(
            decision.commands,
            vec![
                Command::SetMode {
                    entity: "climate.lounge_electric".into(),
                    mode: HvacMode::Off,
                },
                Command::SetTemperature {
                    entity: "climate.lounge".into(),
                    target: 18.0,
                },
            ]
        );
    }

    #[test]
    fn valve_gets_explicit_heat_mode() {
        let config = EngineConfig::default();
        let weather = weather(5.0, 5.0);
        let tariff = tariff(25.0, 6.0);
        let mut room = room();
        room.gas.kind = GasHeatKind::Valve;
        let mut engine = RoomEngine::new("lounge");

        let decision = engine
            .evaluate(
                &config,
                &room,
                &state(15.0, HvacMode::Off, None),
                &ctx(&weather, &tariff),
            )
            .unwrap();

        assert_eq!(
            decision.commands,
            vec![
                Command::SetMode {
                    entity: "climate.lounge".into(),
                    mode: HvacMode::Heat,
                },
                Command::SetTemperature {
                    entity: "climate.lounge".into(),
                    target: 18.0,
                },
            ]
        );
    }

    #[test]
    fn same_inputs_give_same_decision() {
        let config = EngineConfig::default();
        let weather = weather(5.0, 6.0);
        let tariff = tariff(25.0, 6.0);
        let mut engine = RoomEngine::new("lounge");
        let mut room_state = state(15.0, HvacMode::Heat, None);
        room_state.presence = Presence::Away;

        let first = engine
            .evaluate(&config, &room(), &room_state, &ctx(&weather, &tariff))
            .unwrap();
        let second = engine
            .evaluate(&config, &room(), &room_state, &ctx(&weather, &tariff))
            .unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn long_absence_drops_to_frost_floor() {
        let config = EngineConfig::default();
        let weather = weather(5.0, 5.0);
        let tariff = tariff(25.0, 6.0);
        let tracker = AwayTracker::restore(Some(now() - Duration::hours(30)));
        let mut engine = RoomEngine::with_tracker("lounge", tracker);
        let mut room_state = state(9.0, HvacMode::Heat, None);
        room_state.presence = Presence::Away;

        let decision = engine
            .evaluate(&config, &room(), &room_state, &ctx(&weather, &tariff))
            .unwrap();

        assert_eq!(decision.away, AwayAdjustment::Floor(10.0));
        assert_eq!(decision.target, 10.0);
    }

    #[test]
    fn missing_sensor_data_leaves_tracker_untouched() {
        let config = EngineConfig::default();
        let weather = weather(5.0, 5.0);
        let tariff = tariff(25.0, 6.0);
        let mut engine = RoomEngine::new("lounge");
        let mut room_state = state(f32::NAN, HvacMode::Heat, None);
        room_state.presence = Presence::Away;

        let result = engine.evaluate(&config, &room(), &room_state, &ctx(&weather, &tariff));

        assert!(matches!(result, Err(EngineError::MissingSensorData(_))));
        assert_eq!(engine.away().away_since(), None);

        let result = engine.evaluate(
            &config,
            &electric_room(),
            &state(15.0, HvacMode::Heat, None),
            &ctx(&weather, &tariff),
        );
        assert!(matches!(result, Err(EngineError::MissingSensorData(_))));
    }

    #[test]
    fn stale_snapshots_are_rejected() {
        let config = EngineConfig::default();
        let mut weather = weather(5.0, 5.0);
        weather.fetched_at = now() - Duration::hours(2);
        let tariff = tariff(25.0, 6.0);
        let mut engine = RoomEngine::new("lounge");

        let result = engine.evaluate(
            &config,
            &room(),
            &state(15.0, HvacMode::Heat, None),
            &ctx(&weather, &tariff),
        );

        assert_eq!(result, Err(EngineError::StaleSnapshot("weather")));
    }
}

use serde::{Deserialize, Serialize};

use crate::{error::EngineError, types::Sector};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fraction of the base target removed during the first band.
    pub away_short_reduction: f32,
    pub away_long_reduction: f32,
    pub away_short_hours: f32,
    pub away_long_hours: f32,
    pub frost_floor_c: f32,
    pub sun_correction: SunCorrectionPolicy,
    pub max_weather_age_secs: u64,
    pub max_tariff_age_secs: u64,
    pub min_valid_temp_c: f32,
    pub max_valid_temp_c: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            away_short_reduction: 0.1,
            away_long_reduction: 0.2,
            away_short_hours: 12.0,
            away_long_hours: 24.0,
            frost_floor_c: 10.0,
            sun_correction: SunCorrectionPolicy::default(),
            max_weather_age_secs: 3_600,
            max_tariff_age_secs: 7_200,
            min_valid_temp_c: -30.0,
            max_valid_temp_c: 50.0,
        }
    }
}

impl EngineConfig {
    pub fn sanitize(&mut self) {
        self.away_short_reduction = self.away_short_reduction.clamp(0.0, 0.5);
        self.away_long_reduction = self
            .away_long_reduction
            .clamp(self.away_short_reduction, 0.5);
        self.away_short_hours = self.away_short_hours.clamp(1.0, 72.0);
        self.away_long_hours = self.away_long_hours.max(self.away_short_hours);
        self.frost_floor_c = self.frost_floor_c.clamp(5.0, 16.0);
        self.max_weather_age_secs = self.max_weather_age_secs.max(60);
        self.max_tariff_age_secs = self.max_tariff_age_secs.max(60);
        self.sun_correction.sanitize();
    }
}

/// Conditions under which a room's sun-correction offset is subtracted.
/// All three must hold.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SunCorrectionPolicy {
    pub sectors: Vec<Sector>,
    /// Inclusive weather-code range treated as clear sky / few clouds.
    pub clear_sky_codes: (u16, u16),
    pub min_outdoor_temp_c: f32,
}

impl Default for SunCorrectionPolicy {
    fn default() -> Self {
        Self {
            sectors: vec![Sector::Day],
            clear_sky_codes: (800, 801),
            min_outdoor_temp_c: 10.0,
        }
    }
}

impl SunCorrectionPolicy {
    pub fn sanitize(&mut self) {
        let (low, high) = self.clear_sky_codes;
        if low > high {
            self.clear_sky_codes = (high, low);
        }
        self.sectors.sort_by_key(|sector| *sector as u8);
        self.sectors.dedup();
    }

    pub fn applies(&self, sector: Sector, weather_code: u16, outdoor_temp_c: f32) -> bool {
        let (low, high) = self.clear_sky_codes;
        self.sectors.contains(&sector)
            && (low..=high).contains(&weather_code)
            && outdoor_temp_c > self.min_outdoor_temp_c
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasHeatKind {
    /// Manages its own mode once given a setpoint.
    SmartThermostat,
    /// Plain on/off valve that needs an explicit mode command.
    Valve,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GasHeatSource {
    pub climate_entity: String,
    pub power_w: f32,
    #[serde(default = "default_gas_kind")]
    pub kind: GasHeatKind,
}

fn default_gas_kind() -> GasHeatKind {
    GasHeatKind::SmartThermostat
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectricRadiator {
    pub climate_entity: String,
    pub power_w: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomConfig {
    pub id: String,
    pub day: f32,
    pub evening: f32,
    pub night: f32,
    #[serde(default)]
    pub sun_correction: Option<f32>,
    pub gas: GasHeatSource,
    #[serde(default)]
    pub electric: Option<ElectricRadiator>,
    #[serde(default)]
    pub temperature_sensor: Option<String>,
    #[serde(default)]
    pub presence_sensor: Option<String>,
}

impl RoomConfig {
    pub fn target_for(&self, sector: Sector) -> f32 {
        match sector {
            Sector::Day => self.day,
            Sector::Evening => self.evening,
            Sector::Night => self.night,
        }
    }

    pub fn has_electric_override(&self) -> bool {
        self.electric.is_some()
    }

    pub fn temperature_entity(&self) -> String {
        self.temperature_sensor
            .clone()
            .unwrap_or_else(|| format!("sensor.{}_temperature", self.id))
    }

    pub fn presence_entity(&self) -> String {
        self.presence_sensor
            .clone()
            .unwrap_or_else(|| format!("sensor.{}_tado_mode", self.id))
    }

    pub fn target_entity(&self) -> String {
        format!("sensor.{}_target_temperature", self.id)
    }

    /// "living_room" -> "Living Room".
    pub fn display_name(&self) -> String {
        self.id
            .split('_')
            .filter(|word| !word.is_empty())
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.trim().is_empty() {
            return Err(EngineError::InvalidConfig("room id cannot be empty".into()));
        }
        for (name, value) in [
            ("day", self.day),
            ("evening", self.evening),
            ("night", self.night),
        ] {
            if !value.is_finite() || !(5.0..=30.0).contains(&value) {
                return Err(EngineError::InvalidConfig(format!(
                    "{}: {name} target {value} outside 5-30 C",
                    self.id
                )));
            }
        }
        if let Some(offset) = self.sun_correction {
            if !offset.is_finite() || offset < 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "{}: sun correction must be a non-negative number",
                    self.id
                )));
            }
        }
        if self.gas.climate_entity.trim().is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "{}: gas climate entity missing",
                self.id
            )));
        }
        if !(self.gas.power_w.is_finite() && self.gas.power_w > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "{}: gas power rating must be positive",
                self.id
            )));
        }
        if let Some(electric) = &self.electric {
            if electric.climate_entity.trim().is_empty() {
                return Err(EngineError::InvalidConfig(format!(
                    "{}: electric climate entity missing",
                    self.id
                )));
            }
            if !(electric.power_w.is_finite() && electric.power_w > 0.0) {
                return Err(EngineError::InvalidConfig(format!(
                    "{}: electric power rating must be positive",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeAssistantConfig {
    pub base_url: String,
    pub token: String,
}

impl Default for HomeAssistantConfig {
    fn default() -> Self {
        Self {
            base_url: "http://supervisor/core".to_string(),
            token: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub api_key: String,
    pub base_url: String,
    pub refresh_secs: u64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openweathermap.org".to_string(),
            refresh_secs: 900,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OctopusConfig {
    pub api_key: String,
    pub account: String,
    pub base_url: String,
    pub rates_refresh_secs: u64,
    pub account_refresh_secs: u64,
}

impl Default for OctopusConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            account: String::new(),
            base_url: "https://api.octopus.energy".to_string(),
            rates_refresh_secs: 3_540,
            account_refresh_secs: 86_340,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
}

impl MqttConfig {
    pub fn enabled(&self) -> bool {
        !self.host.trim().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub rooms: Vec<RoomConfig>,
    #[serde(default)]
    pub location: Location,
    #[serde(default)]
    pub home_assistant: HomeAssistantConfig,
    #[serde(default)]
    pub weather: WeatherConfig,
    #[serde(default)]
    pub octopus: OctopusConfig,
    /// Grid power in W, positive while importing.
    #[serde(default)]
    pub grid_power_sensor: Option<String>,
    pub timezone: String,
    pub cycle_interval_secs: u64,
    #[serde(default)]
    pub mqtt: MqttConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            rooms: Vec::new(),
            location: Location::default(),
            home_assistant: HomeAssistantConfig::default(),
            weather: WeatherConfig::default(),
            octopus: OctopusConfig::default(),
            grid_power_sensor: None,
            timezone: "Europe/London".to_string(),
            cycle_interval_secs: 600,
            mqtt: MqttConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.engine.sanitize();
        self.cycle_interval_secs = self.cycle_interval_secs.clamp(60, 3_600);
        self.weather.refresh_secs = self.weather.refresh_secs.max(60);
        if self.mqtt.port == 0 {
            self.mqtt.port = 1883;
        }
    }

    /// Rooms that pass validation, plus `(room id, error)` for the ones that don't.
    pub fn valid_rooms(&self) -> (Vec<RoomConfig>, Vec<(String, EngineError)>) {
        let mut valid = Vec::new();
        let mut errors = Vec::new();
        for room in &self.rooms {
            let result = room.validate().and_then(|()| {
                if valid.iter().any(|seen: &RoomConfig| seen.id == room.id) {
                    Err(EngineError::InvalidConfig(format!(
                        "{}: duplicate room id",
                        room.id
                    )))
                } else {
                    Ok(())
                }
            });
            match result {
                Ok(()) => valid.push(room.clone()),
                Err(err) => errors.push((room.id.clone(), err)),
            }
        }
        (valid, errors)
    }
}

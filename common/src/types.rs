use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HvacMode {
    Off,
    Heat,
    Auto,
}

impl HvacMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Heat => "heat",
            Self::Auto => "auto",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "heat" => Some(Self::Heat),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    pub fn is_off(self) -> bool {
        self == Self::Off
    }
}

/// Presence reported by the smart-home platform. Anything that is not
/// `AWAY` behaves like `HOME`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Presence {
    Home,
    Away,
    Unknown,
}

impl Presence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Home => "HOME",
            Self::Away => "AWAY",
            Self::Unknown => "N/A",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "HOME" => Self::Home,
            "AWAY" => Self::Away,
            _ => Self::Unknown,
        }
    }

    pub fn is_away(self) -> bool {
        self == Self::Away
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fuel {
    Gas,
    Electric,
    None,
}

impl Fuel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gas => "gas",
            Self::Electric => "electric",
            Self::None => "none",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sector {
    Day,
    Evening,
    Night,
}

impl Sector {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Day => "day",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }
}

/// Per-room mirror of the platform, refreshed every cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    pub current_temp: f32,
    pub gas_mode: HvacMode,
    pub electric_mode: Option<HvacMode>,
    pub presence: Presence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffSnapshot {
    /// Pence per kWh, VAT inclusive.
    pub electric_price: f32,
    pub gas_price: f32,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSnapshot {
    pub current_temp: f32,
    /// Forecast outdoor temperature for the current hour and the next two.
    pub hour_temps: [f32; 3],
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
    pub weather_code: u16,
    pub condition: String,
    pub fetched_at: DateTime<Utc>,
}

impl WeatherSnapshot {
    /// Highest forecast temperature over the lookahead window (hour 0 and 1).
    pub fn lookahead_max(&self) -> f32 {
        self.hour_temps[0].max(self.hour_temps[1])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridContext {
    pub importing: bool,
}

impl Default for GridContext {
    fn default() -> Self {
        Self { importing: true }
    }
}

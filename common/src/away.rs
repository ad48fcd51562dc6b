use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{config::EngineConfig, types::Presence};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AwayAdjustment {
    None,
    /// Degrees removed from the base target.
    Reduce(f32),
    /// Absolute frost-protection target replacing the base target.
    Floor(f32),
}

impl AwayAdjustment {
    pub fn apply_to(self, base_target: f32) -> f32 {
        match self {
            Self::None => base_target,
            Self::Reduce(delta) => base_target - delta,
            Self::Floor(floor) => floor,
        }
    }
}

/// Tracks how long a room has continuously been in away mode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AwayTracker {
    away_since: Option<DateTime<Utc>>,
}

impl AwayTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(away_since: Option<DateTime<Utc>>) -> Self {
        Self { away_since }
    }

    pub fn away_since(&self) -> Option<DateTime<Utc>> {
        self.away_since
    }

    pub fn away_hours(&self, now: DateTime<Utc>) -> Option<f64> {
        self.away_since
            .map(|since| (now - since).num_milliseconds() as f64 / 3_600_000.0)
    }

    pub fn apply(
        &mut self,
        config: &EngineConfig,
        presence: Presence,
        base_target: f32,
        now: DateTime<Utc>,
    ) -> AwayAdjustment {
        if !presence.is_away() {
            self.away_since = None;
            return AwayAdjustment::None;
        }

        let Some(hours) = self.away_hours(now) else {
            // First cycle away counts as the shortest band.
            self.away_since = Some(now);
            return AwayAdjustment::Reduce(base_target * config.away_short_reduction);
        };

        if hours < f64::from(config.away_short_hours) {
            AwayAdjustment::Reduce(base_target * config.away_short_reduction)
        } else if hours < f64::from(config.away_long_hours) {
            AwayAdjustment::Reduce(base_target * config.away_long_reduction)
        } else {
            AwayAdjustment::Floor(config.frost_floor_c)
        }
    }
}

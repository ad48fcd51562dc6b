pub mod away;
pub mod config;
pub mod cost;
pub mod engine;
pub mod error;
pub mod sector;
pub mod target;
pub mod topics;
pub mod types;

pub use away::{AwayAdjustment, AwayTracker};
pub use config::{
    ElectricRadiator, EngineConfig, GasHeatKind, GasHeatSource, RoomConfig, RuntimeConfig,
    SunCorrectionPolicy,
};
pub use cost::{running_cost, should_use_electric, CostComparison};
pub use engine::{Command, CycleContext, Decision, DecisionReason, RoomEngine};
pub use error::EngineError;
pub use sector::sector_at;
pub use target::{assemble_target, TargetBreakdown};
pub use topics::*;
pub use types::{
    Fuel, GridContext, HvacMode, Presence, RoomState, Sector, TariffSnapshot, WeatherSnapshot,
};

use serde::Serialize;

use crate::{config::RoomConfig, types::GridContext};

/// Hourly running cost in pence for a heater of `power_w` at `price_per_kwh`.
pub fn running_cost(power_w: f32, price_per_kwh: f32) -> f32 {
    power_w / 1000.0 * price_per_kwh
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CostComparison {
    pub gas_cost: f32,
    pub electric_cost: Option<f32>,
    /// Electricity price at which both fuels cost the same to run.
    pub break_even_price: Option<f32>,
    pub use_electric: bool,
}

pub fn compare(
    room: &RoomConfig,
    electric_price: f32,
    gas_price: f32,
    grid: GridContext,
) -> CostComparison {
    let gas_cost = running_cost(room.gas.power_w, gas_price);
    let electric_cost = room
        .electric
        .as_ref()
        .map(|electric| running_cost(electric.power_w, electric_price));
    let break_even_price = room
        .electric
        .as_ref()
        .map(|electric| gas_cost / (electric.power_w / 1000.0));

    CostComparison {
        gas_cost,
        electric_cost,
        break_even_price,
        use_electric: should_use_electric(room, electric_price, gas_price, grid),
    }
}

/// Electric override is only considered while the household is importing
/// from the grid. Ties go to gas.
pub fn should_use_electric(
    room: &RoomConfig,
    electric_price: f32,
    gas_price: f32,
    grid: GridContext,
) -> bool {
    let Some(electric) = &room.electric else {
        return false;
    };
    if !grid.importing {
        return false;
    }

    let electric_cost = running_cost(electric.power_w, electric_price);
    let gas_cost = running_cost(room.gas.power_w, gas_price);
    electric_cost < gas_cost
}

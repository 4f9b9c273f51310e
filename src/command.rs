//! Device commands sent to the relay station and the per-type rules that pick them.
//!
//! A command travels as the low nibble (`cmd4`) of a `[type_id, cmd4]` pair.

use strum_macros::EnumIter;

use crate::plant::{PlantSnapshot, PlantType, compute_power_per_plant};

/// Number of discrete gas output levels.
pub const GAS_LEVELS: u8 = 10;
/// Below this control position a gas plant is switched off.
pub const GAS_OFF_BELOW: f32 = 0.05;
/// Control position above which binary plants run.
pub const ON_THRESHOLD: f32 = 0.5;

/// Visual levels of a hydro-storage plant, from full (discharging hard) to empty (charging hard).
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter)]
#[repr(u8)]
pub enum HydroStorageLevel {
    /// Full, discharging.
    Full = 0x0B,
    LightDischarging = 0x0C,
    Idle = 0x0D,
    LightCharging = 0x0E,
    /// Empty, charging.
    Empty = 0x0F,
}

impl HydroStorageLevel {
    /// Bucket a power value normalised to `±1.0`.
    pub fn from_normalized(normalized: f32) -> Self {
        if normalized <= -0.6 {
            Self::Empty
        } else if normalized <= -0.2 {
            Self::LightCharging
        } else if normalized >= 0.6 {
            Self::Full
        } else if normalized >= 0.2 {
            Self::LightDischarging
        } else {
            Self::Idle
        }
    }
}

/// Everything the relay station understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    On,
    Off,
    BatteryIdle,
    /// Battery consumes power.
    Charge,
    /// Battery produces power.
    Discharge,
    /// Gas output level, `1..=10`.
    GasLevel(u8),
    HydroStorage(HydroStorageLevel),
}

impl DeviceCommand {
    /// Wire code, always within the low 4 bits.
    pub fn code(self) -> u8 {
        let code = match self {
            DeviceCommand::On => 0x01,
            DeviceCommand::Off => 0x02,
            DeviceCommand::BatteryIdle => 0x03,
            DeviceCommand::Charge => 0x04,
            DeviceCommand::Discharge => 0x05,
            DeviceCommand::GasLevel(level) => 0x05 + level.clamp(1, GAS_LEVELS),
            DeviceCommand::HydroStorage(level) => level as u8,
        };
        code & 0x0F
    }

    pub fn on_off(on: bool) -> Self {
        if on {
            DeviceCommand::On
        } else {
            DeviceCommand::Off
        }
    }
}

/// Coefficient thresholds for plants driven by the server rather than a local control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoefficientThresholds {
    pub wind: f32,
    pub hydro: f32,
    pub solar: f32,
}

impl Default for CoefficientThresholds {
    fn default() -> Self {
        Self {
            wind: 0.5,
            hydro: 0.5,
            solar: 0.5,
        }
    }
}

/// Binary rule shared by every regulated plant without a dedicated handler.
pub fn on_off_by_percentage(plant: &PlantSnapshot) -> DeviceCommand {
    DeviceCommand::on_off(plant.max_watts > 0.0 && plant.percentage > ON_THRESHOLD)
}

/// Gas: off below 5 %, otherwise one of ten levels, rounding up.
pub fn gas_command(plant: &PlantSnapshot) -> DeviceCommand {
    if plant.max_watts <= 0.0 || plant.percentage < GAS_OFF_BELOW {
        return DeviceCommand::Off;
    }
    let level = (plant.percentage * GAS_LEVELS as f32).ceil() as i32;
    DeviceCommand::GasLevel(level.clamp(1, GAS_LEVELS as i32) as u8)
}

pub fn battery_command(plant: &PlantSnapshot, game_active: bool) -> DeviceCommand {
    let power = compute_power_per_plant(plant, game_active);
    if power == 0.0 {
        DeviceCommand::BatteryIdle
    } else if power < 0.0 {
        DeviceCommand::Charge
    } else {
        DeviceCommand::Discharge
    }
}

pub fn hydro_storage_command(plant: &PlantSnapshot, game_active: bool) -> DeviceCommand {
    if plant.max_watts <= 0.0 {
        return DeviceCommand::Off;
    }
    let power = compute_power_per_plant(plant, game_active);
    let range = plant.max_watts - plant.min_watts;
    let normalized = if range > 0.0 {
        power / (0.5 * range)
    } else {
        0.0
    };
    DeviceCommand::HydroStorage(HydroStorageLevel::from_normalized(normalized))
}

/// Photovoltaic without a control follows the solar coefficient: at or below the threshold it runs,
/// above it the plant idles.
pub fn photovoltaic_command(plant: &PlantSnapshot, threshold: f32) -> DeviceCommand {
    if plant.has_local_control {
        return on_off_by_percentage(plant);
    }
    if plant.coefficient <= threshold {
        DeviceCommand::On
    } else {
        DeviceCommand::BatteryIdle
    }
}

/// Wind and run-of-river hydro follow the server coefficient unless a local control regulates them.
pub fn coefficient_command(plant: &PlantSnapshot, threshold: f32) -> DeviceCommand {
    if plant.has_local_control {
        return on_off_by_percentage(plant);
    }
    DeviceCommand::on_off(plant.coefficient > threshold)
}

/// Pick the command for a committed remote type.
///
/// `plant` is the local slot for the type, if the board has one. Types without a local slot are switched off.
pub fn command_for(
    plant: Option<&PlantSnapshot>,
    game_active: bool,
    thresholds: &CoefficientThresholds,
) -> DeviceCommand {
    let Some(plant) = plant else {
        return DeviceCommand::Off;
    };
    match plant.plant_type() {
        Some(PlantType::Photovoltaic) => photovoltaic_command(plant, thresholds.solar),
        Some(PlantType::Wind) => coefficient_command(plant, thresholds.wind),
        Some(PlantType::Hydro) => coefficient_command(plant, thresholds.hydro),
        Some(PlantType::Gas) => gas_command(plant),
        Some(PlantType::HydroStorage) => hydro_storage_command(plant, game_active),
        Some(PlantType::Battery) => battery_command(plant, game_active),
        Some(PlantType::Nuclear) | Some(PlantType::Coal) | None => on_off_by_percentage(plant),
    }
}

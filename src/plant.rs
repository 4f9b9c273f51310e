//! Plant-type control slots shared between the I/O task and the link/network task.
//!
//! Every scalar a slot carries is an independent atomic. Nothing here needs multi-field consistency:
//! each cycle reads a fresh [`PlantSnapshot`] and recomputes everything derived from it.

use core::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};

use strum_macros::{EnumCount, EnumIter, IntoStaticStr};
use tracing::debug;

use crate::protocol::{ProductionCoefficient, ProductionRange};

/// Most plant types a single board can register.
pub const MAX_PLANT_TYPES: usize = 8;

/// Type id reserved for relay status traffic.
pub const STATUS_TYPE_ID: u8 = 0xFF;

/// Whether a type id can appear in relay reports and commands.
pub const fn is_valid_type_id(type_id: u8) -> bool {
    type_id != 0 && type_id != STATUS_TYPE_ID
}

/// Source ids as used by the game server and the relay station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, EnumCount, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum PlantType {
    Photovoltaic = 1,
    Wind = 2,
    Nuclear = 3,
    Gas = 4,
    Hydro = 5,
    HydroStorage = 6,
    Coal = 7,
    Battery = 8,
}

impl From<PlantType> for u8 {
    fn from(value: PlantType) -> Self {
        value as u8
    }
}

impl TryFrom<u8> for PlantType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        use PlantType as PT;
        match value {
            1 => Ok(PT::Photovoltaic),
            2 => Ok(PT::Wind),
            3 => Ok(PT::Nuclear),
            4 => Ok(PT::Gas),
            5 => Ok(PT::Hydro),
            6 => Ok(PT::HydroStorage),
            7 => Ok(PT::Coal),
            8 => Ok(PT::Battery),
            other => Err(other),
        }
    }
}

/// `f32` stored as its bit pattern.
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// One controllable plant type on this board.
#[derive(Debug)]
pub struct PlantTypeControl {
    type_id: u8,
    has_local_control: bool,
    min_watts: AtomicF32,
    max_watts: AtomicF32,
    control_percentage: AtomicF32,
    coefficient: AtomicF32,
    /// Committed remote unit count, published by the link task.
    committed_count: AtomicU8,
    /// Total power for the type (per plant times count), published by the link task.
    total_power: AtomicF32,
}

impl PlantTypeControl {
    pub fn new(type_id: u8, min_watts: f32, max_watts: f32, has_local_control: bool) -> Self {
        // Types without a physical control run at full setting, the server coefficient drives them.
        let percentage = if has_local_control { 0.5 } else { 1.0 };
        Self {
            type_id,
            has_local_control,
            min_watts: AtomicF32::new(min_watts),
            max_watts: AtomicF32::new(max_watts),
            control_percentage: AtomicF32::new(percentage),
            coefficient: AtomicF32::new(0.0),
            committed_count: AtomicU8::new(0),
            total_power: AtomicF32::new(0.0),
        }
    }

    pub fn type_id(&self) -> u8 {
        self.type_id
    }

    pub fn plant_type(&self) -> Option<PlantType> {
        PlantType::try_from(self.type_id).ok()
    }

    pub fn has_local_control(&self) -> bool {
        self.has_local_control
    }

    /// Store a control position, clamped to `[0, 1]`. Ignored for slots without a local control.
    pub fn set_percentage(&self, percentage: f32) {
        if !self.has_local_control {
            return;
        }
        let percentage = if percentage.is_nan() {
            0.0
        } else {
            percentage.clamp(0.0, 1.0)
        };
        self.control_percentage.store(percentage);
    }

    pub fn percentage(&self) -> f32 {
        self.control_percentage.load()
    }

    pub fn set_range(&self, min_watts: f32, max_watts: f32) {
        self.min_watts.store(min_watts);
        self.max_watts.store(max_watts);
    }

    pub fn range(&self) -> (f32, f32) {
        (self.min_watts.load(), self.max_watts.load())
    }

    pub fn set_coefficient(&self, coefficient: f32) {
        self.coefficient.store(coefficient);
    }

    pub fn coefficient(&self) -> f32 {
        self.coefficient.load()
    }

    pub fn committed_count(&self) -> u8 {
        self.committed_count.load(Ordering::Relaxed)
    }

    pub fn total_power(&self) -> f32 {
        self.total_power.load()
    }

    pub(crate) fn publish(&self, committed_count: u8, total_power: f32) {
        self.committed_count.store(committed_count, Ordering::Relaxed);
        self.total_power.store(total_power);
    }

    /// Read every scalar once.
    pub fn snapshot(&self) -> PlantSnapshot {
        PlantSnapshot {
            type_id: self.type_id,
            has_local_control: self.has_local_control,
            min_watts: self.min_watts.load(),
            max_watts: self.max_watts.load(),
            percentage: self.control_percentage.load(),
            coefficient: self.coefficient.load(),
        }
    }
}

/// Point-in-time copy of a [`PlantTypeControl`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlantSnapshot {
    pub type_id: u8,
    pub has_local_control: bool,
    pub min_watts: f32,
    pub max_watts: f32,
    pub percentage: f32,
    pub coefficient: f32,
}

impl PlantSnapshot {
    pub fn plant_type(&self) -> Option<PlantType> {
        PlantType::try_from(self.type_id).ok()
    }
}

/// Power a single unit of this type produces (negative when it consumes).
///
/// Zero before the game is active or while the type is disabled (`max_watts <= 0`). A symmetric range
/// (min ≈ -max) snaps percentages within 0.25 % of the centre to exactly zero, and values within 0.2 % of
/// the range magnitudes snap to zero to absorb rounding noise.
pub fn compute_power_per_plant(plant: &PlantSnapshot, game_active: bool) -> f32 {
    if !game_active || plant.max_watts <= 0.0 {
        return 0.0;
    }
    let min = plant.min_watts;
    let max = plant.max_watts;
    let value = min + plant.percentage * (max - min);

    let symmetry_tolerance = 0.001 * (max.abs() + min.abs() + 1.0);
    if (max + min).abs() <= symmetry_tolerance && (plant.percentage - 0.5).abs() <= 0.0025 {
        return 0.0;
    }

    if value.abs() <= 0.002 * (max.abs() + min.abs()) {
        return 0.0;
    }

    value
}

#[derive(Debug, PartialEq, Eq)]
pub enum RegisterError {
    /// All slots are taken.
    TableFull,
    /// A slot for this type already exists.
    Duplicate(u8),
    /// Type id 0 and the status id cannot be registered.
    InvalidType(u8),
}

/// Fixed set of plant-type slots plus the board-wide flags the control loops share.
///
/// Slots are registered once at startup, after which the table is shared behind an `Arc`.
#[derive(Debug, Default)]
pub struct PlantTable {
    slots: heapless::Vec<PlantTypeControl, MAX_PLANT_TYPES>,
    game_active: AtomicBool,
    relay_connected: AtomicBool,
}

impl PlantTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a slot, returning its index.
    pub fn register(&mut self, control: PlantTypeControl) -> Result<usize, RegisterError> {
        let type_id = control.type_id();
        if !is_valid_type_id(type_id) {
            return Err(RegisterError::InvalidType(type_id));
        }
        if self.get(type_id).is_some() {
            return Err(RegisterError::Duplicate(type_id));
        }
        self.slots
            .push(control)
            .map_err(|_| RegisterError::TableFull)?;
        Ok(self.slots.len() - 1)
    }

    pub fn get(&self, type_id: u8) -> Option<&PlantTypeControl> {
        self.slots.iter().find(|slot| slot.type_id() == type_id)
    }

    pub fn slots(&self) -> &[PlantTypeControl] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn set_game_active(&self, active: bool) {
        self.game_active.store(active, Ordering::Relaxed);
    }

    pub fn game_active(&self) -> bool {
        self.game_active.load(Ordering::Relaxed)
    }

    pub(crate) fn set_relay_connected(&self, connected: bool) {
        self.relay_connected.store(connected, Ordering::Relaxed);
    }

    pub fn relay_connected(&self) -> bool {
        self.relay_connected.load(Ordering::Relaxed)
    }

    /// Install server ranges. Every slot is zeroed first so only types the server knows about stay enabled.
    pub fn apply_production_ranges(&self, ranges: &[ProductionRange]) {
        for slot in self.slots.iter() {
            slot.set_range(0.0, 0.0);
        }
        for range in ranges {
            let Ok(type_id) = u8::try_from(range.source_id) else {
                continue;
            };
            if let Some(slot) = self.get(type_id) {
                slot.set_range(range.min_power, range.max_power);
                debug!(
                    type_id,
                    min = range.min_power,
                    max = range.max_power,
                    "production range applied"
                );
            }
        }
    }

    /// Install server coefficients. Types the server did not mention keep their last value.
    pub fn apply_coefficients(&self, coefficients: &[ProductionCoefficient]) {
        for coefficient in coefficients {
            let Ok(type_id) = u8::try_from(coefficient.source_id) else {
                continue;
            };
            if let Some(slot) = self.get(type_id) {
                slot.set_coefficient(coefficient.coefficient);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::{EnumCount, IntoEnumIterator};

    fn snapshot(min: f32, max: f32, percentage: f32) -> PlantSnapshot {
        PlantSnapshot {
            type_id: PlantType::Battery as u8,
            has_local_control: true,
            min_watts: min,
            max_watts: max,
            percentage,
            coefficient: 1.0,
        }
    }

    #[test]
    fn plant_type_conversions() {
        for plant_type in PlantType::iter() {
            assert_eq!(PlantType::try_from(plant_type as u8), Ok(plant_type));
        }
        assert_eq!(PlantType::COUNT, MAX_PLANT_TYPES);
        assert_eq!(PlantType::try_from(0), Err(0));
        assert_eq!(PlantType::try_from(9), Err(9));
        let name: &'static str = PlantType::HydroStorage.into();
        assert_eq!(name, "hydro_storage");
    }

    #[test]
    fn symmetric_range_centre_is_exactly_zero() {
        assert_eq!(compute_power_per_plant(&snapshot(-100.0, 100.0, 0.5), true), 0.0);
        // Inside the deadband too.
        assert_eq!(compute_power_per_plant(&snapshot(-100.0, 100.0, 0.502), true), 0.0);
    }

    #[test]
    fn just_outside_deadband_is_proportional() {
        let power = compute_power_per_plant(&snapshot(-1000.0, 1000.0, 0.5030), true);
        assert!((power - 6.0).abs() < 0.01, "got {power}");
        let power = compute_power_per_plant(&snapshot(-1000.0, 1000.0, 0.4970), true);
        assert!((power + 6.0).abs() < 0.01, "got {power}");
    }

    #[test]
    fn noise_snap_for_tiny_values() {
        // 0.1 W out of a 0..500 W range is rounding noise.
        assert_eq!(compute_power_per_plant(&snapshot(0.0, 500.0, 0.0002), true), 0.0);
        assert_eq!(compute_power_per_plant(&snapshot(0.0, 500.0, 0.5), true), 250.0);
    }

    #[test]
    fn zero_when_inactive_or_disabled() {
        assert_eq!(compute_power_per_plant(&snapshot(0.0, 500.0, 1.0), false), 0.0);
        assert_eq!(compute_power_per_plant(&snapshot(0.0, 0.0, 1.0), true), 0.0);
        assert_eq!(compute_power_per_plant(&snapshot(-10.0, -5.0, 1.0), true), 0.0);
    }

    #[test]
    fn uncontrolled_slot_ignores_percentage_writes() {
        let slot = PlantTypeControl::new(PlantType::Wind as u8, 0.0, 100.0, false);
        slot.set_percentage(0.2);
        assert_eq!(slot.percentage(), 1.0);

        let slot = PlantTypeControl::new(PlantType::Coal as u8, 0.0, 100.0, true);
        slot.set_percentage(1.7);
        assert_eq!(slot.percentage(), 1.0);
        slot.set_percentage(f32::NAN);
        assert_eq!(slot.percentage(), 0.0);
    }

    #[test]
    fn register_rejects_duplicates_and_reserved_ids() {
        let mut table = PlantTable::new();
        assert_eq!(
            table.register(PlantTypeControl::new(7, 0.0, 500.0, true)),
            Ok(0)
        );
        assert_eq!(
            table.register(PlantTypeControl::new(7, 0.0, 500.0, true)),
            Err(RegisterError::Duplicate(7))
        );
        assert_eq!(
            table.register(PlantTypeControl::new(STATUS_TYPE_ID, 0.0, 1.0, true)),
            Err(RegisterError::InvalidType(STATUS_TYPE_ID))
        );
        for type_id in 10..17 {
            table
                .register(PlantTypeControl::new(type_id, 0.0, 1.0, true))
                .unwrap();
        }
        assert_eq!(
            table.register(PlantTypeControl::new(42, 0.0, 1.0, true)),
            Err(RegisterError::TableFull)
        );
    }

    #[test]
    fn ranges_reset_unlisted_types() {
        let mut table = PlantTable::new();
        table
            .register(PlantTypeControl::new(7, 0.0, 500.0, true))
            .unwrap();
        table
            .register(PlantTypeControl::new(4, 0.0, 300.0, true))
            .unwrap();

        table.apply_production_ranges(&[ProductionRange {
            source_id: 4,
            min_power: 10.0,
            max_power: 250.0,
        }]);

        assert_eq!(table.get(7).unwrap().range(), (0.0, 0.0));
        assert_eq!(table.get(4).unwrap().range(), (10.0, 250.0));
    }

    #[test]
    fn coefficients_update_matching_slots_only() {
        let mut table = PlantTable::new();
        table
            .register(PlantTypeControl::new(2, 0.0, 100.0, false))
            .unwrap();
        table.apply_coefficients(&[
            ProductionCoefficient {
                source_id: 2,
                coefficient: 0.8,
            },
            ProductionCoefficient {
                source_id: 300,
                coefficient: 0.1,
            },
        ]);
        assert_eq!(table.get(2).unwrap().coefficient(), 0.8);
    }
}

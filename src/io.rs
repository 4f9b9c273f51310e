//! The high-rate I/O task: operator controls in, indicators out.
//!
//! Rendering digits and bargraphs is someone else's job. This module only talks to the two narrow
//! collaborator traits below and to the shared [`PlantTable`].

use std::sync::Arc;

use crate::{Duration, Instant, plant::PlantTable};

/// Number of segments on a bargraph.
pub const BARGRAPH_LEVELS: u8 = 10;

/// Operator control inputs.
pub trait ControlPanel {
    /// Position of a control in `[0, 1]`.
    fn read_position(&mut self, channel: u8) -> f32;
}

/// Numeric displays and bargraphs.
pub trait IndicatorPanel {
    fn show_value(&mut self, display: u8, value: f32);
    fn clear(&mut self, display: u8);
    fn set_level(&mut self, bargraph: u8, level: u8);
}

/// Which inputs and outputs belong to a plant slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotBinding {
    pub type_id: u8,
    pub control_channel: Option<u8>,
    pub display: Option<u8>,
    pub bargraph: Option<u8>,
}

/// Fraction in `[0, 1]` to a bargraph level. Partial segments stay dark.
pub fn bargraph_level(fraction: f32) -> u8 {
    if fraction.is_nan() {
        return 0;
    }
    (fraction.clamp(0.0, 1.0) * BARGRAPH_LEVELS as f32) as u8
}

pub struct IoTask<C: ControlPanel, D: IndicatorPanel> {
    plants: Arc<PlantTable>,
    controls: C,
    indicators: D,
    bindings: Vec<SlotBinding>,
    /// Display showing the board's combined production.
    total_display: Option<u8>,
    blink_interval: Duration,
}

impl<C: ControlPanel, D: IndicatorPanel> IoTask<C, D> {
    pub fn new(
        plants: Arc<PlantTable>,
        controls: C,
        indicators: D,
        bindings: Vec<SlotBinding>,
        total_display: Option<u8>,
        blink_interval: Duration,
    ) -> Self {
        Self {
            plants,
            controls,
            indicators,
            bindings,
            total_display,
            blink_interval,
        }
    }

    pub fn indicators(&self) -> &D {
        &self.indicators
    }

    /// Copy control positions into the slot percentages. Slots without a control keep their fixed setting.
    pub fn poll_controls(&mut self) {
        for binding in &self.bindings {
            let (Some(channel), Some(slot)) =
                (binding.control_channel, self.plants.get(binding.type_id))
            else {
                continue;
            };
            slot.set_percentage(self.controls.read_position(channel));
        }
    }

    /// Redraw every indicator from the latest shared state.
    pub fn refresh_indicators(&mut self, now: Instant) {
        let mut total = 0.0;
        for binding in &self.bindings {
            let Some(slot) = self.plants.get(binding.type_id) else {
                continue;
            };
            total += slot.total_power();

            let coefficient = slot.coefficient();
            if coefficient == 0.0 {
                // Nothing produced by this type this round.
                if let Some(display) = binding.display {
                    self.indicators.clear(display);
                }
                if let Some(bargraph) = binding.bargraph {
                    self.indicators.set_level(bargraph, 0);
                }
                continue;
            }

            if let Some(display) = binding.display {
                self.indicators.show_value(display, slot.total_power());
            }
            if let Some(bargraph) = binding.bargraph {
                let fraction = if slot.has_local_control() {
                    slot.percentage()
                } else {
                    coefficient
                };
                self.indicators.set_level(bargraph, bargraph_level(fraction));
            }
        }

        let Some(display) = self.total_display else {
            return;
        };
        if self.plants.relay_connected() || self.blink_phase_on(now) {
            self.indicators.show_value(display, total);
        } else {
            self.indicators.clear(display);
        }
    }

    fn blink_phase_on(&self, now: Instant) -> bool {
        let period = self.blink_interval.ticks().max(1);
        (now.ticks() / period) % 2 == 0
    }
}

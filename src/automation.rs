//! Proximity automation for relay 4.
//!
//! The analog input is sampled on a fixed cadence regardless of mode (the
//! raw value feeds the status snapshot); the relay is only driven while the
//! relay-4 mode is `Auto`. The inclusive hysteresis window keeps the relay
//! from chattering faster than the sampling cadence: a transition happens
//! only when a new sample lands on the other side of the window boundary.

use crate::relays::Relay4Mode;

/// Inclusive on-window for the raw sensor value.
#[derive(Debug, Clone, Copy)]
pub struct HysteresisWindow {
    min: u16,
    max: u16,
}

impl HysteresisWindow {
    pub const fn new(min: u16, max: u16) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, raw: u16) -> bool {
        (self.min..=self.max).contains(&raw)
    }
}

pub struct ProximityAutomation {
    window: HysteresisWindow,
    last_raw: u16,
}

impl ProximityAutomation {
    pub fn new(window: HysteresisWindow) -> Self {
        Self { window, last_raw: 0 }
    }

    /// Record a fresh sample. Always called, even when the mode keeps the
    /// relay pinned, so the status snapshot stays live.
    pub fn record(&mut self, raw: u16) {
        self.last_raw = raw;
    }

    pub fn last_raw(&self) -> u16 {
        self.last_raw
    }

    /// Decide whether relay 4 must move, given the current mode and relay
    /// state. Returns the target boolean only when a change is required, so
    /// a sample inside an already-matching window never produces a write.
    pub fn evaluate(&self, mode: Relay4Mode, relay4_on: bool) -> Option<bool> {
        if mode != Relay4Mode::Auto {
            return None;
        }
        let target = self.window.contains(self.last_raw);
        (target != relay4_on).then_some(target)
    }
}

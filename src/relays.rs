//! Relay bank: the single owner of the four relay booleans.
//!
//! Every component that wants to change a relay goes through [`RelayBank`];
//! it applies the line-polarity translation and keeps the relay-4 mode
//! coupling consistent. The physical lines sit behind [`RelayLines`] so the
//! logic is testable without GPIO hardware.

/// Number of relay slots. Fixed by the hardware, not configurable.
pub const RELAY_COUNT: usize = 4;

/// Validated 1-based relay index, as used on every control surface.
///
/// Construction goes through [`RelayIndex::new`]; an out-of-range raw value
/// is a caller error reported at the edge (HTTP 400, ignored push token),
/// never a runtime failure inside the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayIndex(u8);

impl RelayIndex {
    /// The local-only slot driven by the proximity automation.
    pub const RELAY_4: RelayIndex = RelayIndex(4);

    pub fn new(raw: u8) -> Option<Self> {
        (1..=RELAY_COUNT as u8).contains(&raw).then_some(Self(raw))
    }

    /// Parse a decimal index as it appears in query strings and push tokens.
    pub fn parse(raw: &str) -> Option<Self> {
        raw.trim().parse::<u8>().ok().and_then(Self::new)
    }

    /// 1-based index as shown to users.
    pub fn get(self) -> u8 {
        self.0
    }

    /// 0-based slot for array access.
    pub fn slot(self) -> usize {
        (self.0 - 1) as usize
    }

    /// Relays 1-3 are mirrored to the cloud switch service.
    pub fn is_cloud_bound(self) -> bool {
        self.0 <= 3
    }
}

/// Operating mode of relay 4. `Off`/`On` pin the relay to that boolean;
/// `Auto` hands it to the proximity automation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Relay4Mode {
    #[default]
    Off,
    On,
    Auto,
}

impl Relay4Mode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "off" => Some(Self::Off),
            "on" => Some(Self::On),
            "auto" => Some(Self::Auto),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::On => "on",
            Self::Auto => "auto",
        }
    }
}

/// Physical output lines behind the bank. The espidf implementation drives
/// GPIO; tests record levels.
pub trait RelayLines {
    /// Drive the line for `slot` (0-based) to the given electrical level.
    fn write(&mut self, slot: usize, level_high: bool);
}

/// Logical relay state plus polarity mapping. Created once at boot with all
/// relays off; lives for the life of the process.
pub struct RelayBank {
    states: [bool; RELAY_COUNT],
    relay4_mode: Relay4Mode,
    active_low: bool,
}

impl RelayBank {
    pub fn new(active_low: bool) -> Self {
        Self {
            states: [false; RELAY_COUNT],
            relay4_mode: Relay4Mode::Off,
            active_low,
        }
    }

    pub fn snapshot(&self) -> [bool; RELAY_COUNT] {
        self.states
    }

    pub fn is_on(&self, index: RelayIndex) -> bool {
        self.states[index.slot()]
    }

    pub fn relay4_mode(&self) -> Relay4Mode {
        self.relay4_mode
    }

    /// Electrical level for a logical state under the configured polarity.
    pub fn line_level(&self, on: bool) -> bool {
        if self.active_low {
            !on
        } else {
            on
        }
    }

    /// Set one relay and drive its line. The line change is synchronous.
    /// Does not touch the relay-4 mode; cloud commands and the automation
    /// use this path.
    pub fn set(&mut self, lines: &mut dyn RelayLines, index: RelayIndex, on: bool) -> bool {
        self.states[index.slot()] = on;
        lines.write(index.slot(), self.line_level(on));
        on
    }

    /// Flip one relay. A manual toggle of relay 4 always overrides `Auto`:
    /// the resulting boolean pins the mode to `On`/`Off`.
    pub fn toggle(&mut self, lines: &mut dyn RelayLines, index: RelayIndex) -> bool {
        let on = !self.is_on(index);
        self.set(lines, index, on);
        if index == RelayIndex::RELAY_4 {
            self.relay4_mode = if on { Relay4Mode::On } else { Relay4Mode::Off };
        }
        on
    }

    /// Change the relay-4 mode. `Off`/`On` force the relay immediately;
    /// `Auto` leaves the current boolean untouched until the automation acts.
    pub fn set_relay4_mode(&mut self, lines: &mut dyn RelayLines, mode: Relay4Mode) {
        self.relay4_mode = mode;
        match mode {
            Relay4Mode::Off => {
                self.set(lines, RelayIndex::RELAY_4, false);
            }
            Relay4Mode::On => {
                self.set(lines, RelayIndex::RELAY_4, true);
            }
            Relay4Mode::Auto => {}
        }
    }

    /// Drive every line to match the current logical state. Used once at
    /// boot to force the all-off state onto the hardware.
    pub fn apply_line_levels(&self, lines: &mut dyn RelayLines) {
        for (slot, &on) in self.states.iter().enumerate() {
            lines.write(slot, self.line_level(on));
        }
    }
}

// =============================================================================
// GPIO line driver (espidf)
// =============================================================================

#[cfg(target_os = "espidf")]
pub use self::gpio::RelayGpio;

#[cfg(target_os = "espidf")]
mod gpio {
    use super::{RelayLines, RELAY_COUNT};
    use anyhow::Result;
    use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};

    /// Output drivers for the four relay lines.
    pub struct RelayGpio {
        pins: [PinDriver<'static, AnyOutputPin, Output>; RELAY_COUNT],
    }

    impl RelayGpio {
        pub fn new(pins: [AnyOutputPin; RELAY_COUNT]) -> Result<Self> {
            let [p1, p2, p3, p4] = pins;
            Ok(Self {
                pins: [
                    PinDriver::output(p1)?,
                    PinDriver::output(p2)?,
                    PinDriver::output(p3)?,
                    PinDriver::output(p4)?,
                ],
            })
        }
    }

    impl RelayLines for RelayGpio {
        fn write(&mut self, slot: usize, level_high: bool) {
            let pin = &mut self.pins[slot];
            let result = if level_high { pin.set_high() } else { pin.set_low() };
            if let Err(err) = result {
                log::error!("relay: failed to drive line {slot}: {err}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records the last electrical level written per line.
    #[derive(Default)]
    struct RecordedLines {
        levels: [Option<bool>; RELAY_COUNT],
        writes: usize,
    }

    impl RelayLines for RecordedLines {
        fn write(&mut self, slot: usize, level_high: bool) {
            self.levels[slot] = Some(level_high);
            self.writes += 1;
        }
    }

    #[test]
    fn index_validation() {
        assert!(RelayIndex::new(0).is_none());
        assert!(RelayIndex::new(5).is_none());
        assert_eq!(RelayIndex::new(1).map(RelayIndex::slot), Some(0));
        assert_eq!(RelayIndex::parse(" 3"), RelayIndex::new(3));
        assert!(RelayIndex::parse("four").is_none());
        assert!(RelayIndex::new(3).is_some_and(RelayIndex::is_cloud_bound));
        assert!(!RelayIndex::RELAY_4.is_cloud_bound());
    }

    #[test]
    fn double_toggle_restores_state_and_line_level() {
        let mut lines = RecordedLines::default();
        let mut bank = RelayBank::new(true);
        bank.apply_line_levels(&mut lines);

        for raw in 1..=4 {
            let index = RelayIndex::new(raw).unwrap();
            let before = bank.is_on(index);
            let level_before = lines.levels[index.slot()];

            bank.toggle(&mut lines, index);
            assert_eq!(bank.is_on(index), !before);

            bank.toggle(&mut lines, index);
            assert_eq!(bank.is_on(index), before);
            assert_eq!(lines.levels[index.slot()], level_before);
        }
    }

    #[test]
    fn active_low_polarity_inverts_the_line() {
        let mut lines = RecordedLines::default();
        let mut bank = RelayBank::new(true);

        bank.set(&mut lines, RelayIndex::new(1).unwrap(), true);
        assert_eq!(lines.levels[0], Some(false));

        bank.set(&mut lines, RelayIndex::new(1).unwrap(), false);
        assert_eq!(lines.levels[0], Some(true));

        let mut bank = RelayBank::new(false);
        bank.set(&mut lines, RelayIndex::new(1).unwrap(), true);
        assert_eq!(lines.levels[0], Some(true));
    }

    #[test]
    fn manual_toggle_of_relay4_pins_the_mode() {
        let mut lines = RecordedLines::default();
        let mut bank = RelayBank::new(true);
        bank.set_relay4_mode(&mut lines, Relay4Mode::Auto);

        let on = bank.toggle(&mut lines, RelayIndex::RELAY_4);
        assert!(on);
        assert_eq!(bank.relay4_mode(), Relay4Mode::On);

        bank.toggle(&mut lines, RelayIndex::RELAY_4);
        assert_eq!(bank.relay4_mode(), Relay4Mode::Off);
    }

    #[test]
    fn mode_off_and_on_force_the_relay_auto_leaves_it() {
        let mut lines = RecordedLines::default();
        let mut bank = RelayBank::new(true);

        bank.set_relay4_mode(&mut lines, Relay4Mode::On);
        assert!(bank.is_on(RelayIndex::RELAY_4));

        bank.set_relay4_mode(&mut lines, Relay4Mode::Auto);
        assert!(bank.is_on(RelayIndex::RELAY_4), "auto must not move the relay");

        bank.set_relay4_mode(&mut lines, Relay4Mode::Off);
        assert!(!bank.is_on(RelayIndex::RELAY_4));
    }

    #[test]
    fn cloud_style_set_does_not_touch_relay4_mode() {
        let mut lines = RecordedLines::default();
        let mut bank = RelayBank::new(true);
        bank.set_relay4_mode(&mut lines, Relay4Mode::Auto);

        bank.set(&mut lines, RelayIndex::new(2).unwrap(), true);
        bank.set(&mut lines, RelayIndex::RELAY_4, true);
        assert_eq!(bank.relay4_mode(), Relay4Mode::Auto);
    }

    #[test]
    fn relay4_mode_parse_round_trip() {
        for mode in [Relay4Mode::Off, Relay4Mode::On, Relay4Mode::Auto] {
            assert_eq!(Relay4Mode::parse(mode.as_str()), Some(mode));
        }
        assert_eq!(Relay4Mode::parse("AUTO"), None);
        assert_eq!(Relay4Mode::parse(""), None);
    }
}

//! On-board status LED.
//!
//! Interface boundary only: the connectivity driver sets a mode at each
//! transition and the control loop calls `tick()`. Blink timing internals
//! are deliberately uninteresting.

use core::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorMode {
    Off,
    /// Steady on: station connected.
    Solid,
    /// Slow blink: setup AP / idle.
    SlowBlink,
    /// Fast blink: connect attempt in progress.
    FastBlink,
}

impl IndicatorMode {
    /// Blink half-period, `None` for the steady modes.
    pub fn interval(self) -> Option<Duration> {
        match self {
            Self::Off | Self::Solid => None,
            Self::SlowBlink => Some(Duration::from_millis(800)),
            Self::FastBlink => Some(Duration::from_millis(120)),
        }
    }
}

#[cfg(target_os = "espidf")]
pub use self::led::StatusLed;

#[cfg(target_os = "espidf")]
mod led {
    use std::time::Instant;

    use anyhow::Result;
    use esp_idf_hal::gpio::{AnyOutputPin, Output, PinDriver};

    use super::IndicatorMode;

    pub struct StatusLed {
        pin: PinDriver<'static, AnyOutputPin, Output>,
        mode: IndicatorMode,
        lit: bool,
        last_toggle: Instant,
    }

    impl StatusLed {
        pub fn new(pin: AnyOutputPin) -> Result<Self> {
            Ok(Self {
                pin: PinDriver::output(pin)?,
                mode: IndicatorMode::Off,
                lit: false,
                last_toggle: Instant::now(),
            })
        }

        pub fn set_mode(&mut self, mode: IndicatorMode) {
            if self.mode == mode {
                return;
            }
            self.mode = mode;
            self.last_toggle = Instant::now();
            let lit = matches!(mode, IndicatorMode::Solid);
            self.drive(lit);
        }

        pub fn tick(&mut self) {
            let Some(interval) = self.mode.interval() else {
                return;
            };
            if self.last_toggle.elapsed() >= interval {
                self.last_toggle = Instant::now();
                let lit = !self.lit;
                self.drive(lit);
            }
        }

        fn drive(&mut self, lit: bool) {
            self.lit = lit;
            let result = if lit { self.pin.set_high() } else { self.pin.set_low() };
            if let Err(err) = result {
                log::debug!("indicator: drive failed: {err}");
            }
        }
    }
}

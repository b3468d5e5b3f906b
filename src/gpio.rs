//! Mode-select GPIO and the fail-safe indicator LED.
//!
//! The full type-state pin framework the lineage crate builds (`gpio!`
//! macro generating every `GPIOx` port, every alternate-function mapping)
//! is far more than this crate's two pins need: one input with an internal
//! pull asserted low to force update mode (§6), and one push-pull output
//! used only to blink out the boot-time integrity failure (§4.5 step 3,
//! §7's "visible fail-safe indicator"). Both pins live on `GPIOC`, so rather
//! than have `ModePin` and `FailSafeLed` each try to own the whole register
//! block (only one of them could exist at a time), both are zero-sized
//! handles that reach the shared block through `GPIOC::ptr()`, the same
//! singleton-split idiom [`crate::serial`]'s USART1 `Tx`/`Rx` pair uses.

use embedded_hal::digital::v2::{InputPin, OutputPin};

#[cfg(feature = "device")]
use core::convert::Infallible;
#[cfg(feature = "device")]
use stm32f4::stm32f401::{gpioc::RegisterBlock, RCC};

/// Reads the externally asserted mode-select line. Low = force update mode.
pub trait ModeSelect {
    fn is_update_requested(&self) -> bool;
}

/// Drives the fail-safe indicator. No-op on any target where the LED isn't
/// wired; `FailSafeLed` itself always returns success.
pub trait FailSafeIndicator {
    fn set_lit(&mut self, lit: bool);
}

#[cfg(feature = "device")]
fn gpioc() -> &'static RegisterBlock {
    unsafe { &*stm32f4::stm32f401::GPIOC::ptr() }
}

#[cfg(feature = "device")]
pub struct ModePin {
    _private: (),
}

#[cfg(feature = "device")]
impl ModePin {
    /// Enable `GPIOC` clocking and configure pin 13 as a pulled-up input.
    /// Asserted (driven low externally) forces update mode.
    pub fn new(rcc: &RCC) -> Self {
        rcc.ahb1enr.modify(|_, w| w.gpiocen().set_bit());
        gpioc().moder.modify(|_, w| unsafe { w.moder13().bits(0b00) });
        gpioc().pupdr.modify(|_, w| unsafe { w.pupdr13().bits(0b01) });
        ModePin { _private: () }
    }
}

#[cfg(feature = "device")]
impl InputPin for ModePin {
    type Error = Infallible;
    fn is_high(&self) -> Result<bool, Infallible> {
        Ok(gpioc().idr.read().idr13().bit_is_set())
    }
    fn is_low(&self) -> Result<bool, Infallible> {
        Ok(gpioc().idr.read().idr13().bit_is_clear())
    }
}

#[cfg(feature = "device")]
impl ModeSelect for ModePin {
    fn is_update_requested(&self) -> bool {
        self.is_low().unwrap_or(false)
    }
}

#[cfg(feature = "device")]
pub struct FailSafeLed {
    _private: (),
}

#[cfg(feature = "device")]
impl FailSafeLed {
    pub fn new(rcc: &RCC) -> Self {
        rcc.ahb1enr.modify(|_, w| w.gpiocen().set_bit());
        gpioc().moder.modify(|_, w| unsafe { w.moder14().bits(0b01) });
        FailSafeLed { _private: () }
    }
}

#[cfg(feature = "device")]
impl OutputPin for FailSafeLed {
    type Error = Infallible;
    fn set_high(&mut self) -> Result<(), Infallible> {
        gpioc().bsrr.write(|w| w.bs14().set_bit());
        Ok(())
    }
    fn set_low(&mut self) -> Result<(), Infallible> {
        gpioc().bsrr.write(|w| w.br14().set_bit());
        Ok(())
    }
}

#[cfg(feature = "device")]
impl FailSafeIndicator for FailSafeLed {
    fn set_lit(&mut self, lit: bool) {
        let _ = if lit { self.set_high() } else { self.set_low() };
    }
}

/// Host-side fakes: a settable mode line and a recording LED, used by
/// `boot` tests that exercise `run` end-to-end without real GPIO.
#[cfg(test)]
pub mod fake {
    use super::{FailSafeIndicator, ModeSelect};

    pub struct FixedModePin(pub bool);
    impl ModeSelect for FixedModePin {
        fn is_update_requested(&self) -> bool {
            self.0
        }
    }

    #[derive(Default)]
    pub struct RecordingLed {
        pub lit: bool,
    }
    impl FailSafeIndicator for RecordingLed {
        fn set_lit(&mut self, lit: bool) {
            self.lit = lit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::{FixedModePin, RecordingLed};
    use super::*;

    #[test]
    fn fixed_mode_pin_reports_configured_value() {
        assert!(FixedModePin(true).is_update_requested());
        assert!(!FixedModePin(false).is_update_requested());
    }

    #[test]
    fn recording_led_tracks_last_state() {
        let mut led = RecordingLed::default();
        led.set_lit(true);
        assert!(led.lit);
        led.set_lit(false);
        assert!(!led.lit);
    }
}

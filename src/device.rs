//! Wires the real peripheral singletons into the generic `Device<F, C>`
//! bundle [`crate::session`] dispatches against.
//!
//! This is the concrete analogue of §5's "the flash controller, CRC
//! peripheral ... are process-wide singletons": `Peripherals::take()`
//! (from `cortex-m`/`stm32f4`'s own singleton pattern) is called exactly
//! once, here, and its pieces are distributed into the typed handles the
//! rest of the crate works with.

#![cfg(feature = "device")]

use crate::crc::CrcExt;
use crate::flash::{FlashExt, FlashWriter};
use crate::gpio::{FailSafeLed, ModePin};
use crate::rcc::{Rcc, RccExt};
use crate::session::Device;
use cortex_m::peripheral::Peripherals as CorePeripherals;
use stm32f4::stm32f401::{Peripherals, GPIOA, USART1};

pub type RealDevice = Device<FlashWriter, crate::crc::Crc>;

/// Everything `boot::run`/`boot::jump_to_application` need, split out of
/// the two singleton `Peripherals::take()` calls so each module only
/// borrows what it actually touches. `usart1`/`gpioa` are left unconstrained
/// here because the serial link's baud-rate divisor depends on the clock
/// tree the caller hasn't brought up yet; `serial::Usart1Ext::constrain`
/// runs after that, in `main`.
pub struct BootResources {
    pub device: RealDevice,
    pub rcc: Rcc,
    pub mode_pin: ModePin,
    pub fail_safe_led: FailSafeLed,
    pub usart1: USART1,
    pub gpioa: GPIOA,
    pub syst: cortex_m::peripheral::SYST,
}

/// Takes ownership of both peripheral singletons exactly once. Panics (via
/// `unwrap`) if called more than once, matching `cortex-m`'s own
/// `Peripherals::take` contract.
pub fn take() -> BootResources {
    let dp = Peripherals::take().unwrap();
    let cp = CorePeripherals::take().unwrap();

    let rcc_raw = dp.RCC;
    let mode_pin = ModePin::new(&rcc_raw);
    let fail_safe_led = FailSafeLed::new(&rcc_raw);
    let device = Device {
        flash: dp.FLASH.constrain(),
        crc: dp.CRC.constrain(),
    };
    let rcc = rcc_raw.constrain();

    BootResources {
        device,
        rcc,
        mode_pin,
        fail_safe_led,
        usart1: dp.USART1,
        gpioa: dp.GPIOA,
        syst: cp.SYST,
    }
}

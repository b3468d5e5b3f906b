//! Boot Decider / Jumper: mode selection and the no-return jump into the
//! installed application.
//!
//! `decide_mode` is a pure function so the table in the testable-properties
//! section can be checked directly, with no hardware in the loop. Only
//! `jump_to_application` and `run` touch real peripherals, and only when
//! built with the `device` feature.

use crate::flash::FlashDevice;
use crate::protocol::Crc32;
use crate::session::{run_session, Device, ImageDescriptor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootDecision {
    UpdateMode,
    Jump,
    FailSafe,
}

/// §8 property 6, implemented exactly as tabulated: the mode pin overrides
/// everything, then descriptor validity, then the CRC compare.
pub fn decide_mode(mode_pin_low: bool, descriptor: ImageDescriptor, computed_crc: u32) -> BootDecision {
    if mode_pin_low {
        return BootDecision::UpdateMode;
    }
    if !descriptor.is_valid() {
        return BootDecision::UpdateMode;
    }
    if computed_crc == descriptor.expected_crc32 {
        BootDecision::Jump
    } else {
        BootDecision::FailSafe
    }
}

/// Computes the CRC over the installed image using whatever `Crc32` the
/// caller already owns (hardware peripheral or software model), honoring
/// §9's note that `CRC_Compute_Flash_Data` is just `crc32_bytes` over the
/// image region.
pub fn compute_image_crc<F: FlashDevice, C: Crc32>(device: &mut Device<F, C>, descriptor: &ImageDescriptor) -> u32 {
    let len = descriptor.length_bytes as usize;
    let data = device.flash.read_slice(crate::config::APP_START, len);
    device.crc.crc32_bytes(data)
}

#[cfg(feature = "device")]
mod jump {
    use cortex_m::peripheral::{NVIC, SCB};
    use stm32f4::stm32f401::Peripherals;

    /// Tear down every piece of state the application must not inherit,
    /// then branch into it with no return. Order matches the jump sequence
    /// exactly: SysTick, NVIC, peripheral buses, flash, clock tree, barriers,
    /// VTOR, global interrupt disable, MSP, reset handler.
    ///
    /// # Safety
    /// `app_start` must point at a valid vector table (initial MSP at
    /// offset 0, reset handler at offset 4) and the caller must never
    /// execute any code after this call - it does not return.
    pub unsafe fn jump_to_application(dp: Peripherals, cp: cortex_m::Peripherals, app_start: u32) -> ! {
        let mut systick = cp.SYST;
        systick.disable_counter();
        systick.clear_current();
        systick.disable_interrupt();

        for i in 0..8u8 {
            NVIC::mask(IrqnAll(i));
        }
        cortex_m::peripheral::NVIC::unpend_all();

        let rcc = &dp.RCC;
        rcc.ahb1rstr.write(|w| unsafe { w.bits(0xFFFF_FFFF) });
        rcc.ahb1rstr.write(|w| unsafe { w.bits(0) });
        rcc.ahb2rstr.write(|w| unsafe { w.bits(0xFFFF_FFFF) });
        rcc.ahb2rstr.write(|w| unsafe { w.bits(0) });
        rcc.apb1rstr.write(|w| unsafe { w.bits(0xFFFF_FFFF) });
        rcc.apb1rstr.write(|w| unsafe { w.bits(0) });
        rcc.apb2rstr.write(|w| unsafe { w.bits(0xFFFF_FFFF) });
        rcc.apb2rstr.write(|w| unsafe { w.bits(0) });
        rcc.ahb1enr.write(|w| unsafe { w.bits(0) });
        rcc.ahb2enr.write(|w| unsafe { w.bits(0) });
        rcc.apb1enr.write(|w| unsafe { w.bits(0) });
        rcc.apb2enr.write(|w| unsafe { w.bits(0) });

        dp.FLASH.cr.modify(|_, w| w.lock().set_bit());
        dp.FLASH.sr.write(|w| {
            w.eop()
                .set_bit()
                .wrperr()
                .set_bit()
                .pgaerr()
                .set_bit()
                .pgperr()
                .set_bit()
                .pgserr()
                .set_bit()
        });

        rcc.cr.modify(|_, w| w.pllon().clear_bit().hseon().clear_bit().csson().clear_bit());
        rcc.cfgr.reset();
        rcc.pllcfgr.reset();

        cortex_m::asm::dsb();
        cortex_m::asm::isb();

        (*SCB::PTR).vtor.write(app_start);

        cortex_m::interrupt::disable();

        let msp = core::ptr::read_volatile(app_start as *const u32);
        let reset_handler = core::ptr::read_volatile((app_start + 4) as *const u32);

        cortex_m::asm::dsb();
        cortex_m::asm::isb();

        cortex_m::register::msp::write(msp);
        let entry: extern "C" fn() -> ! = core::mem::transmute(reset_handler);
        entry()
    }

    struct IrqnAll(u8);
    unsafe impl cortex_m::interrupt::InterruptNumber for IrqnAll {
        fn number(self) -> u16 {
            self.0 as u16
        }
    }
}

#[cfg(feature = "device")]
pub use jump::jump_to_application;

/// Top-level entry: optional POST, sample the mode pin, read the
/// descriptor, decide, and either run the update session or jump/fail-safe.
/// Collapses the original `Bootloader()`/`main()` split into one function
/// per §9's instruction to make the session state an explicit value rather
/// than a module global.
#[cfg(feature = "device")]
pub fn run<S, F, C>(
    serial: &mut S,
    device: &mut Device<F, C>,
    mode_pin_low: bool,
    post_ok: bool,
) -> BootDecision
where
    S: crate::serial::SerialLink,
    F: FlashDevice,
    C: Crc32,
{
    if !post_ok {
        #[cfg(feature = "defmt")]
        defmt::warn!("boot: POST failed, entering fail-safe");
        return BootDecision::FailSafe;
    }

    let descriptor = ImageDescriptor::read(&device.flash);

    if mode_pin_low || !descriptor.is_valid() {
        #[cfg(feature = "defmt")]
        defmt::info!("boot: entering update mode (pin_low={}, valid={})", mode_pin_low, descriptor.is_valid());
        run_session(serial, device);
        return BootDecision::UpdateMode;
    }

    let computed_crc = compute_image_crc(device, &descriptor);
    let decision = decide_mode(mode_pin_low, descriptor, computed_crc);
    #[cfg(feature = "defmt")]
    defmt::info!("boot: decision {}", defmt::Debug2Format(&decision));
    decision
}

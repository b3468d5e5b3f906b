//! SysTick-based delay provider.
//!
//! Replaces the lineage crate's `mcycle`/`TIMER`-based `Delay` providers
//! (RISC-V has no SysTick) with the one clock source every Cortex-M part
//! has: the core's own SysTick counter, free-running in down-counting mode.
//! Implements the same `embedded_hal` delay trait the lineage crate's
//! `Delay` types implement, so call sites (POST, clock bring-up) don't care
//! which provider backs them.

#[cfg(feature = "device")]
use cortex_m::peripheral::syst::SystClkSource;
#[cfg(feature = "device")]
use cortex_m::peripheral::SYST;
#[cfg(feature = "device")]
use embedded_hal::blocking::delay::DelayMs;

#[cfg(feature = "device")]
pub struct Delay {
    syst: SYST,
    core_frequency: u32,
}

#[cfg(feature = "device")]
impl Delay {
    pub fn new(mut syst: SYST, core_frequency: u32) -> Self {
        syst.set_clock_source(SystClkSource::Core);
        Delay { syst, core_frequency }
    }

    /// Disable the counter, matching §4.5 step 4's "disable SysTick,
    /// control=0, load=0, value=0" sequence exactly, since the jump
    /// teardown needs this independent of any in-flight delay call.
    pub fn disable(&mut self) {
        self.syst.disable_counter();
        self.syst.disable_interrupt();
        unsafe {
            let syst = &*SYST::PTR;
            syst.rvr.write(0);
            syst.cvr.write(0);
        }
    }

    pub fn free(self) -> SYST {
        self.syst
    }
}

#[cfg(feature = "device")]
impl DelayMs<u32> for Delay {
    fn delay_ms(&mut self, ms: u32) {
        let ticks_per_ms = self.core_frequency / 1000;
        let mut remaining_ms = ms;
        const MAX_RVR: u32 = 0x00FF_FFFF;
        while remaining_ms > 0 {
            let chunk_ms = remaining_ms.min(MAX_RVR / ticks_per_ms.max(1));
            let reload = (ticks_per_ms * chunk_ms).min(MAX_RVR);
            self.syst.set_reload(reload);
            self.syst.clear_current();
            self.syst.enable_counter();
            while !self.syst.has_wrapped() {}
            self.syst.disable_counter();
            remaining_ms -= chunk_ms;
        }
    }
}

#[cfg(feature = "device")]
impl DelayMs<u16> for Delay {
    fn delay_ms(&mut self, ms: u16) {
        DelayMs::<u32>::delay_ms(self, ms as u32);
    }
}

#[cfg(feature = "device")]
impl DelayMs<u8> for Delay {
    fn delay_ms(&mut self, ms: u8) {
        DelayMs::<u32>::delay_ms(self, ms as u32);
    }
}

//! Clock/Reset Tree (CK): HSE + PLL bring-up and peripheral bus gating.
//!
//! Grounded on the lineage crate's `rcu.rs` register-proxy pattern (`AHB`,
//! `APB1`, `APB2` each a zero-sized handle granting exclusive access to one
//! enable/reset register pair) but rebuilt for the STM32 RCC layout and for
//! the one thing this crate actually needs the clock tree to do: bring up
//! an external crystal and PLL before `CE`/`FS`/USART are usable, spin-wait
//! on the ready bits with a bounded timeout, and provide the handful of
//! raw-register operations `boot::jump_to_application`'s de-init step reads
//! directly (kept as plain constants there rather than re-exposed from
//! here, since that step intentionally bypasses every safe wrapper).

#[cfg(feature = "device")]
use stm32f4::stm32f401::RCC;

use crate::config::SPIN_TIMEOUT;

/// Returned by [`RccExt::constrain`]; name matches the lineage crate's
/// `Rcu` so readers of both crates recognize the pattern immediately.
#[cfg(feature = "device")]
pub struct Rcc {
    rcc: RCC,
}

#[cfg(feature = "device")]
pub trait RccExt {
    fn constrain(self) -> Rcc;
}

#[cfg(feature = "device")]
impl RccExt for RCC {
    fn constrain(self) -> Rcc {
        Rcc { rcc: self }
    }
}

/// A spin-wait exceeded [`SPIN_TIMEOUT`] iterations without the awaited
/// condition becoming true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout;

/// Poll `predicate` up to `SPIN_TIMEOUT` times, matching the `~0x5000`
/// iteration bound the original clock/POST code uses at every spin site.
pub fn spin_until(mut predicate: impl FnMut() -> bool) -> Result<(), Timeout> {
    for _ in 0..SPIN_TIMEOUT {
        if predicate() {
            return Ok(());
        }
    }
    Err(Timeout)
}

#[cfg(feature = "device")]
impl Rcc {
    /// Enable the external crystal, wait for `HSERDY`, configure and enable
    /// the main PLL, wait for `PLLRDY`, then switch `SYSCLK` to the PLL
    /// output. Each wait is bounded by [`spin_until`].
    pub fn bring_up_hse_pll(&mut self, pll_m: u8, pll_n: u16, pll_p: u8, pll_q: u8) -> Result<(), Timeout> {
        self.rcc.cr.modify(|_, w| w.hseon().set_bit());
        spin_until(|| self.rcc.cr.read().hserdy().bit_is_set())?;

        let pllp_bits = match pll_p {
            2 => 0b00,
            4 => 0b01,
            6 => 0b10,
            8 => 0b11,
            _ => 0b00,
        };
        self.rcc.pllcfgr.write(|w| unsafe {
            w.pllsrc()
                .set_bit()
                .pllm()
                .bits(pll_m)
                .plln()
                .bits(pll_n)
                .pllp()
                .bits(pllp_bits)
                .pllq()
                .bits(pll_q)
        });

        self.rcc.cr.modify(|_, w| w.pllon().set_bit());
        spin_until(|| self.rcc.cr.read().pllrdy().bit_is_set())?;

        self.rcc.cfgr.modify(|_, w| unsafe { w.sw().bits(0b10) });
        spin_until(|| self.rcc.cfgr.read().sws().bits() == 0b10)
    }

    pub fn ahb1(&mut self) -> &stm32f4::stm32f401::rcc::AHB1ENR {
        &self.rcc.ahb1enr
    }

    pub fn apb1(&mut self) -> &stm32f4::stm32f401::rcc::APB1ENR {
        &self.rcc.apb1enr
    }

    pub fn apb2(&mut self) -> &stm32f4::stm32f401::rcc::APB2ENR {
        &self.rcc.apb2enr
    }
}

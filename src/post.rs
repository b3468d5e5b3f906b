//! Power-on self-test: an optional, non-core diagnostic collaborator.
//!
//! §1 names POST as out-of-scope for correctness ("may be invoked before
//! the core runs but is not part of the core's correctness contract").
//! `Post` is the named trait that boundary becomes; its result is advisory
//! only (`boot::run` treats a failed POST as a fail-safe halt, never as a
//! reason to pick a different boot mode).

use crate::rcc::spin_until;

pub trait Post {
    /// Returns `true` if the check passed.
    fn run(&mut self) -> bool;
}

/// Confirms the clock tree is actually stable (HSE and PLL ready bits both
/// set) before trusting anything timed off it, bounded by the same
/// coarse spin-timeout every clock-ready wait in this crate uses.
#[cfg(feature = "device")]
pub struct ClockCheck<'a> {
    rcc: &'a stm32f4::stm32f401::RCC,
}

#[cfg(feature = "device")]
impl<'a> ClockCheck<'a> {
    pub fn new(rcc: &'a stm32f4::stm32f401::RCC) -> Self {
        ClockCheck { rcc }
    }
}

#[cfg(feature = "device")]
impl<'a> Post for ClockCheck<'a> {
    fn run(&mut self) -> bool {
        let ready = spin_until(|| {
            let cr = self.rcc.cr.read();
            cr.hserdy().bit_is_set() && cr.pllrdy().bit_is_set()
        });
        ready.is_ok()
    }
}

/// Host-side fake with a fixed outcome, used by `boot` tests.
#[cfg(test)]
pub mod fake {
    use super::Post;

    pub struct FixedPost(pub bool);
    impl Post for FixedPost {
        fn run(&mut self) -> bool {
            self.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FixedPost;
    use super::*;

    #[test]
    fn fixed_post_reports_configured_outcome() {
        assert!(FixedPost(true).run());
        assert!(!FixedPost(false).run());
    }
}

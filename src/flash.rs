//! On-chip flash programming.
//!
//! The part's 256 KiB is laid out as four 16 KiB sectors, one 64 KiB sector
//! and one 128 KiB sector:
//!
//! ```text
//! sector 0..3  0x0800_0000 .. 0x0801_0000   16K each  (bootloader)
//! sector 4     0x0801_0000 .. 0x0802_0000   64K       (application image)
//! sector 5     0x0802_0000 .. 0x0804_0000   128K      (image descriptor, rest unused)
//! ```
//!
//! Unlocking follows the standard two-key sequence (`KEYR` written with
//! `0x45670123` then `0xCDEF89AB`); every operation re-locks on return, and
//! every operation waits for `BSY` to clear and then checks the error flags
//! in `SR`, clearing them before returning so a stale flag from one call
//! never leaks into the next caller's result.

use crate::config::{APP_MAX_SIZE, APP_START, METADATA_BASE};

#[cfg(feature = "device")]
use stm32f4::stm32f401::FLASH as FlashRegisterBlock;

const KEY1: u32 = 0x4567_0123;
const KEY2: u32 = 0xCDEF_89AB;

/// A flash sector, addressable by its base address and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sector {
    S0,
    S1,
    S2,
    S3,
    S4,
    S5,
}

impl Sector {
    pub const fn number(self) -> u8 {
        match self {
            Sector::S0 => 0,
            Sector::S1 => 1,
            Sector::S2 => 2,
            Sector::S3 => 3,
            Sector::S4 => 4,
            Sector::S5 => 5,
        }
    }

    pub const fn base(self) -> u32 {
        match self {
            Sector::S0 => 0x0800_0000,
            Sector::S1 => 0x0800_4000,
            Sector::S2 => 0x0800_8000,
            Sector::S3 => 0x0800_C000,
            Sector::S4 => APP_START,
            Sector::S5 => METADATA_BASE,
        }
    }

    pub const fn len(self) -> u32 {
        match self {
            Sector::S0 | Sector::S1 | Sector::S2 | Sector::S3 => 16 * 1024,
            Sector::S4 => APP_MAX_SIZE + 1,
            Sector::S5 => 128 * 1024,
        }
    }

    /// The sector containing `addr`, if any sector in this map covers it.
    pub fn containing(addr: u32) -> Option<Sector> {
        for s in [
            Sector::S0,
            Sector::S1,
            Sector::S2,
            Sector::S3,
            Sector::S4,
            Sector::S5,
        ] {
            if addr >= s.base() && addr < s.base() + s.len() {
                return Some(s);
            }
        }
        None
    }
}

/// Common surface shared by the real `FlashWriter` and the host-side
/// `fake::FakeFlash`, so [`crate::session`] can be written once against
/// either.
pub trait FlashDevice {
    fn erase_sector(&mut self, sector: Sector) -> Result<(), Error>;
    fn program_byte(&mut self, addr: u32, value: u8) -> Result<(), Error>;
    fn program_halfword(&mut self, addr: u32, value: u16) -> Result<(), Error>;
    fn program_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), Error>;
    fn read_byte(&self, addr: u32) -> u8;
    fn read_halfword(&self, addr: u32) -> u16;
    fn read_word(&self, addr: u32) -> u32;
    fn read_slice(&self, addr: u32, len: usize) -> &[u8];
}

/// Flash operation failures, matching the bits latched in `SR`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `WRPERR` - target address falls in a write-protected sector.
    WriteProtected,
    /// `PGAERR` - program address not aligned to the operation's width.
    Alignment,
    /// `PGPERR` - parallelism/size mismatch between operations.
    Parallelism,
    /// `PGSERR` - program sequence error (e.g. programming without erase).
    Sequence,
    /// `OPERR` / `RDERR` - operation or read protection error.
    Operation,
    /// Address outside the map in [`Sector`].
    OutOfRange,
}

#[cfg(feature = "device")]
pub struct FlashWriter {
    flash: FlashRegisterBlock,
}

#[cfg(feature = "device")]
pub trait FlashExt {
    fn constrain(self) -> FlashWriter;
}

#[cfg(feature = "device")]
impl FlashExt for FlashRegisterBlock {
    fn constrain(self) -> FlashWriter {
        FlashWriter { flash: self }
    }
}

#[cfg(feature = "device")]
impl FlashWriter {
    pub fn unlock(&mut self) {
        if self.flash.cr.read().lock().bit_is_set() {
            self.flash.keyr.write(|w| unsafe { w.bits(KEY1) });
            self.flash.keyr.write(|w| unsafe { w.bits(KEY2) });
        }
    }

    pub fn lock(&mut self) {
        self.flash.cr.modify(|_, w| w.lock().set_bit());
    }

    /// Arm the controller for a program operation of the given width -
    /// `0b00` byte, `0b01` halfword, `0b10` word - matching `CR.PSIZE`.
    pub fn write_enable(&mut self, psize: u8) {
        self.flash.cr.modify(|_, w| unsafe { w.pg().set_bit().psize().bits(psize) });
    }

    pub fn write_disable(&mut self) {
        self.flash.cr.modify(|_, w| w.pg().clear_bit());
    }

    fn wait_ready(&mut self) {
        while self.flash.sr.read().bsy().bit_is_set() {}
    }

    fn take_error(&mut self) -> Result<(), Error> {
        let sr = self.flash.sr.read();
        let err = if sr.wrperr().bit_is_set() {
            Some(Error::WriteProtected)
        } else if sr.pgaerr().bit_is_set() {
            Some(Error::Alignment)
        } else if sr.pgperr().bit_is_set() {
            Some(Error::Parallelism)
        } else if sr.pgserr().bit_is_set() {
            Some(Error::Sequence)
        } else if sr.operr().bit_is_set() || sr.rderr().bit_is_set() {
            Some(Error::Operation)
        } else {
            None
        };
        // Error flags and EOP are cleared by writing 1; clear everything we
        // might have observed so the next operation starts from a clean SR.
        self.flash.sr.write(|w| {
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
                .operr()
                .set_bit()
                .rderr()
                .set_bit()
        });
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Erase `sector` in full. Blocks until the hardware reports completion.
    pub fn erase_sector(&mut self, sector: Sector) -> Result<(), Error> {
        self.unlock();
        self.wait_ready();
        self.flash.cr.modify(|_, w| unsafe { w.ser().set_bit().snb().bits(sector.number()) });
        self.flash.cr.modify(|_, w| w.strt().set_bit());
        self.wait_ready();
        self.flash.cr.modify(|_, w| w.ser().clear_bit());
        let result = self.take_error();
        self.lock();
        result
    }

    /// Program a single byte at `addr`. Byte-wide programming (`PSIZE=00`)
    /// is the only width that lets the Write Cursor land at an arbitrary
    /// address after a chunk whose length isn't a multiple of 4.
    pub fn program_byte(&mut self, addr: u32, value: u8) -> Result<(), Error> {
        if Sector::containing(addr).is_none() {
            return Err(Error::OutOfRange);
        }
        self.unlock();
        self.wait_ready();
        self.write_enable(0b00);
        unsafe { core::ptr::write_volatile(addr as *mut u8, value) };
        self.wait_ready();
        self.write_disable();
        let result = self.take_error();
        self.lock();
        result
    }

    /// Program one 16-bit halfword at `addr`, which must be halfword-aligned
    /// and fall within [`Sector::containing`].
    pub fn program_halfword(&mut self, addr: u32, value: u16) -> Result<(), Error> {
        if addr % 2 != 0 {
            return Err(Error::Alignment);
        }
        if Sector::containing(addr).is_none() {
            return Err(Error::OutOfRange);
        }
        self.unlock();
        self.wait_ready();
        self.write_enable(0b01);
        unsafe { core::ptr::write_volatile(addr as *mut u16, value) };
        self.wait_ready();
        self.write_disable();
        let result = self.take_error();
        self.lock();
        result
    }

    /// Program one 32-bit word at `addr`, which must be word-aligned and
    /// fall within [`Sector::containing`].
    pub fn program_word(&mut self, addr: u32, value: u32) -> Result<(), Error> {
        if addr % 4 != 0 {
            return Err(Error::Alignment);
        }
        if Sector::containing(addr).is_none() {
            return Err(Error::OutOfRange);
        }
        self.unlock();
        self.wait_ready();
        self.write_enable(0b10);
        unsafe { core::ptr::write_volatile(addr as *mut u32, value) };
        self.wait_ready();
        self.write_disable();
        let result = self.take_error();
        self.lock();
        result
    }

    /// Program a byte slice starting at `addr`, one byte at a time, so the
    /// cursor can resume at any address regardless of the previous chunk's
    /// length.
    pub fn program_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        for (i, &byte) in data.iter().enumerate() {
            self.program_byte(addr + i as u32, byte)?;
        }
        Ok(())
    }

    /// Read a byte at `addr` directly from the memory-mapped region; no
    /// controller sequencing is required for reads.
    pub fn read_byte(&self, addr: u32) -> u8 {
        unsafe { core::ptr::read_volatile(addr as *const u8) }
    }

    pub fn read_halfword(&self, addr: u32) -> u16 {
        unsafe { core::ptr::read_volatile(addr as *const u16) }
    }

    pub fn read_word(&self, addr: u32) -> u32 {
        unsafe { core::ptr::read_volatile(addr as *const u32) }
    }

    pub fn read_slice(&self, addr: u32, len: usize) -> &[u8] {
        unsafe { core::slice::from_raw_parts(addr as *const u8, len) }
    }
}

#[cfg(feature = "device")]
impl FlashDevice for FlashWriter {
    fn erase_sector(&mut self, sector: Sector) -> Result<(), Error> {
        FlashWriter::erase_sector(self, sector)
    }
    fn program_byte(&mut self, addr: u32, value: u8) -> Result<(), Error> {
        FlashWriter::program_byte(self, addr, value)
    }
    fn program_halfword(&mut self, addr: u32, value: u16) -> Result<(), Error> {
        FlashWriter::program_halfword(self, addr, value)
    }
    fn program_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
        FlashWriter::program_bytes(self, addr, data)
    }
    fn read_byte(&self, addr: u32) -> u8 {
        FlashWriter::read_byte(self, addr)
    }
    fn read_halfword(&self, addr: u32) -> u16 {
        FlashWriter::read_halfword(self, addr)
    }
    fn read_word(&self, addr: u32) -> u32 {
        FlashWriter::read_word(self, addr)
    }
    fn read_slice(&self, addr: u32, len: usize) -> &[u8] {
        FlashWriter::read_slice(self, addr, len)
    }
}

/// Host-side fake used by [`crate::session`] tests: a byte array standing in
/// for the whole flash address space, with sector-granularity erase and the
/// same `Error` surface the real `FlashWriter` exposes.
#[cfg(test)]
pub mod fake {
    use super::{Error, Sector};
    use std::vec;
    use std::vec::Vec;

    pub struct FakeFlash {
        base: u32,
        mem: Vec<u8>,
    }

    impl FakeFlash {
        pub fn new(base: u32, len: usize) -> Self {
            FakeFlash {
                base,
                mem: vec![0xFFu8; len],
            }
        }

        fn index(&self, addr: u32) -> usize {
            (addr - self.base) as usize
        }

        pub fn erase_sector(&mut self, sector: Sector) -> Result<(), Error> {
            let start = self.index(sector.base());
            let end = start + sector.len() as usize;
            if end > self.mem.len() {
                return Err(Error::OutOfRange);
            }
            for b in &mut self.mem[start..end] {
                *b = 0xFF;
            }
            Ok(())
        }

        pub fn program_byte(&mut self, addr: u32, value: u8) -> Result<(), Error> {
            let i = self.index(addr);
            if i >= self.mem.len() {
                return Err(Error::OutOfRange);
            }
            // A real controller can only clear bits during a program
            // operation; model that so double-writes without erase fail the
            // same way they would on hardware.
            let current = self.mem[i];
            if current & value != value {
                return Err(Error::Sequence);
            }
            self.mem[i] = value;
            Ok(())
        }

        pub fn program_halfword(&mut self, addr: u32, value: u16) -> Result<(), Error> {
            if addr % 2 != 0 {
                return Err(Error::Alignment);
            }
            let bytes = value.to_le_bytes();
            self.program_byte(addr, bytes[0])?;
            self.program_byte(addr + 1, bytes[1])
        }

        pub fn program_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
            for (i, &byte) in data.iter().enumerate() {
                self.program_byte(addr + i as u32, byte)?;
            }
            Ok(())
        }

        pub fn read_byte(&self, addr: u32) -> u8 {
            self.mem[self.index(addr)]
        }

        pub fn read_halfword(&self, addr: u32) -> u16 {
            let i = self.index(addr);
            u16::from_le_bytes([self.mem[i], self.mem[i + 1]])
        }

        pub fn read_word(&self, addr: u32) -> u32 {
            let i = self.index(addr);
            u32::from_le_bytes([self.mem[i], self.mem[i + 1], self.mem[i + 2], self.mem[i + 3]])
        }

        pub fn read_slice(&self, addr: u32, len: usize) -> &[u8] {
            let i = self.index(addr);
            &self.mem[i..i + len]
        }
    }

    impl super::FlashDevice for FakeFlash {
        fn erase_sector(&mut self, sector: super::Sector) -> Result<(), Error> {
            FakeFlash::erase_sector(self, sector)
        }
        fn program_byte(&mut self, addr: u32, value: u8) -> Result<(), Error> {
            FakeFlash::program_byte(self, addr, value)
        }
        fn program_halfword(&mut self, addr: u32, value: u16) -> Result<(), Error> {
            FakeFlash::program_halfword(self, addr, value)
        }
        fn program_bytes(&mut self, addr: u32, data: &[u8]) -> Result<(), Error> {
            FakeFlash::program_bytes(self, addr, data)
        }
        fn read_byte(&self, addr: u32) -> u8 {
            FakeFlash::read_byte(self, addr)
        }
        fn read_halfword(&self, addr: u32) -> u16 {
            FakeFlash::read_halfword(self, addr)
        }
        fn read_word(&self, addr: u32) -> u32 {
            FakeFlash::read_word(self, addr)
        }
        fn read_slice(&self, addr: u32, len: usize) -> &[u8] {
            FakeFlash::read_slice(self, addr, len)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeFlash;
    use super::*;

    #[test]
    fn erase_resets_sector_to_erased_value() {
        let mut flash = FakeFlash::new(Sector::S4.base(), Sector::S4.len() as usize);
        flash.program_bytes(Sector::S4.base(), &[0x00, 0x01, 0x02]).unwrap();
        flash.erase_sector(Sector::S4).unwrap();
        assert_eq!(flash.read_byte(Sector::S4.base()), 0xFF);
    }

    #[test]
    fn program_without_erase_cannot_set_cleared_bits() {
        let mut flash = FakeFlash::new(Sector::S4.base(), Sector::S4.len() as usize);
        flash.program_bytes(Sector::S4.base(), &[0x0F]).unwrap();
        assert_eq!(
            flash.program_bytes(Sector::S4.base(), &[0xFF]),
            Err(Error::Sequence)
        );
    }

    #[test]
    fn sector_containing_maps_known_addresses() {
        assert_eq!(Sector::containing(0x0800_0000), Some(Sector::S0));
        assert_eq!(Sector::containing(APP_START), Some(Sector::S4));
        assert_eq!(Sector::containing(METADATA_BASE), Some(Sector::S5));
        assert_eq!(Sector::containing(0x0900_0000), None);
    }

    #[test]
    fn program_bytes_resumes_at_an_unaligned_address_after_an_odd_length_write() {
        // A 3-byte write leaves the cursor at base+3; a following write must
        // still land there instead of failing with an alignment error.
        let mut flash = FakeFlash::new(Sector::S4.base(), Sector::S4.len() as usize);
        flash.erase_sector(Sector::S4).unwrap();
        flash.program_bytes(Sector::S4.base(), &[1, 2, 3]).unwrap();
        flash.program_bytes(Sector::S4.base() + 3, &[4, 5]).unwrap();
        assert_eq!(flash.read_slice(Sector::S4.base(), 5), &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn program_halfword_round_trips_and_rejects_odd_addresses() {
        let mut flash = FakeFlash::new(Sector::S4.base(), Sector::S4.len() as usize);
        flash.erase_sector(Sector::S4).unwrap();
        flash.program_halfword(Sector::S4.base(), 0xBEEF).unwrap();
        assert_eq!(flash.read_halfword(Sector::S4.base()), 0xBEEF);
        assert_eq!(
            flash.program_halfword(Sector::S4.base() + 1, 0x1234),
            Err(Error::Alignment)
        );
    }
}

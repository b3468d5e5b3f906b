//! Compile-time configuration.
//!
//! Bare-metal: there is no environment to read at runtime, so every tunable
//! lives here as a constant instead of being threaded through as arguments.

/// Start of the bootloader's own flash region.
pub const BOOTLOADER_START: u32 = 0x0800_0000;

/// Start of the installed application image. Sector 4 on the target part.
pub const APP_START: u32 = 0x0801_0000;

/// Largest application image this bootloader will install or validate.
pub const APP_MAX_SIZE: u32 = 65_535;

/// Base address of the two-word image descriptor (length, crc32). Sector 5.
pub const METADATA_BASE: u32 = 0x0802_0000;

/// Sentinel value meaning "no image installed" when read from the length word.
pub const NO_IMAGE_LENGTH: u32 = 0xFFFF_FFFF;

/// Default USART baud rate for the update link.
pub const DEFAULT_BAUD_RATE: u32 = 256_000;

/// Coarse spin-wait bound used for clock-ready / PLL-lock / POST checks.
pub const SPIN_TIMEOUT: u32 = 0x5000;

/// SYSCLK (and APB2, left undivided) produced by the bootloader's PLL
/// bring-up: 8 MHz HSE, `/8 * 336 / 4` = 84 MHz. Used both for the SysTick
/// delay's tick rate and the USART baud-rate divisor.
pub const SYSCLK_HZ: u32 = 84_000_000;

pub mod frame {
    //! Packet frame byte-layout constants (see the `protocol` module).

    pub const HEADER: [u8; 2] = [0xAA, 0x55];
    pub const FOOTER: [u8; 2] = [0xBB, 0x66];

    /// Header + opcode + request + len + crc(4) + footer, zero payload bytes.
    pub const MIN_FRAME_LEN: usize = 10;
    /// `MIN_FRAME_LEN` plus a full 255-byte payload.
    pub const MAX_FRAME_LEN: usize = 266;
    pub const MAX_PAYLOAD_LEN: usize = 255;
}

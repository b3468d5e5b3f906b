//! Packet-framed serial update bootloader core for a Cortex-M4F STM32F4-class
//! microcontroller.
//!
//! This crate is the protocol engine, flash programmer, and boot-selection
//! logic described by its design document, not a full board-support package:
//! it owns the USART framing, the FLASH/CRC peripherals, the mode-select
//! pin, and the jump into the installed application, and nothing else.
//!
//! Built `no_std` for the target; built with `std` under `cargo test` (see
//! `#![cfg_attr]` below) so the protocol codec, session state machine, and
//! boot decision logic run as ordinary host tests against the `#[cfg(test)]`
//! fakes in `flash`, `crc`, `serial`, `gpio`, and `post`.
#![cfg_attr(all(target_os = "none", not(test)), no_std)]

pub mod boot;
pub mod config;
pub mod crc;
pub mod flash;
pub mod gpio;
pub mod post;
pub mod protocol;
pub mod rcc;
pub mod serial;
pub mod session;
pub mod systick;

#[cfg(feature = "device")]
pub mod device;

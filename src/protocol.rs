//! Packet framing, validation and emission.
//!
//! ```text
//! [H1=0xAA][H2=0x55][OP][REQ][PAYLOAD_LEN][PAYLOAD ...][CRC_HI..CRC_LO][F1=0xBB][F2=0x66]
//! ```
//!
//! This module owns frame validation exclusively; nothing outside it peeks
//! at header/footer/CRC bytes directly. It has no hardware dependency (the
//! CRC is computed through the `Crc32` trait, satisfied both by the real
//! peripheral in [`crate::crc`] and by the software model used in tests), so
//! it is exercised entirely by host-side unit tests.

use crate::config::frame::{FOOTER, HEADER, MAX_FRAME_LEN, MAX_PAYLOAD_LEN, MIN_FRAME_LEN};

/// Anything that can fold a byte stream into a CRC32 the way the CRC engine
/// does: reset, feed every byte, read back the running register.
pub trait Crc32 {
    fn crc32_bytes(&mut self, data: &[u8]) -> u32;
}

/// Command opcode. `TryFrom<u8>` makes the dispatch table in [`crate::session`]
/// exhaustiveness-checked instead of matching on a bare `u8`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    ConnectDevice = 0xA0,
    DisconnectDevice = 0xA1,
    FetchInfo = 0xA2,
    WriteFirmware = 0xA3,
    ReadFirmware = 0xA4,
    EraseFirmware = 0xA5,
    RebootMcu = 0xA6,
    WriteComplete = 0xA7,
}

impl core::convert::TryFrom<u8> for Opcode {
    type Error = ();

    fn try_from(byte: u8) -> Result<Self, ()> {
        Ok(match byte {
            0xA0 => Opcode::ConnectDevice,
            0xA1 => Opcode::DisconnectDevice,
            0xA2 => Opcode::FetchInfo,
            0xA3 => Opcode::WriteFirmware,
            0xA4 => Opcode::ReadFirmware,
            0xA5 => Opcode::EraseFirmware,
            0xA6 => Opcode::RebootMcu,
            0xA7 => Opcode::WriteComplete,
            _ => return Err(()),
        })
    }
}

/// Request byte carried by a frame: `0x01` on commands, `0x02` on replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestKind {
    Req = 0x01,
    Ack = 0x02,
}

/// Why `Frame::validate` rejected a buffer. Only used internally for tests
/// and logging — every variant is a silent drop on the wire (see the crate's
/// error handling notes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    BadLength,
    BadHeader,
    BadFooter,
    CrcMismatch,
    UnknownOpcode,
    LengthInconsistent,
}

/// A frame that has passed every check in `Frame::validate`.
pub struct ValidatedFrame<'a> {
    pub opcode: Opcode,
    pub request_raw: u8,
    pub payload: &'a [u8],
}

pub struct Frame;

impl Frame {
    /// Validate a received buffer of `buf.len()` bytes per the frame layout
    /// above, in the order: length, header, footer, CRC, then opcode.
    pub fn validate<'a>(
        buf: &'a [u8],
        crc: &mut dyn Crc32,
    ) -> Result<ValidatedFrame<'a>, FrameError> {
        let n = buf.len();
        if n < MIN_FRAME_LEN || n > MAX_FRAME_LEN {
            return Err(FrameError::BadLength);
        }
        if buf[0] != HEADER[0] || buf[1] != HEADER[1] {
            return Err(FrameError::BadHeader);
        }
        if buf[n - 2] != FOOTER[0] || buf[n - 1] != FOOTER[1] {
            return Err(FrameError::BadFooter);
        }

        // Data covered by the CRC is opcode+request+payload_len+payload,
        // i.e. everything between the header and the CRC trailer.
        let data = &buf[2..n - 6];
        let crc_bytes = &buf[n - 6..n - 2];
        let received_crc = u32::from_be_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        let computed_crc = crc.crc32_bytes(data);
        if received_crc != computed_crc {
            return Err(FrameError::CrcMismatch);
        }

        let opcode_byte = data[0];
        let request_raw = data[1];
        let payload_len = data[2] as usize;
        if 5 + payload_len + 4 + 2 != n {
            return Err(FrameError::LengthInconsistent);
        }
        let payload = &buf[5..5 + payload_len];

        let opcode = core::convert::TryFrom::try_from(opcode_byte).map_err(|_| FrameError::UnknownOpcode)?;

        Ok(ValidatedFrame {
            opcode,
            request_raw,
            payload,
        })
    }

    /// Emit a response frame into `out`, returning the number of bytes
    /// written. `out` must be at least `payload.len() + 11` bytes long.
    pub fn emit(
        opcode: Opcode,
        request: RequestKind,
        payload: &[u8],
        crc: &mut dyn Crc32,
        out: &mut [u8],
    ) -> usize {
        debug_assert!(payload.len() <= MAX_PAYLOAD_LEN);
        let total = payload.len() + 11;
        debug_assert!(out.len() >= total);

        out[0] = HEADER[0];
        out[1] = HEADER[1];
        out[2] = opcode as u8;
        out[3] = request as u8;
        out[4] = payload.len() as u8;
        out[5..5 + payload.len()].copy_from_slice(payload);

        let computed_crc = crc.crc32_bytes(&out[2..5 + payload.len()]);
        let crc_bytes = computed_crc.to_be_bytes();
        let crc_at = 5 + payload.len();
        out[crc_at..crc_at + 4].copy_from_slice(&crc_bytes);
        out[crc_at + 4] = FOOTER[0];
        out[crc_at + 5] = FOOTER[1];

        total
    }
}

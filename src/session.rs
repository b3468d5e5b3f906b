//! Update session: the protocol state machine and command dispatcher.
//!
//! `UpdateSession` is the crate's single piece of mutable protocol state —
//! no module-level statics — created once by the top-level entry point and
//! threaded through every handler as `&mut UpdateSession`. `Device` bundles
//! the Flash Store and CRC Engine singletons a handler needs; it is generic
//! over both so the same dispatch table runs against the real peripherals or
//! the host-side fakes without a hardware feature flag in sight.

use crate::config::{APP_MAX_SIZE, APP_START, METADATA_BASE, NO_IMAGE_LENGTH};
use crate::flash::{FlashDevice, Sector};
use crate::protocol::{Crc32, Frame, Opcode, RequestKind};
use crate::serial::SerialLink;

/// Fixed identity payload returned by `Connect_Device`.
pub const DEVICE_IDENTITY: &[u8] = b"STM32F4-SERIAL-BOOT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    WaitConnect,
    Connected,
}

/// The next flash address `Write_Firmware` will program at. Monotonic for
/// the life of a session; `reset` is the only way to move it backwards, and
/// only `Connect_Device`/`Erase_Firmware` call it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCursor(u32);

impl WriteCursor {
    pub fn new() -> Self {
        WriteCursor(APP_START)
    }

    pub fn reset(&mut self) {
        self.0 = APP_START;
    }

    pub fn address(&self) -> u32 {
        self.0
    }

    /// Advance by `len` bytes, clamped so the cursor never runs past the end
    /// of the application region.
    fn advance(&mut self, len: u32) {
        let max = APP_START + APP_MAX_SIZE;
        self.0 = (self.0.saturating_add(len)).min(max);
    }
}

pub struct UpdateSession {
    pub state: SessionState,
    pub cursor: WriteCursor,
    reboot_requested: bool,
}

impl UpdateSession {
    pub fn new() -> Self {
        UpdateSession {
            state: SessionState::WaitConnect,
            cursor: WriteCursor::new(),
            reboot_requested: false,
        }
    }
}

pub struct Device<F, C> {
    pub flash: F,
    pub crc: C,
}

type Handler<F, C> = fn(&mut UpdateSession, &mut Device<F, C>, &[u8], &mut [u8]) -> usize;

fn dispatch_table<F: FlashDevice, C: Crc32>() -> [(Opcode, Handler<F, C>); 8] {
    [
        (Opcode::ConnectDevice, handle_connect),
        (Opcode::DisconnectDevice, handle_disconnect),
        (Opcode::FetchInfo, handle_fetch_info),
        (Opcode::WriteFirmware, handle_write_firmware),
        (Opcode::ReadFirmware, handle_read_firmware),
        (Opcode::EraseFirmware, handle_erase_firmware),
        (Opcode::RebootMcu, handle_reboot_mcu),
        (Opcode::WriteComplete, handle_write_complete),
    ]
}

fn reply<C: Crc32>(crc: &mut C, opcode: Opcode, payload: &[u8], out: &mut [u8]) -> usize {
    Frame::emit(opcode, RequestKind::Ack, payload, crc, out)
}

fn handle_connect<F: FlashDevice, C: Crc32>(
    session: &mut UpdateSession,
    device: &mut Device<F, C>,
    _payload: &[u8],
    out: &mut [u8],
) -> usize {
    session.state = SessionState::Connected;
    session.cursor.reset();
    reply(&mut device.crc, Opcode::ConnectDevice, DEVICE_IDENTITY, out)
}

fn handle_disconnect<F: FlashDevice, C: Crc32>(
    session: &mut UpdateSession,
    device: &mut Device<F, C>,
    _payload: &[u8],
    out: &mut [u8],
) -> usize {
    if session.state != SessionState::Connected {
        return 0;
    }
    session.state = SessionState::WaitConnect;
    reply(&mut device.crc, Opcode::DisconnectDevice, &[], out)
}

fn handle_fetch_info<F: FlashDevice, C: Crc32>(
    session: &mut UpdateSession,
    device: &mut Device<F, C>,
    _payload: &[u8],
    out: &mut [u8],
) -> usize {
    if session.state != SessionState::Connected {
        return 0;
    }
    let descriptor = ImageDescriptor::read(&device.flash);
    let mut payload = [0u8; 8];
    if descriptor.is_valid() {
        payload[0..4].copy_from_slice(&descriptor.length_bytes.to_be_bytes());
        payload[4..8].copy_from_slice(&descriptor.expected_crc32.to_be_bytes());
    }
    reply(&mut device.crc, Opcode::FetchInfo, &payload, out)
}

fn handle_write_firmware<F: FlashDevice, C: Crc32>(
    session: &mut UpdateSession,
    device: &mut Device<F, C>,
    payload: &[u8],
    out: &mut [u8],
) -> usize {
    if session.state != SessionState::Connected {
        return 0;
    }
    // Flash errors here are not surfaced to the client; integrity is only
    // verified later, at `Write_Complete` + reboot.
    let _ = device.flash.program_bytes(session.cursor.address(), payload);
    session.cursor.advance(payload.len() as u32);
    reply(&mut device.crc, Opcode::WriteFirmware, &[], out)
}

fn handle_read_firmware<F: FlashDevice, C: Crc32>(
    session: &mut UpdateSession,
    device: &mut Device<F, C>,
    _payload: &[u8],
    out: &mut [u8],
) -> usize {
    if session.state != SessionState::Connected {
        return 0;
    }
    let data = device.flash.read_slice(session.cursor.address(), crate::config::frame::MAX_PAYLOAD_LEN);
    reply(&mut device.crc, Opcode::ReadFirmware, data, out)
}

fn handle_erase_firmware<F: FlashDevice, C: Crc32>(
    session: &mut UpdateSession,
    device: &mut Device<F, C>,
    _payload: &[u8],
    out: &mut [u8],
) -> usize {
    if session.state != SessionState::Connected {
        return 0;
    }
    let _ = device.flash.erase_sector(Sector::S4);
    let _ = device.flash.erase_sector(Sector::S5);
    session.cursor.reset();
    reply(&mut device.crc, Opcode::EraseFirmware, &[], out)
}

fn handle_reboot_mcu<F: FlashDevice, C: Crc32>(
    session: &mut UpdateSession,
    device: &mut Device<F, C>,
    _payload: &[u8],
    out: &mut [u8],
) -> usize {
    if session.state != SessionState::Connected {
        return 0;
    }
    session.reboot_requested = true;
    reply(&mut device.crc, Opcode::RebootMcu, &[], out)
}

fn handle_write_complete<F: FlashDevice, C: Crc32>(
    session: &mut UpdateSession,
    device: &mut Device<F, C>,
    payload: &[u8],
    out: &mut [u8],
) -> usize {
    if session.state != SessionState::Connected {
        return 0;
    }
    if payload.len() == 8 {
        let _ = device.flash.program_bytes(METADATA_BASE, payload);
    }
    reply(&mut device.crc, Opcode::WriteComplete, &[], out)
}

/// The image descriptor read back from the metadata sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub length_bytes: u32,
    pub expected_crc32: u32,
}

impl ImageDescriptor {
    pub fn read<F: FlashDevice>(flash: &F) -> Self {
        // Metadata words are stored big-endian on flash; the target is
        // little-endian, so a native word read needs a byte-swap.
        let length_bytes = flash.read_word(METADATA_BASE).swap_bytes();
        let expected_crc32 = flash.read_word(METADATA_BASE + 4).swap_bytes();
        ImageDescriptor {
            length_bytes,
            expected_crc32,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.length_bytes != NO_IMAGE_LENGTH && self.length_bytes <= APP_MAX_SIZE
    }
}

/// The §4.4 main loop: receive a frame, validate it, dispatch-or-drop, zero
/// the scratch buffer after every handler. Runs until `Reboot_MCU` is
/// accepted, at which point the caller is responsible for actually
/// resetting the MCU (this function only signals that it should).
pub fn run_session<S: SerialLink, F: FlashDevice, C: Crc32>(
    serial: &mut S,
    device: &mut Device<F, C>,
) {
    let mut session = UpdateSession::new();
    let mut scratch = [0u8; crate::config::frame::MAX_FRAME_LEN];
    let mut out = [0u8; crate::config::frame::MAX_FRAME_LEN];
    let table = dispatch_table::<F, C>();

    loop {
        let n = serial.receive_frame(&mut scratch);
        let n = match n {
            Some(n) => n,
            None => continue,
        };

        let validated = match Frame::validate(&scratch[..n], &mut device.crc) {
            Ok(v) => v,
            Err(_e) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("session: dropped frame ({})", defmt::Debug2Format(&_e));
                for b in scratch.iter_mut() {
                    *b = 0;
                }
                continue;
            }
        };

        let opcode = validated.opcode;
        let payload_len = validated.payload.len();
        let mut payload_buf = [0u8; crate::config::frame::MAX_PAYLOAD_LEN];
        payload_buf[..payload_len].copy_from_slice(validated.payload);

        let reply_len = table
            .iter()
            .find(|(op, _)| *op == opcode)
            .map(|(_, handler)| handler(&mut session, device, &payload_buf[..payload_len], &mut out))
            .unwrap_or(0);

        #[cfg(feature = "defmt")]
        defmt::info!("session: {} -> {} reply bytes", opcode, reply_len);

        if reply_len > 0 {
            serial.send_frame(&out[..reply_len]);
        }

        for b in scratch.iter_mut() {
            *b = 0;
        }
        for b in out.iter_mut() {
            *b = 0;
        }

        if session.reboot_requested {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::software::crc32_bytes as sw_crc32;
    use crate::flash::fake::FakeFlash;
    use crate::protocol::RequestKind;
    use std::collections::VecDeque;

    struct SoftwareCrc;
    impl Crc32 for SoftwareCrc {
        fn crc32_bytes(&mut self, data: &[u8]) -> u32 {
            sw_crc32(data)
        }
    }

    struct FakeSerial {
        incoming: VecDeque<Vec<u8>>,
        pub outgoing: Vec<Vec<u8>>,
    }

    impl FakeSerial {
        fn new(frames: Vec<Vec<u8>>) -> Self {
            FakeSerial {
                incoming: frames.into(),
                outgoing: Vec::new(),
            }
        }
    }

    impl SerialLink for FakeSerial {
        fn receive_frame(&mut self, buf: &mut [u8]) -> Option<usize> {
            let frame = self.incoming.pop_front()?;
            buf[..frame.len()].copy_from_slice(&frame);
            Some(frame.len())
        }

        fn send_frame(&mut self, data: &[u8]) {
            self.outgoing.push(data.to_vec());
        }
    }

    fn new_device() -> Device<FakeFlash, SoftwareCrc> {
        Device {
            flash: FakeFlash::new(0x0801_0000, 0x0803_0000 - 0x0801_0000),
            crc: SoftwareCrc,
        }
    }

    fn build_frame(opcode: Opcode, payload: &[u8]) -> Vec<u8> {
        let mut crc = SoftwareCrc;
        let mut buf = [0u8; crate::config::frame::MAX_FRAME_LEN];
        let n = Frame::emit(opcode, RequestKind::Req, payload, &mut crc, &mut buf);
        buf[..n].to_vec()
    }

    #[test]
    fn unconnected_commands_have_no_observable_effect() {
        let mut device = new_device();
        let frames = vec![
            build_frame(Opcode::WriteFirmware, &[0xDE]),
            build_frame(Opcode::ReadFirmware, &[]),
            build_frame(Opcode::EraseFirmware, &[]),
            build_frame(Opcode::WriteComplete, &[0, 0, 0, 4, 0, 0, 0, 0]),
            build_frame(Opcode::FetchInfo, &[]),
            build_frame(Opcode::RebootMcu, &[]),
        ];
        let mut serial = FakeSerial::new(frames);
        run_session(&mut serial, &mut device);
        assert!(serial.outgoing.is_empty());
    }

    #[test]
    fn connect_then_erase_then_write_then_read_back() {
        let mut device = new_device();
        let frames = vec![
            build_frame(Opcode::ConnectDevice, &[]),
            build_frame(Opcode::EraseFirmware, &[]),
            build_frame(Opcode::WriteFirmware, &[0xDE]),
            build_frame(Opcode::ReadFirmware, &[]),
            build_frame(Opcode::RebootMcu, &[]),
        ];
        let mut serial = FakeSerial::new(frames);
        run_session(&mut serial, &mut device);

        assert_eq!(serial.outgoing.len(), 5);
        let mut crc = SoftwareCrc;
        let read_reply = Frame::validate(&serial.outgoing[3], &mut crc).unwrap();
        assert_eq!(read_reply.payload[0], 0xDE);
    }

    #[test]
    fn cursor_is_monotonic_across_writes() {
        let mut device = new_device();
        let frames = vec![
            build_frame(Opcode::ConnectDevice, &[]),
            build_frame(Opcode::EraseFirmware, &[]),
            build_frame(Opcode::WriteFirmware, &[1, 2, 3, 4]),
            build_frame(Opcode::WriteFirmware, &[5, 6]),
            build_frame(Opcode::RebootMcu, &[]),
        ];
        let mut serial = FakeSerial::new(frames);

        let mut session = UpdateSession::new();
        let table = dispatch_table::<FakeFlash, SoftwareCrc>();
        let mut out = [0u8; crate::config::frame::MAX_FRAME_LEN];
        let mut cursors = Vec::new();
        loop {
            let mut scratch = [0u8; crate::config::frame::MAX_FRAME_LEN];
            let n = match serial.receive_frame(&mut scratch) {
                Some(n) => n,
                None => break,
            };
            let validated = Frame::validate(&scratch[..n], &mut device.crc).unwrap();
            if let Some((_, handler)) = table.iter().find(|(op, _)| *op == validated.opcode) {
                handler(&mut session, &mut device, validated.payload, &mut out);
            }
            cursors.push(session.cursor.address());
        }
        for pair in cursors.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn commit_then_fetch_info_round_trips_descriptor() {
        let mut device = new_device();
        let image = b"DEADBEEF";
        let image_crc = sw_crc32(image);
        let mut descriptor_payload = [0u8; 8];
        descriptor_payload[0..4].copy_from_slice(&4u32.to_be_bytes());
        descriptor_payload[4..8].copy_from_slice(&image_crc.to_be_bytes());

        let frames = vec![
            build_frame(Opcode::ConnectDevice, &[]),
            build_frame(Opcode::EraseFirmware, &[]),
            build_frame(Opcode::WriteFirmware, image),
            build_frame(Opcode::WriteComplete, &descriptor_payload),
            build_frame(Opcode::FetchInfo, &[]),
            build_frame(Opcode::RebootMcu, &[]),
        ];
        let mut serial = FakeSerial::new(frames);
        run_session(&mut serial, &mut device);

        let mut crc = SoftwareCrc;
        let fetch_reply = Frame::validate(&serial.outgoing[4], &mut crc).unwrap();
        assert_eq!(&fetch_reply.payload[0..4], &4u32.to_be_bytes());
        assert_eq!(&fetch_reply.payload[4..8], &image_crc.to_be_bytes());
    }
}

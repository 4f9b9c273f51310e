//! Framing used on the serial link between the board and the relay station.
//!
//! Every frame on the wire looks like:
//!
//! ```text
//! [0xAA][0x55][LEN][PAYLOAD: LEN bytes][CRC16_H][CRC16_L]
//! ```
//!
//! `LEN` is between 1 and [`MAX_PAYLOAD`]. The CRC is CRC16-CCITT (poly `0x1021`, init `0xFFFF`, MSB first)
//! computed over `LEN` followed by the payload. The codec knows nothing about what the payload means.

use crate::error::{LinkError, LinkResult};

/// First synchronisation byte.
pub const SYNC1: u8 = 0xAA;
/// Second synchronisation byte.
pub const SYNC2: u8 = 0x55;
/// Largest payload a frame may carry.
pub const MAX_PAYLOAD: usize = 250;
/// Sync bytes, length byte and two CRC bytes.
pub const FRAME_OVERHEAD: usize = 5;
/// Largest possible encoded frame.
pub const MAX_FRAME: usize = MAX_PAYLOAD + FRAME_OVERHEAD;

/// CRC16-CCITT (`0x1021`, initial value `0xFFFF`, no reflection, no final xor).
pub fn crc16_ccitt(bytes: &[u8]) -> u16 {
    crc16_ccitt_update(0xFFFF, bytes)
}

fn crc16_ccitt_update(mut crc: u16, bytes: &[u8]) -> u16 {
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// CRC over the length byte followed by the payload, as carried in the frame trailer.
fn frame_crc(payload: &[u8]) -> u16 {
    crc16_ccitt_update(crc16_ccitt(&[payload.len() as u8]), payload)
}

/// Observable link counters. They are never reset automatically.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub frames_received: u32,
    pub crc_errors: u32,
    pub sync_errors: u32,
}

/// Receive state of the [`FrameDecoder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    WaitSync1,
    WaitSync2,
    ReadLen,
    ReadPayload,
    ReadCrcHigh,
    ReadCrcLow,
    FrameReady,
}

/// Byte-at-a-time frame decoder.
///
/// Not reentrant: a decoder belongs to the single loop that pumps the serial link.
pub struct FrameDecoder {
    state: RxState,
    len: u8,
    payload: heapless::Vec<u8, MAX_PAYLOAD>,
    crc: u16,
    stats: LinkStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub const fn new() -> Self {
        Self {
            state: RxState::WaitSync1,
            len: 0,
            payload: heapless::Vec::new(),
            crc: 0,
            stats: LinkStats {
                frames_received: 0,
                crc_errors: 0,
                sync_errors: 0,
            },
        }
    }

    /// Feed one byte. Returns `true` once a complete frame has passed its CRC check.
    ///
    /// The payload then stays available through [`Self::payload`] until [`Self::reset`] is called.
    /// Feeding another byte without resetting discards the ready frame and processes the byte from scratch.
    pub fn process_byte(&mut self, byte: u8) -> bool {
        match self.state {
            RxState::WaitSync1 => {
                if byte == SYNC1 {
                    self.state = RxState::WaitSync2;
                } else {
                    self.stats.sync_errors += 1;
                }
            }
            RxState::WaitSync2 => {
                if byte == SYNC2 {
                    self.state = RxState::ReadLen;
                } else {
                    self.stats.sync_errors += 1;
                    // A repeated SYNC1 may be the real start of a frame.
                    self.state = if byte == SYNC1 {
                        RxState::WaitSync2
                    } else {
                        RxState::WaitSync1
                    };
                }
            }
            RxState::ReadLen => {
                if byte == 0 || byte as usize > MAX_PAYLOAD {
                    self.stats.sync_errors += 1;
                    self.reset();
                } else {
                    self.len = byte;
                    self.payload.clear();
                    self.state = RxState::ReadPayload;
                }
            }
            RxState::ReadPayload => {
                // Cannot overflow, `len` was bounded by MAX_PAYLOAD above.
                let _ = self.payload.push(byte);
                if self.payload.len() >= self.len as usize {
                    self.state = RxState::ReadCrcHigh;
                }
            }
            RxState::ReadCrcHigh => {
                self.crc = (byte as u16) << 8;
                self.state = RxState::ReadCrcLow;
            }
            RxState::ReadCrcLow => {
                self.crc |= byte as u16;
                if self.crc == frame_crc(&self.payload) {
                    self.stats.frames_received += 1;
                    self.state = RxState::FrameReady;
                    return true;
                }
                self.stats.crc_errors += 1;
                self.reset();
            }
            RxState::FrameReady => {
                self.reset();
                return self.process_byte(byte);
            }
        }
        false
    }

    /// Return the decoder to [`RxState::WaitSync1`], dropping any partial or ready frame.
    pub fn reset(&mut self) {
        self.state = RxState::WaitSync1;
        self.len = 0;
        self.payload.clear();
        self.crc = 0;
    }

    /// Payload of the ready frame. Empty unless [`Self::is_ready`].
    pub fn payload(&self) -> &[u8] {
        if self.is_ready() {
            self.payload.as_slice()
        } else {
            &[]
        }
    }

    /// Length byte of the ready frame, `0` when no frame is ready.
    pub fn payload_len(&self) -> u8 {
        if self.is_ready() { self.len } else { 0 }
    }

    pub fn is_ready(&self) -> bool {
        self.state == RxState::FrameReady
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }
}

/// Build the on-wire bytes for `payload`.
pub fn encode_frame<I: embedded_io::Error>(
    payload: &[u8],
) -> LinkResult<heapless::Vec<u8, MAX_FRAME>, I> {
    if payload.is_empty() {
        return Err(LinkError::EmptyPayload);
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(LinkError::PayloadTooLarge(payload.len()));
    }

    let crc = frame_crc(payload);
    let mut frame: heapless::Vec<u8, MAX_FRAME> = heapless::Vec::new();
    // Capacity is MAX_PAYLOAD + overhead, none of these pushes can fail.
    let _ = frame.extend_from_slice(&[SYNC1, SYNC2, payload.len() as u8]);
    let _ = frame.extend_from_slice(payload);
    let _ = frame.extend_from_slice(&crc.to_be_bytes());
    Ok(frame)
}

/// Encode `payload` and hand the whole frame to `writer`.
///
/// The local serial link is assumed reliable, there is no partial-send recovery.
pub fn send_frame<W: embedded_io::Write>(
    payload: &[u8],
    writer: &mut W,
) -> LinkResult<(), W::Error> {
    let frame = encode_frame::<W::Error>(payload)?;
    writer.write_all(&frame).map_err(LinkError::Serial)?;
    Ok(())
}

//! Zephyr HxM Protocol
//!
//! This module contains the frame layout of the HxM heart-rate monitor and
//! the decoder that turns one raw buffer into a [`HeartRateFrame`].

use thiserror::Error;
use tracing::debug;

/// Start of text, first byte of every frame
pub const STX: u8 = 0x02;

/// Message id of the periodic HxM data packet
pub const MSG_ID: u8 = 0x26;

/// Declared payload length (DLC)
pub const DLC: u8 = 55;

/// End of text, last byte of every frame
pub const ETX: u8 = 0x03;

/// Size of one frame on the wire
pub const FRAME_LEN: usize = 60;

/// Number of rolling heart beat timestamps carried by a frame
pub const BEAT_TIMESTAMPS: usize = 15;

/// Why a decoded frame cannot be trusted as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameIssue {
    #[error("buffer ended after {consumed} of 60 bytes")]
    DecodeIncomplete { consumed: usize },
    #[error("end byte {end_byte:#04x} does not match ETX")]
    FrameMalformed { end_byte: u8 },
}

/// One decoded HxM data packet
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeartRateFrame {
    pub start_byte: u8,
    pub message_id: u8,
    pub data_length: u8,
    pub firmware_id: u16,
    pub firmware_version: u16,
    pub hardware_id: u16,
    pub hardware_version: u16,
    pub battery_percent: u8,
    pub heart_rate_bpm: u8,
    pub heart_beat_number: u8,

    /// Rolling 1/1024 s timer values of the last 15 beats
    pub beat_timestamps: [u16; BEAT_TIMESTAMPS],
    pub reserved_fields: [u16; 3],

    /// Distance in 1/16 m
    pub distance_m16: u16,
    /// Speed in 1/256 m/s
    pub speed_mps256: u16,
    pub strides: u8,
    pub reserved4: u8,
    pub reserved5: u16,
    pub checksum: u8,
    pub end_byte: u8,

    // Decode diagnostics
    pub bytes_consumed: usize,
    pub well_formed: bool,
}

impl HeartRateFrame {
    /// Distance covered in metres
    pub fn distance_m(&self) -> f64 {
        self.distance_m16 as f64 / 16.0
    }

    /// Instantaneous speed in metres per second
    pub fn speed_mps(&self) -> f64 {
        self.speed_mps256 as f64 / 256.0
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_consumed == FRAME_LEN
    }

    /// The reason this frame is not well formed, if any
    pub fn issue(&self) -> Option<FrameIssue> {
        if !self.is_complete() {
            Some(FrameIssue::DecodeIncomplete {
                consumed: self.bytes_consumed,
            })
        } else if self.end_byte != ETX {
            Some(FrameIssue::FrameMalformed {
                end_byte: self.end_byte,
            })
        } else {
            None
        }
    }

    /// Log every field at debug level
    pub fn dump(&self) {
        debug!(
            stx = self.start_byte,
            msg_id = self.message_id,
            dlc = self.data_length,
            firmware_id = self.firmware_id,
            firmware_version = self.firmware_version,
            hardware_id = self.hardware_id,
            hardware_version = self.hardware_version,
            "HxM frame header"
        );
        debug!(
            battery = self.battery_percent,
            heart_rate = self.heart_rate_bpm,
            heart_beat_number = self.heart_beat_number,
            beat_timestamps = ?self.beat_timestamps,
            reserved = ?self.reserved_fields,
            "HxM frame heart data"
        );
        debug!(
            distance = self.distance_m16,
            speed = self.speed_mps256,
            strides = self.strides,
            reserved4 = self.reserved4,
            reserved5 = self.reserved5,
            crc = self.checksum,
            etx = self.end_byte,
            consumed = self.bytes_consumed,
            well_formed = self.well_formed,
            "HxM frame trailer"
        );
    }
}

/// Cursor over an untrusted buffer. Every read reports `None` once the
/// buffer is exhausted and leaves the position at the last complete field.
struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn u8(&mut self) -> Option<u8> {
        let b = *self.bytes.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn u16_le(&mut self) -> Option<u16> {
        let pair = self.bytes.get(self.pos..self.pos + 2)?;
        self.pos += 2;
        Some(u16::from_le_bytes([pair[0], pair[1]]))
    }
}

/// Decode one frame. Never fails: a short buffer yields a partially
/// populated frame with `well_formed == false`.
///
/// # Frame Structure (60 bytes)
///
/// ```text
/// [0]     : STX (0x02)
/// [1]     : Message id (0x26)
/// [2]     : DLC (55)
/// [3-4]   : Firmware id (u16 little-endian)
/// [5-6]   : Firmware version
/// [7-8]   : Hardware id
/// [9-10]  : Hardware version
/// [11]    : Battery charge (%)
/// [12]    : Heart rate (bpm)
/// [13]    : Heart beat number
/// [14-43] : 15 heart beat timestamps (u16 little-endian each)
/// [44-49] : Reserved 1..3
/// [50-51] : Distance (1/16 m)
/// [52-53] : Speed (1/256 m/s)
/// [54]    : Strides
/// [55]    : Reserved 4
/// [56-57] : Reserved 5
/// [58]    : CRC
/// [59]    : ETX (0x03)
/// ```
pub fn decode(buffer: &[u8]) -> HeartRateFrame {
    let mut frame = HeartRateFrame::default();
    let mut cursor = Cursor::new(buffer);

    // None means the buffer ran out; what was read so far stays in place
    let _ = decode_fields(&mut cursor, &mut frame);

    frame.bytes_consumed = cursor.pos;
    frame.well_formed = frame.is_complete() && frame.end_byte == ETX;
    frame
}

fn decode_fields(c: &mut Cursor<'_>, f: &mut HeartRateFrame) -> Option<()> {
    f.start_byte = c.u8()?;
    f.message_id = c.u8()?;
    f.data_length = c.u8()?;
    f.firmware_id = c.u16_le()?;
    f.firmware_version = c.u16_le()?;
    f.hardware_id = c.u16_le()?;
    f.hardware_version = c.u16_le()?;
    f.battery_percent = c.u8()?;
    f.heart_rate_bpm = c.u8()?;
    f.heart_beat_number = c.u8()?;
    for slot in f.beat_timestamps.iter_mut() {
        *slot = c.u16_le()?;
    }
    for slot in f.reserved_fields.iter_mut() {
        *slot = c.u16_le()?;
    }
    f.distance_m16 = c.u16_le()?;
    f.speed_mps256 = c.u16_le()?;
    f.strides = c.u8()?;
    f.reserved4 = c.u8()?;
    f.reserved5 = c.u16_le()?;
    f.checksum = c.u8()?;
    f.end_byte = c.u8()?;
    Some(())
}

/// Lay a frame out on the wire. Diagnostics fields are not encoded.
pub fn encode(frame: &HeartRateFrame) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    let mut pos = 0;
    let mut put = |bytes: &[u8]| {
        out[pos..pos + bytes.len()].copy_from_slice(bytes);
        pos += bytes.len();
    };

    put(&[frame.start_byte, frame.message_id, frame.data_length]);
    put(&frame.firmware_id.to_le_bytes());
    put(&frame.firmware_version.to_le_bytes());
    put(&frame.hardware_id.to_le_bytes());
    put(&frame.hardware_version.to_le_bytes());
    put(&[
        frame.battery_percent,
        frame.heart_rate_bpm,
        frame.heart_beat_number,
    ]);
    for ts in frame.beat_timestamps {
        put(&ts.to_le_bytes());
    }
    for r in frame.reserved_fields {
        put(&r.to_le_bytes());
    }
    put(&frame.distance_m16.to_le_bytes());
    put(&frame.speed_mps256.to_le_bytes());
    put(&[frame.strides, frame.reserved4]);
    put(&frame.reserved5.to_le_bytes());
    put(&[frame.checksum, frame.end_byte]);

    out
}

#[cfg(test)]
pub(crate) fn sample_frame() -> HeartRateFrame {
    let mut beat_timestamps = [0u16; BEAT_TIMESTAMPS];
    for (i, ts) in beat_timestamps.iter_mut().enumerate() {
        *ts = 0xF000u16.wrapping_add(i as u16 * 850);
    }
    HeartRateFrame {
        start_byte: STX,
        message_id: MSG_ID,
        data_length: DLC,
        firmware_id: 0x1A2B,
        firmware_version: 0x0041,
        hardware_id: 0x2A00,
        hardware_version: 0x00AB,
        battery_percent: 87,
        heart_rate_bpm: 142,
        heart_beat_number: 201,
        beat_timestamps,
        reserved_fields: [0x0001, 0x8000, 0xFFFF],
        distance_m16: 4095,
        speed_mps256: 0x0380,
        strides: 128,
        reserved4: 0xEE,
        reserved5: 0xBEEF,
        checksum: 0x5A,
        end_byte: ETX,
        bytes_consumed: FRAME_LEN,
        well_formed: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_reproduces_encoded_fields() {
        let frame = sample_frame();
        let decoded = decode(&encode(&frame));
        assert_eq!(decoded, frame);
        assert!(decoded.issue().is_none());
    }

    #[test]
    fn test_field_offsets() {
        let bytes = encode(&sample_frame());
        assert_eq!(&bytes[..3], &[STX, MSG_ID, DLC]);
        assert_eq!(bytes[12], 142);
        assert_eq!(&bytes[50..52], &4095u16.to_le_bytes());
        assert_eq!(bytes[54], 128);
        assert_eq!(bytes[58], 0x5A);
        assert_eq!(bytes[59], ETX);
    }

    #[test]
    fn test_little_endian_is_zero_extended() {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[3] = 0x34;
        bytes[4] = 0x12;
        bytes[5] = 0xFF;
        bytes[6] = 0x00;
        let frame = decode(&bytes);
        assert_eq!(frame.firmware_id, 0x1234);
        assert_eq!(frame.firmware_version, 0x00FF);
    }

    #[test]
    fn test_short_buffers_never_panic() {
        let full = encode(&sample_frame());
        for len in 0..FRAME_LEN {
            let frame = decode(&full[..len]);
            assert!(!frame.well_formed);
            assert!(frame.bytes_consumed <= len);
            assert_eq!(
                frame.issue(),
                Some(FrameIssue::DecodeIncomplete {
                    consumed: frame.bytes_consumed
                })
            );
        }
    }

    #[test]
    fn test_short_buffer_keeps_leading_fields() {
        let full = encode(&sample_frame());
        // Cuts through the middle of the third beat timestamp
        let frame = decode(&full[..19]);
        assert_eq!(frame.bytes_consumed, 18);
        assert_eq!(frame.heart_rate_bpm, 142);
        assert_eq!(frame.beat_timestamps[1], sample_frame().beat_timestamps[1]);
        assert_eq!(frame.beat_timestamps[2], 0);
        assert_eq!(frame.end_byte, 0);
    }

    #[test]
    fn test_end_byte_mismatch_is_flagged() {
        let mut bytes = encode(&sample_frame());
        bytes[59] = 0x7F;
        let frame = decode(&bytes);
        assert!(!frame.well_formed);
        assert!(frame.is_complete());
        assert_eq!(frame.heart_rate_bpm, 142);
        assert_eq!(
            frame.issue(),
            Some(FrameIssue::FrameMalformed { end_byte: 0x7F })
        );
    }

    #[test]
    fn test_trailing_bytes_are_ignored() {
        let mut bytes = encode(&sample_frame()).to_vec();
        bytes.extend_from_slice(&[0xAA; 8]);
        let frame = decode(&bytes);
        assert!(frame.well_formed);
        assert_eq!(frame.bytes_consumed, FRAME_LEN);
    }

    #[test]
    fn test_unit_conversions() {
        let frame = sample_frame();
        assert_eq!(frame.distance_m(), 4095.0 / 16.0);
        assert_eq!(frame.speed_mps(), 3.5);
    }
}

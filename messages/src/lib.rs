use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Packet type byte for commander (roll/pitch/yaw/thrust) setpoints.
pub const COMMANDER_HEADER: u8 = 0x30;

/// One instantaneous reading of the pilot's control surfaces.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct ControlSample {
    pub pitch: f32,
    pub roll: f32,
    pub yaw: f32,
    pub thrust: f32,
}

impl ControlSample {
    pub fn stop() -> Self {
        Self::default()
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
pub struct CommandPacket {
    pub header: u8,
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
    pub thrust: u16,
}

impl CommandPacket {
    pub fn from_sample(sample: &ControlSample, yaw_enabled: bool) -> Self {
        Self {
            header: COMMANDER_HEADER,
            roll: sample.roll,
            pitch: sample.pitch,
            yaw: if yaw_enabled { sample.yaw } else { 0.0 },
            thrust: thrust_to_u16(sample.thrust),
        }
    }
}

/// Converts a throttle value to the wire representation.
///
/// The fractional part is discarded. Anything outside `[0, 65535]` is clamped
/// rather than wrapped, and NaN maps to zero throttle.
pub fn thrust_to_u16(thrust: f32) -> u16 {
    if thrust.is_nan() {
        return 0
    }
    thrust.clamp(0.0, u16::MAX as f32).trunc() as u16
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("expected a {expected} byte frame, got {0} bytes", expected = Frame::LEN)]
    Length(usize),
    #[error("unknown packet header {0:#04x}")]
    Header(u8),
    #[error("checksum mismatch (frame says {found:#04x}, computed {computed:#04x})")]
    Checksum { found: u8, computed: u8 },
}

/// The exact bytes put on the wire for one command packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Frame([u8; Frame::LEN]);

impl Frame {
    pub const LEN: usize = 16;
    const CHECKSUM_INDEX: usize = Self::LEN - 1;

    pub fn as_bytes(&self) -> &[u8; Frame::LEN] {
        &self.0
    }

    pub fn checksum(&self) -> u8 {
        self.0[Self::CHECKSUM_INDEX]
    }

    /// Parses and validates a received frame. Used on the vehicle side.
    pub fn decode(bytes: &[u8]) -> Result<CommandPacket, FrameError> {
        let bytes: &[u8; Frame::LEN] = bytes.try_into()
            .map_err(|_| FrameError::Length(bytes.len()))?;

        let computed = checksum(&bytes[..Self::CHECKSUM_INDEX]);
        let found = bytes[Self::CHECKSUM_INDEX];
        if found != computed {
            return Err(FrameError::Checksum { found, computed })
        }
        if bytes[0] != COMMANDER_HEADER {
            return Err(FrameError::Header(bytes[0]))
        }

        let f32_at = |i: usize| f32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Ok(CommandPacket {
            header: bytes[0],
            roll: f32_at(1),
            pitch: f32_at(5),
            yaw: f32_at(9),
            thrust: u16::from_le_bytes([bytes[13], bytes[14]]),
        })
    }
}

impl From<&CommandPacket> for Frame {
    fn from(packet: &CommandPacket) -> Self {
        let mut buf = [0u8; Frame::LEN];
        buf[0] = packet.header;
        buf[1..5].copy_from_slice(&packet.roll.to_le_bytes());
        buf[5..9].copy_from_slice(&packet.pitch.to_le_bytes());
        buf[9..13].copy_from_slice(&packet.yaw.to_le_bytes());
        buf[13..15].copy_from_slice(&packet.thrust.to_le_bytes());
        buf[Frame::CHECKSUM_INDEX] = checksum(&buf[..Frame::CHECKSUM_INDEX]);
        Frame(buf)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Sum of all bytes, truncated to 8 bits.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// Builds the wire frame for a sample. Yaw is forced to zero when the pilot
/// has yaw control switched off.
pub fn encode(sample: &ControlSample, yaw_enabled: bool) -> Frame {
    Frame::from(&CommandPacket::from_sample(sample, yaw_enabled))
}

//! RTP fixed header (RFC 3550, section 5.1)

use crate::error::SendError;

pub const RTP_VERSION: u8 = 2;

/// Size of the fixed header without CSRCs
pub const RTP_HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Header extension present (X bit)
    pub extension: bool,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Serialize into the first [`RTP_HEADER_LEN`] bytes of `out`
    pub fn write(&self, out: &mut [u8]) -> Result<usize, SendError> {
        if out.len() < RTP_HEADER_LEN {
            return Err(SendError::PrefixTooSmall(out.len()));
        }

        out[0] = (RTP_VERSION << 6) | (u8::from(self.extension) << 4);
        out[1] = (u8::from(self.marker) << 7) | (self.payload_type & 0x7f);
        out[2..4].copy_from_slice(&self.sequence.to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        Ok(RTP_HEADER_LEN)
    }

    /// Parse the fixed header; `None` if too short or not version 2
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < RTP_HEADER_LEN || buf[0] >> 6 != RTP_VERSION {
            return None;
        }

        Some(Self {
            extension: buf[0] & 0x10 != 0,
            marker: buf[1] & 0x80 != 0,
            payload_type: buf[1] & 0x7f,
            sequence: u16::from_be_bytes([buf[2], buf[3]]),
            timestamp: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

//! Codec contract and implementations
//!
//! A codec describes its fixed format ([`AudioCodec`]) and builds a stateful
//! [`Encoder`]. Encoders consume one packet interval of S16 samples per call
//! and either produce a payload or defer, reporting how many codec-rate
//! samples they accounted for without emitting anything.

pub mod packetizer;
#[cfg(feature = "opus-codec")]
pub mod encoder;

#[cfg(feature = "opus-codec")]
pub use encoder::{OpusCodec, OpusConfig, OpusEncoder};
pub use packetizer::{Delivery, EncodeOutcome, Packetizer, RtpBuffer, SendHandler};

use crate::config::SampleFormat;
use crate::error::CodecError;

/// Parameters for creating an encoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderParams {
    /// Packet interval in milliseconds
    pub ptime_ms: u32,
    /// Sample format the encoder should work in
    pub format: SampleFormat,
}

/// Result of a successful encoder call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoded {
    /// `len` payload bytes were written to the output buffer
    Packet { len: usize },
    /// Input consumed without output; `sample_delta` codec-rate samples accounted
    Deferred { sample_delta: u32 },
}

/// Stateful encoder instance
pub trait Encoder: Send {
    /// Encode interleaved samples at the codec rate and channel count
    ///
    /// The encoder may raise `marker` to request the RTP marker bit on the
    /// packet it produces.
    fn encode(&mut self, marker: &mut bool, samples: &[i16], out: &mut [u8]) -> Result<Encoded, CodecError>;
}

/// Codec description
pub trait AudioCodec: Send + Sync {
    fn name(&self) -> &str;

    /// Sample rate the encoder consumes
    fn srate(&self) -> u32;

    /// RTP clock rate
    fn clock_rate(&self) -> u32;

    /// Channel count the encoder consumes
    fn channels(&self) -> u16;

    /// Create an encoder
    fn encoder(&self, params: &EncoderParams) -> Result<Box<dyn Encoder>, CodecError>;
}

/// Codec-rate RTP frames represented by `sampc` interleaved samples at `srate`
///
/// `sampc_rtp = sampc * clock_rate / srate`, divided by the channel count.
pub fn rtp_frames(sampc: usize, srate: u32, clock_rate: u32, channels: u16) -> u32 {
    if srate == 0 || channels == 0 {
        return 0;
    }
    let sampc_rtp = sampc as u64 * clock_rate as u64 / srate as u64;
    (sampc_rtp / channels as u64) as u32
}

//! Opus encoder wrapper
//!
//! Implements the codec contract for Opus at 48 kHz with configurable
//! channel count, bitrate and loss resilience.

use opus::{Application, Channels, Encoder as RawEncoder};
use serde::{Deserialize, Serialize};

use crate::audio::convert::i16_to_f32_into;
use crate::codec::{AudioCodec, Encoded, Encoder, EncoderParams};
use crate::config::SampleFormat;
use crate::error::CodecError;

/// Opus always runs at 48 kHz on the wire
pub const OPUS_RATE: u32 = 48000;

/// Opus application mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpusApplication {
    #[default]
    Voip,
    Audio,
    LowDelay,
}

/// Opus encoder settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpusConfig {
    pub channels: u16,
    pub application: OpusApplication,
    /// Bits per second
    pub bitrate: u32,
    pub vbr: bool,
    /// Complexity 0-10
    pub complexity: u8,
    pub fec: bool,
    pub packet_loss_perc: u8,
    pub dtx: bool,
}

impl Default for OpusConfig {
    fn default() -> Self {
        Self {
            channels: 2,
            application: OpusApplication::Voip,
            bitrate: 64_000,
            vbr: true,
            complexity: 10,
            fec: false,
            packet_loss_perc: 0,
            dtx: false,
        }
    }
}

impl OpusConfig {
    /// Voice-oriented preset
    pub fn voice() -> Self {
        Self {
            channels: 1,
            bitrate: 32_000,
            fec: true,
            packet_loss_perc: 5,
            ..Default::default()
        }
    }

    /// Music-oriented preset
    pub fn music() -> Self {
        Self {
            application: OpusApplication::Audio,
            bitrate: 128_000,
            ..Default::default()
        }
    }
}

/// Opus codec description
#[derive(Debug, Clone, Default)]
pub struct OpusCodec {
    config: OpusConfig,
}

impl OpusCodec {
    pub fn new(config: OpusConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &OpusConfig {
        &self.config
    }
}

impl AudioCodec for OpusCodec {
    fn name(&self) -> &str {
        "opus"
    }

    fn srate(&self) -> u32 {
        OPUS_RATE
    }

    fn clock_rate(&self) -> u32 {
        OPUS_RATE
    }

    fn channels(&self) -> u16 {
        self.config.channels
    }

    fn encoder(&self, params: &EncoderParams) -> Result<Box<dyn Encoder>, CodecError> {
        Ok(Box::new(OpusEncoder::new(self.config.clone(), params)?))
    }
}

/// Opus encoder instance
pub struct OpusEncoder {
    encoder: RawEncoder,
    config: OpusConfig,
    format: SampleFormat,
    /// Samples per channel per packet
    frame_size: usize,
    float_buffer: Vec<f32>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    /// Create a new Opus encoder for the given packet interval
    pub fn new(config: OpusConfig, params: &EncoderParams) -> Result<Self, CodecError> {
        let channels = match config.channels {
            1 => Channels::Mono,
            2 => Channels::Stereo,
            _ => return Err(CodecError::EncoderInit(
                format!("Unsupported channel count: {}", config.channels)
            )),
        };

        // Opus frames are 2.5, 5, 10, 20, 40 or 60 ms
        let frame_size = (OPUS_RATE * params.ptime_ms / 1000) as usize;
        if ![120, 240, 480, 960, 1920, 2880].contains(&frame_size) {
            return Err(CodecError::EncoderInit(format!(
                "ptime {}ms is not an Opus frame duration",
                params.ptime_ms
            )));
        }

        let application = match config.application {
            OpusApplication::Voip => Application::Voip,
            OpusApplication::Audio => Application::Audio,
            OpusApplication::LowDelay => Application::LowDelay,
        };

        let mut encoder = RawEncoder::new(OPUS_RATE, channels, application)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        Self::configure_encoder(&mut encoder, &config)?;

        Ok(Self {
            encoder,
            config,
            format: params.format,
            frame_size,
            float_buffer: Vec::new(),
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    /// Configure the encoder with all settings
    fn configure_encoder(encoder: &mut RawEncoder, config: &OpusConfig) -> Result<(), CodecError> {
        encoder.set_bitrate(opus::Bitrate::Bits(config.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        encoder.set_vbr(config.vbr)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;

        encoder.set_complexity(config.complexity.min(10) as i32)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set complexity: {}", e)))?;

        encoder.set_inband_fec(config.fec)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        if config.fec {
            encoder.set_packet_loss_perc(config.packet_loss_perc as i32)
                .map_err(|e| CodecError::EncoderInit(format!("Failed to set packet loss: {}", e)))?;
        }

        encoder.set_dtx(config.dtx)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set DTX: {}", e)))?;

        Ok(())
    }

    /// Get expected total samples per frame (including all channels)
    pub fn samples_per_frame(&self) -> usize {
        self.frame_size * self.config.channels as usize
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }

    pub fn bytes_produced(&self) -> u64 {
        self.bytes_produced
    }
}

impl Encoder for OpusEncoder {
    fn encode(&mut self, _marker: &mut bool, samples: &[i16], out: &mut [u8]) -> Result<Encoded, CodecError> {
        if samples.len() != self.samples_per_frame() {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }

        let size = match self.format {
            SampleFormat::S16le => self.encoder.encode(samples, out),
            SampleFormat::Float => {
                i16_to_f32_into(samples, &mut self.float_buffer);
                self.encoder.encode_float(&self.float_buffer, out)
            }
        }
        .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Encoded::Packet { len: size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(ptime_ms: u32) -> EncoderParams {
        EncoderParams {
            ptime_ms,
            format: SampleFormat::S16le,
        }
    }

    #[test]
    fn test_encoder_creation() {
        let codec = OpusCodec::new(OpusConfig::music());
        assert_eq!(codec.srate(), 48000);
        assert_eq!(codec.channels(), 2);
        assert!(codec.encoder(&params(20)).is_ok());
    }

    #[test]
    fn test_invalid_ptime() {
        let result = OpusEncoder::new(OpusConfig::default(), &params(30));
        assert!(matches!(result, Err(CodecError::EncoderInit(_))));
    }

    #[test]
    fn test_encoding() {
        let mut encoder = OpusEncoder::new(OpusConfig::default(), &params(20)).unwrap();
        let samples = vec![0i16; encoder.samples_per_frame()];
        let mut out = vec![0u8; 4000];
        let mut marker = false;

        let result = encoder.encode(&mut marker, &samples, &mut out).unwrap();
        match result {
            Encoded::Packet { len } => assert!(len > 0 && len < samples.len() * 2),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(encoder.frames_encoded(), 1);
    }

    #[test]
    fn test_float_encoding() {
        let mut encoder = OpusEncoder::new(
            OpusConfig::voice(),
            &EncoderParams {
                ptime_ms: 10,
                format: SampleFormat::Float,
            },
        )
        .unwrap();
        let samples = vec![1000i16; encoder.samples_per_frame()];
        let mut out = vec![0u8; 4000];
        let mut marker = false;
        assert!(encoder.encode(&mut marker, &samples, &mut out).is_ok());
    }

    #[test]
    fn test_wrong_frame_size() {
        let mut encoder = OpusEncoder::new(OpusConfig::default(), &params(20)).unwrap();
        let mut out = vec![0u8; 4000];
        let mut marker = false;
        let result = encoder.encode(&mut marker, &[0i16; 100], &mut out);
        assert!(matches!(result, Err(CodecError::InvalidFrameSize(100))));
    }
}

//! Producer side of the pipeline
//!
//! A capture backend pushes frames from its own thread through a
//! [`FrameHandler`]. The announcement file is the other producer; it is pulled
//! by the drain path instead (see [`crate::audio::file`]). Exactly one of them
//! is authoritative at any time, tracked by [`ActiveSource`].

pub mod manual;

pub use manual::ManualBackend;

use std::sync::Arc;

use crate::audio::buffer::AudioFrame;
use crate::config::{AudioConfig, SampleFormat};
use crate::error::AudioError;

/// Error reported by a running producer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    /// Backend specific code; 0 signals end of stream
    pub code: i32,
    pub message: String,
}

impl SourceError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether this is a clean end-of-stream notification
    pub fn is_eof(&self) -> bool {
        self.code == 0
    }
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Callbacks a producer invokes from its delivery context
///
/// The frame is only borrowed for the duration of the call.
pub trait FrameHandler: Send + Sync {
    fn on_frame(&self, frame: &AudioFrame);
    fn on_error(&self, error: SourceError);
}

/// Format requested from a producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceParams {
    pub format: SampleFormat,
    pub sample_rate: u32,
    pub channels: u16,
    pub ptime_ms: u32,
}

impl SourceParams {
    /// Capture parameters derived from the configuration
    pub fn capture(config: &AudioConfig) -> Self {
        Self {
            format: config.src_fmt,
            sample_rate: config.source_rate(),
            channels: config.source_channels(),
            ptime_ms: config.ptime_ms,
        }
    }

    /// Interleaved samples per packet interval
    pub fn samples_per_packet(&self) -> usize {
        crate::audio::buffer::samples_per_packet(self.sample_rate, self.channels, self.ptime_ms)
    }
}

/// Handle to a running producer; dropping it stops delivery
///
/// Once `stop` returns (or the handle is dropped) the backend must not
/// invoke the handler again.
pub trait CaptureStream: Send {
    fn stop(&mut self);
}

/// A capture backend able to open a live producer
pub trait CaptureBackend: Send + Sync {
    /// Module name used to select the backend from configuration
    fn name(&self) -> &str;

    /// Open `device` and start delivering frames to `handler`
    fn open(
        &self,
        params: &SourceParams,
        device: &str,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Box<dyn CaptureStream>, AudioError>;
}

/// Which producer currently drives output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActiveSource {
    /// Announcement file, while open and not done
    Announcement,
    /// Live capture
    #[default]
    Mic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_params_from_config() {
        let config = AudioConfig {
            srate_src: 48000,
            channels_src: 1,
            ptime_ms: 10,
            ..Default::default()
        };
        let params = SourceParams::capture(&config);
        assert_eq!(params.sample_rate, 48000);
        assert_eq!(params.channels, 1);
        assert_eq!(params.samples_per_packet(), 480);
    }

    #[test]
    fn test_source_error_eof() {
        assert!(SourceError::new(0, "end of file").is_eof());
        let err = SourceError::new(5, "device unplugged");
        assert!(!err.is_eof());
        assert_eq!(err.to_string(), "device unplugged (code 5)");
    }
}

//! Error types for the RTP audio source
//!
//! Setup-time failures surface as [`Error`] from [`Session::start`] and abort
//! the whole session. Run-time failures inside the drain path surface as
//! [`DrainError`]; they are logged and counted but never stop the pipeline.
//!
//! [`Session::start`]: crate::session::Session::start

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Resampler error: {0}")]
    Resample(#[from] ResampleError),

    #[error("Filter error: {0}")]
    Filter(#[from] FilterError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse category of a start-up failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    OutOfMemory,
    Unsupported,
    Io,
}

impl Error {
    /// Categorize this error for callers that only care about the failure class
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) | Error::Config(_) => ErrorKind::InvalidArgument,
            Error::OutOfMemory(_) => ErrorKind::OutOfMemory,
            Error::Unsupported(_)
            | Error::Resample(_)
            | Error::Filter(_)
            | Error::Codec(_) => ErrorKind::Unsupported,
            Error::Audio(AudioError::DeviceNotFound(_))
            | Error::Audio(AudioError::UnsupportedFormat(_)) => ErrorKind::Unsupported,
            Error::Audio(_) | Error::Send(_) | Error::Io(_) => ErrorKind::Io,
        }
    }
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Announcement file {path}: {reason}")]
    Announcement {
        path: PathBuf,
        reason: String,
    },

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Output buffer too small: need {needed} bytes, have {available}")]
    BufferTooSmall {
        needed: usize,
        available: usize,
    },
}

/// Resampler errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResampleError {
    #[error("Unsupported conversion: {in_rate}Hz/{in_channels}ch -> {out_rate}Hz/{out_channels}ch")]
    Unsupported {
        in_rate: u32,
        in_channels: u16,
        out_rate: u32,
        out_channels: u16,
    },

    #[error("Resampler used before setup")]
    NotConfigured,

    #[error("Output buffer too small: need {needed} samples, have {available}")]
    BufferTooSmall {
        needed: usize,
        available: usize,
    },
}

/// Filter errors
#[derive(Error, Debug, Clone)]
pub enum FilterError {
    #[error("Filter '{name}' setup failed: {reason}")]
    Setup {
        name: String,
        reason: String,
    },

    #[error("Filter '{name}' failed: {reason}")]
    Process {
        name: String,
        reason: String,
    },
}

/// Errors returned by the send callback
#[derive(Error, Debug)]
pub enum SendError {
    #[error("Socket setup failed: {0}")]
    Socket(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Header prefix too small: {0} bytes")]
    PrefixTooSmall(usize),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Run-time failure of a single drain cycle
///
/// The frame in flight is dropped; the session keeps running.
#[derive(Error, Debug)]
pub enum DrainError {
    #[error("resampling failed: {0}")]
    Resample(#[from] ResampleError),

    #[error("audio filter failed: {0} filter(s) reported errors")]
    Filter(usize),

    #[error("audio encoding failed: {0}")]
    Encode(#[from] CodecError),

    #[error("send failed: {0}")]
    Send(#[from] SendError),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

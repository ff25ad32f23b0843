//! # RTP Audio Source
//!
//! Real-time pipeline turning a live microphone stream, optionally preceded by
//! an announcement file ("gong"), into a paced sequence of encoded RTP packets.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │  ┌──────────────────┐                      ┌──────────────────────┐   │
//! │  │ Capture backend  │  on_frame / on_error │ Announcement file    │   │
//! │  │ (own thread)     │─────────┐            │ (read by the drain)  │   │
//! │  └──────────────────┘         │            └──────────┬───────────┘   │
//! │                               ▼                       │               │
//! │                  ┌────────────────────────┐           │               │
//! │                  │ Ring Buffer (30 pkts)  │           │               │
//! │                  │ drop-oldest, locked    │           │               │
//! │                  └───────────┬────────────┘           │               │
//! │                              │   one packet per drain │               │
//! │       Scheduler ─────────────┼────────────────────────┘               │
//! │   (poll: inline ≤16 /        ▼                                        │
//! │    thread: paced)   ┌──────────────────┐                              │
//! │                     │    Resampler     │  lazy setup per input rate   │
//! │                     └────────┬─────────┘                              │
//! │                              ▼                                        │
//! │                     ┌──────────────────┐                              │
//! │                     │   Filter chain   │  registration order          │
//! │                     └────────┬─────────┘                              │
//! │                              ▼                                        │
//! │                     ┌──────────────────┐                              │
//! │                     │Encoder/Packetizer│  emitted / deferred / failed │
//! │                     └────────┬─────────┘                              │
//! │                              ▼                                        │
//! │                  send(ext_len, marker, rtp_ts, buffer)                │
//! │                              │                                        │
//! │                     Timestamp tracker advances                        │
//! └──────────────────────────────┼────────────────────────────────────────┘
//!                                ▼
//!                       network transport (RTP/UDP)
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod network;
pub mod scheduler;
pub mod session;
pub mod source;
pub mod timestamp;

pub use error::{Error, ErrorKind, Result};
pub use session::{Session, SessionBuilder, SessionStats};

/// Crate-wide constants
pub mod constants {
    /// Default packet interval in milliseconds
    pub const DEFAULT_PTIME_MS: u32 = 20;

    /// Capture sample rate used when the configuration leaves it unset
    pub const DEFAULT_SOURCE_RATE: u32 = 16000;

    /// Capture channel count used when the configuration leaves it unset
    pub const DEFAULT_SOURCE_CHANNELS: u16 = 2;

    /// Ring buffer capacity, in packets at the capture format
    pub const RING_BUFFER_PACKETS: usize = 30;

    /// Bytes reserved in front of every payload for the RTP header
    pub const STREAM_PRESZ: usize = 4 + 12;

    /// Largest encoded payload the packetizer accepts
    pub const MAX_PAYLOAD_SIZE: usize = 4096;

    /// Maximum drains per producer callback in poll mode
    pub const POLL_DRAIN_LIMIT: usize = 16;

    /// Sleep slice of the pacing thread in milliseconds
    pub const PACING_SLICE_MS: u64 = 4;

    /// Maximum datagram size for UDP (MTU - IP/UDP headers)
    pub const MAX_PACKET_SIZE: usize = 1472;
}

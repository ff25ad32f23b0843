//! RTP/UDP transport implementing the send callback

pub mod rtp;
pub mod udp;

pub use rtp::{RtpHeader, RTP_HEADER_LEN};
pub use udp::{create_socket, NetworkConfig, RtpSender};

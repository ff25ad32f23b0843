//! RTP over UDP, unicast or multicast

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};

use crate::codec::{RtpBuffer, SendHandler};
use crate::constants::MAX_PACKET_SIZE;
use crate::error::SendError;
use crate::network::rtp::{RtpHeader, RTP_HEADER_LEN};

/// Transport settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Where packets go; a multicast group enables the multicast options
    pub destination: SocketAddr,
    /// Local address to bind; unspecified address and any port by default
    pub bind: Option<SocketAddr>,
    pub payload_type: u8,
    /// Fixed SSRC; random when unset
    pub ssrc: Option<u32>,
    pub multicast_ttl: u32,
    pub multicast_loop: bool,
    /// Socket send buffer size in bytes
    pub send_buffer_size: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            destination: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(239, 0, 0, 1)), 5004),
            bind: None,
            payload_type: 111,
            ssrc: None,
            multicast_ttl: 1,
            multicast_loop: true,
            send_buffer_size: None,
        }
    }
}

/// Creates the UDP socket described by `config`
pub fn create_socket(config: &NetworkConfig) -> Result<UdpSocket, SendError> {
    let dest = config.destination;
    let socket = Socket::new(Domain::for_address(dest), Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| SendError::Socket(e.to_string()))?;

    if let Some(size) = config.send_buffer_size {
        socket
            .set_send_buffer_size(size)
            .map_err(|e| SendError::Socket(format!("send buffer size: {}", e)))?;
    }

    if dest.ip().is_multicast() {
        match dest.ip() {
            IpAddr::V4(_) => {
                socket
                    .set_multicast_ttl_v4(config.multicast_ttl)
                    .map_err(|e| SendError::Socket(format!("multicast ttl: {}", e)))?;
                socket
                    .set_multicast_loop_v4(config.multicast_loop)
                    .map_err(|e| SendError::Socket(format!("multicast loop: {}", e)))?;
            }
            IpAddr::V6(_) => {
                socket
                    .set_multicast_hops_v6(config.multicast_ttl)
                    .map_err(|e| SendError::Socket(format!("multicast hops: {}", e)))?;
                socket
                    .set_multicast_loop_v6(config.multicast_loop)
                    .map_err(|e| SendError::Socket(format!("multicast loop: {}", e)))?;
            }
        }
    }

    let bind = config.bind.unwrap_or_else(|| match dest {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    });
    socket
        .bind(&bind.into())
        .map_err(|e| SendError::Socket(format!("bind {}: {}", bind, e)))?;

    Ok(socket.into())
}

/// Sends payloads as RTP packets to one destination
pub struct RtpSender {
    socket: UdpSocket,
    destination: SocketAddr,
    payload_type: u8,
    ssrc: u32,
    sequence: u16,
    packets_sent: u64,
    bytes_sent: u64,
}

impl RtpSender {
    pub fn new(config: &NetworkConfig) -> Result<Self, SendError> {
        let socket = create_socket(config)?;
        let ssrc = config
            .ssrc
            .unwrap_or_else(|| uuid::Uuid::new_v4().as_fields().0);
        let (_, _, sequence, _) = uuid::Uuid::new_v4().as_fields();

        tracing::info!(
            "RTP sender to {} (pt {}, ssrc {:08x})",
            config.destination,
            config.payload_type,
            ssrc
        );

        Ok(Self {
            socket,
            destination: config.destination,
            payload_type: config.payload_type & 0x7f,
            ssrc,
            sequence,
            packets_sent: 0,
            bytes_sent: 0,
        })
    }

    /// Prepend the RTP header to the payload in `buffer` and send it
    pub fn send(&mut self, ext_len: usize, marker: bool, timestamp: u32, buffer: &mut RtpBuffer) -> Result<(), SendError> {
        let header = RtpHeader {
            extension: ext_len > 0,
            marker,
            payload_type: self.payload_type,
            sequence: self.sequence,
            timestamp,
            ssrc: self.ssrc,
        };

        let prefix = buffer.prefix_mut();
        let start = prefix.len().checked_sub(RTP_HEADER_LEN).ok_or(SendError::PrefixTooSmall(prefix.len()))?;
        header.write(&mut prefix[start..])?;

        let packet = buffer.packet(RTP_HEADER_LEN)?;
        if packet.len() > MAX_PACKET_SIZE {
            return Err(SendError::PacketTooLarge(packet.len()));
        }

        let sent = self
            .socket
            .send_to(packet, self.destination)
            .map_err(|e| SendError::SendFailed(format!("{}: {}", self.destination, e)))?;

        self.sequence = self.sequence.wrapping_add(1);
        self.packets_sent += 1;
        self.bytes_sent += sent as u64;
        Ok(())
    }

    /// Send callback for the session
    pub fn into_handler(mut self) -> SendHandler {
        Box::new(move |ext_len, marker, timestamp, buffer| self.send(ext_len, marker, timestamp, buffer))
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Sequence number of the next packet
    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn packets_sent(&self) -> u64 {
        self.packets_sent
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn loopback_receiver() -> (UdpSocket, NetworkConfig) {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let config = NetworkConfig {
            destination: receiver.local_addr().unwrap(),
            ssrc: Some(0x1234_5678),
            ..Default::default()
        };
        (receiver, config)
    }

    fn buffer_with(payload: &[u8]) -> RtpBuffer {
        let mut buffer = RtpBuffer::new(64);
        buffer.load_payload(payload).unwrap();
        buffer
    }

    #[test]
    fn test_send_unicast() {
        let (receiver, config) = loopback_receiver();
        let mut sender = RtpSender::new(&config).unwrap();
        let first_seq = sender.sequence();

        let mut buffer = buffer_with(&[1, 2, 3]);
        sender.send(0, true, 960, &mut buffer).unwrap();

        let mut recv = [0u8; 64];
        let n = receiver.recv(&mut recv).unwrap();
        assert_eq!(n, RTP_HEADER_LEN + 3);

        let header = RtpHeader::parse(&recv[..n]).unwrap();
        assert!(header.marker);
        assert_eq!(header.payload_type, 111);
        assert_eq!(header.timestamp, 960);
        assert_eq!(header.ssrc, 0x1234_5678);
        assert_eq!(header.sequence, first_seq);
        assert_eq!(&recv[RTP_HEADER_LEN..n], &[1, 2, 3]);

        assert_eq!(sender.sequence(), first_seq.wrapping_add(1));
        assert_eq!(sender.packets_sent(), 1);
    }

    #[test]
    fn test_handler_sends() {
        let (receiver, config) = loopback_receiver();
        let mut handler = RtpSender::new(&config).unwrap().into_handler();

        let mut buffer = buffer_with(&[9; 10]);
        handler(0, false, 42, &mut buffer).unwrap();

        let mut recv = [0u8; 64];
        let n = receiver.recv(&mut recv).unwrap();
        let header = RtpHeader::parse(&recv[..n]).unwrap();
        assert!(!header.marker);
        assert_eq!(header.timestamp, 42);
    }

    #[test]
    fn test_multicast_socket_options() {
        let config = NetworkConfig {
            multicast_ttl: 4,
            ..Default::default()
        };
        assert!(create_socket(&config).is_ok());
    }
}

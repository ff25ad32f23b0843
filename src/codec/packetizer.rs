//! Encoder invocation and packet hand-off
//!
//! The packetizer owns the encoder and one reusable RTP-layer buffer. Every
//! payload is encoded behind a reserved prefix of [`STREAM_PRESZ`] bytes so the
//! transport can prepend its header without copying.

use bytes::BytesMut;

use crate::codec::{rtp_frames, AudioCodec, Encoded, Encoder};
use crate::constants::{MAX_PAYLOAD_SIZE, STREAM_PRESZ};
use crate::error::{CodecError, DrainError, SendError};
use crate::timestamp::TimestampTracker;

/// Send callback: `(extension_len, marker, rtp_timestamp, buffer)`
///
/// Any user argument is captured by the closure.
pub type SendHandler = Box<dyn FnMut(usize, bool, u32, &mut RtpBuffer) -> Result<(), SendError> + Send>;

/// Payload buffer with reserved header room
pub struct RtpBuffer {
    data: BytesMut,
    payload_len: usize,
}

impl RtpBuffer {
    pub fn new(payload_capacity: usize) -> Self {
        Self {
            data: BytesMut::zeroed(STREAM_PRESZ + payload_capacity),
            payload_len: 0,
        }
    }

    /// Encoded payload
    pub fn payload(&self) -> &[u8] {
        &self.data[STREAM_PRESZ..STREAM_PRESZ + self.payload_len]
    }

    /// Reserved room in front of the payload
    pub fn prefix_mut(&mut self) -> &mut [u8] {
        &mut self.data[..STREAM_PRESZ]
    }

    /// Header of `header_len` bytes (taken from the end of the prefix) followed by the payload
    ///
    /// The caller writes the header into the last `header_len` bytes of
    /// [`prefix_mut`](Self::prefix_mut) first.
    pub fn packet(&self, header_len: usize) -> Result<&[u8], SendError> {
        if header_len > STREAM_PRESZ {
            return Err(SendError::PrefixTooSmall(STREAM_PRESZ));
        }
        Ok(&self.data[STREAM_PRESZ - header_len..STREAM_PRESZ + self.payload_len])
    }

    /// Replace the payload with a copy of `payload`
    pub fn load_payload(&mut self, payload: &[u8]) -> Result<(), SendError> {
        let area = self.payload_area();
        if payload.len() > area.len() {
            return Err(SendError::PacketTooLarge(payload.len()));
        }
        area[..payload.len()].copy_from_slice(payload);
        self.set_payload_len(payload.len());
        Ok(())
    }

    fn payload_area(&mut self) -> &mut [u8] {
        &mut self.data[STREAM_PRESZ..]
    }

    fn set_payload_len(&mut self, len: usize) {
        self.payload_len = len;
    }
}

/// What one encoder call produced
#[derive(Debug)]
pub enum EncodeOutcome {
    /// A complete payload of `payload_len` bytes is in the packet buffer
    Emitted {
        marker: bool,
        payload_len: usize,
        extension_len: usize,
    },
    /// No packet this cycle, `sample_delta` codec-rate samples accounted
    Deferred { sample_delta: u32 },
    /// Frame dropped
    Failed(CodecError),
}

/// What [`Packetizer::pack_and_send`] did with an outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent { timestamp: u32, marker: bool },
    Deferred { sample_delta: u32 },
}

/// Encoder plus send callback
pub struct Packetizer {
    encoder: Box<dyn Encoder>,
    buffer: RtpBuffer,
    send: SendHandler,
    srate: u32,
    clock_rate: u32,
    channels: u16,
}

impl Packetizer {
    pub fn new(codec: &dyn AudioCodec, encoder: Box<dyn Encoder>, send: SendHandler) -> Self {
        Self {
            encoder,
            buffer: RtpBuffer::new(MAX_PAYLOAD_SIZE),
            send,
            srate: codec.srate(),
            clock_rate: codec.clock_rate(),
            channels: codec.channels(),
        }
    }

    /// Run the encoder over one frame of codec-format samples
    pub fn encode(&mut self, samples: &[i16]) -> EncodeOutcome {
        self.buffer.set_payload_len(0);
        let area = self.buffer.payload_area();
        let available = area.len();

        // the codec's own marker request applies to this frame only
        let mut marker = false;
        match self.encoder.encode(&mut marker, samples, area) {
            Ok(Encoded::Packet { len }) if len > available => EncodeOutcome::Failed(CodecError::BufferTooSmall {
                needed: len,
                available,
            }),
            Ok(Encoded::Packet { len }) => {
                self.buffer.set_payload_len(len);
                EncodeOutcome::Emitted {
                    marker,
                    payload_len: len,
                    extension_len: 0,
                }
            }
            Ok(Encoded::Deferred { sample_delta }) => EncodeOutcome::Deferred { sample_delta },
            Err(e) => EncodeOutcome::Failed(e),
        }
    }

    /// Hand an outcome to the send callback and account its samples
    ///
    /// `sampc` is the number of interleaved samples that were encoded. The
    /// tracker advances on a successful send and on deferral; failures leave
    /// it untouched.
    pub fn pack_and_send(
        &mut self,
        outcome: EncodeOutcome,
        sampc: usize,
        tracker: &mut TimestampTracker,
    ) -> Result<Delivery, DrainError> {
        match outcome {
            EncodeOutcome::Emitted {
                marker,
                payload_len,
                extension_len,
            } => {
                let frames = rtp_frames(sampc, self.srate, self.clock_rate, self.channels);
                if payload_len == 0 {
                    // nothing to put on the wire, the time slot still passed
                    tracker.advance(frames);
                    return Ok(Delivery::Deferred { sample_delta: frames });
                }

                let marker = marker || tracker.marker_pending();
                let timestamp = tracker.rtp_timestamp();

                (self.send)(extension_len, marker, timestamp, &mut self.buffer)?;
                tracker.on_sent();
                tracker.advance(frames);
                Ok(Delivery::Sent { timestamp, marker })
            }
            EncodeOutcome::Deferred { sample_delta } => {
                tracker.advance(sample_delta);
                Ok(Delivery::Deferred { sample_delta })
            }
            EncodeOutcome::Failed(e) => Err(DrainError::Encode(e)),
        }
    }

    /// Payload of the last emitted packet
    pub fn buffer(&self) -> &RtpBuffer {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::EncoderParams;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct Script(VecDeque<Result<Encoded, CodecError>>);

    impl Encoder for Script {
        fn encode(&mut self, _marker: &mut bool, _samples: &[i16], out: &mut [u8]) -> Result<Encoded, CodecError> {
            let next = self.0.pop_front().unwrap_or(Ok(Encoded::Packet { len: 3 }));
            if let Ok(Encoded::Packet { len }) = next {
                let n = len.min(out.len());
                out[..n].fill(0xab);
            }
            next
        }
    }

    struct L16Mono;

    impl AudioCodec for L16Mono {
        fn name(&self) -> &str {
            "l16"
        }
        fn srate(&self) -> u32 {
            8000
        }
        fn clock_rate(&self) -> u32 {
            8000
        }
        fn channels(&self) -> u16 {
            1
        }
        fn encoder(&self, _params: &EncoderParams) -> Result<Box<dyn Encoder>, CodecError> {
            Ok(Box::new(Script(VecDeque::new())))
        }
    }

    type Sent = Arc<Mutex<Vec<(bool, u32, Vec<u8>)>>>;

    fn packetizer(script: Vec<Result<Encoded, CodecError>>, fail_send: bool) -> (Packetizer, Sent) {
        let sent: Sent = Arc::default();
        let log = sent.clone();
        let send: SendHandler = Box::new(move |_ext, marker, ts, buf| {
            if fail_send {
                return Err(SendError::SendFailed("unreachable".into()));
            }
            log.lock().unwrap().push((marker, ts, buf.payload().to_vec()));
            Ok(())
        });
        (Packetizer::new(&L16Mono, Box::new(Script(script.into())), send), sent)
    }

    #[test]
    fn test_emitted_packet_advances_timestamp() {
        let (mut pk, sent) = packetizer(vec![], false);
        let mut tracker = TimestampTracker::with_base(1000);

        let outcome = pk.encode(&[0; 160]);
        let delivery = pk.pack_and_send(outcome, 160, &mut tracker).unwrap();

        assert_eq!(delivery, Delivery::Sent { timestamp: 1000, marker: true });
        assert_eq!(tracker.rtp_timestamp(), 1160);
        assert_eq!(sent.lock().unwrap()[0].2, vec![0xab; 3]);
    }

    #[test]
    fn test_deferred_advances_without_send() {
        let (mut pk, sent) = packetizer(vec![Ok(Encoded::Deferred { sample_delta: 80 })], false);
        let mut tracker = TimestampTracker::with_base(0);

        let outcome = pk.encode(&[0; 160]);
        assert!(matches!(outcome, EncodeOutcome::Deferred { sample_delta: 80 }));
        pk.pack_and_send(outcome, 160, &mut tracker).unwrap();

        assert!(sent.lock().unwrap().is_empty());
        assert_eq!(tracker.rtp_timestamp(), 80);
        assert!(tracker.marker_pending());
    }

    #[test]
    fn test_failed_encode_keeps_timestamp() {
        let (mut pk, _) = packetizer(vec![Err(CodecError::EncodingFailed("bad".into()))], false);
        let mut tracker = TimestampTracker::with_base(5);

        let outcome = pk.encode(&[0; 160]);
        assert!(pk.pack_and_send(outcome, 160, &mut tracker).is_err());
        assert_eq!(tracker.rtp_timestamp(), 5);
    }

    #[test]
    fn test_send_failure_is_reported() {
        let (mut pk, _) = packetizer(vec![], true);
        let mut tracker = TimestampTracker::with_base(5);

        let outcome = pk.encode(&[0; 160]);
        let err = pk.pack_and_send(outcome, 160, &mut tracker).unwrap_err();
        assert!(matches!(err, DrainError::Send(_)));
        assert_eq!(tracker.rtp_timestamp(), 5);
        // marker is still owed to the first packet that makes it out
        assert!(tracker.marker_pending());
    }

    /// Requests the marker on every other frame, deferring the first
    struct MarkEveryOther(usize);

    impl Encoder for MarkEveryOther {
        fn encode(&mut self, marker: &mut bool, _samples: &[i16], out: &mut [u8]) -> Result<Encoded, CodecError> {
            self.0 += 1;
            *marker = self.0 % 2 == 1;
            if self.0 == 1 {
                return Ok(Encoded::Deferred { sample_delta: 160 });
            }
            out[0] = 1;
            Ok(Encoded::Packet { len: 1 })
        }
    }

    #[test]
    fn test_codec_marker_applies_to_its_frame() {
        let sent: Sent = Arc::default();
        let log = sent.clone();
        let send: SendHandler = Box::new(move |_ext, marker, ts, buf| {
            log.lock().unwrap().push((marker, ts, buf.payload().to_vec()));
            Ok(())
        });
        let mut pk = Packetizer::new(&L16Mono, Box::new(MarkEveryOther(0)), send);
        let mut tracker = TimestampTracker::with_base(0);
        tracker.on_sent();

        let mut markers = Vec::new();
        for _ in 0..4 {
            let outcome = pk.encode(&[0; 160]);
            if let EncodeOutcome::Emitted { marker, .. } = outcome {
                markers.push(marker);
            }
            pk.pack_and_send(outcome, 160, &mut tracker).unwrap();
        }

        // the request made on the deferred frame does not leak into the next packet
        assert_eq!(markers, vec![false, true, false]);
        let sent: Vec<bool> = sent.lock().unwrap().iter().map(|p| p.0).collect();
        assert_eq!(sent, vec![false, true, false]);
    }

    #[test]
    fn test_oversized_payload_fails() {
        let (mut pk, _) = packetizer(vec![Ok(Encoded::Packet { len: MAX_PAYLOAD_SIZE + 1 })], false);
        assert!(matches!(
            pk.encode(&[0; 160]),
            EncodeOutcome::Failed(CodecError::BufferTooSmall { .. })
        ));
    }

    #[test]
    fn test_packet_with_header() {
        let mut buffer = RtpBuffer::new(8);
        buffer.payload_area()[..2].copy_from_slice(&[1, 2]);
        buffer.set_payload_len(2);

        let prefix = buffer.prefix_mut();
        let len = prefix.len();
        prefix[len - 3..].copy_from_slice(&[7, 8, 9]);

        assert_eq!(buffer.packet(3).unwrap(), &[7, 8, 9, 1, 2]);
        assert!(buffer.packet(STREAM_PRESZ + 1).is_err());
    }
}

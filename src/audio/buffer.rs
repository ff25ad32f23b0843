//! Fixed-capacity sample ring buffer
//!
//! Decouples the capture callback from the drain path. The buffer is sized
//! once at session start and never grows; when the producer outruns the
//! drain the oldest samples are overwritten so the producer never blocks.
//! Exclusive access is provided by the session lock, not by the buffer.

use ringbuf::traits::{Consumer, Observer, RingBuffer as _};
use ringbuf::HeapRb;

use crate::config::SampleFormat;

/// Audio frame containing interleaved S16 samples
#[derive(Clone, Debug, PartialEq)]
pub struct AudioFrame {
    /// Interleaved audio samples
    pub samples: Vec<i16>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Format the samples were captured in
    pub format: SampleFormat,
    /// Capture timestamp in microseconds
    pub timestamp: u64,
}

impl AudioFrame {
    pub fn new(samples: Vec<i16>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
            format: SampleFormat::S16le,
            timestamp: 0,
        }
    }

    /// Total sample count over all channels
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Get number of samples per channel
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Get frame duration in microseconds
    pub fn duration_us(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.samples_per_channel() as u64 * 1_000_000) / self.sample_rate as u64
    }
}

/// Number of interleaved samples making up one packet interval
pub fn samples_per_packet(sample_rate: u32, channels: u16, ptime_ms: u32) -> usize {
    (sample_rate as usize * channels as usize * ptime_ms as usize) / 1000
}

/// Drop-oldest ring buffer of S16 samples
pub struct RingBuffer {
    inner: HeapRb<i16>,
    overflow_count: u64,
}

impl RingBuffer {
    /// Create a new ring buffer holding `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: HeapRb::new(capacity.max(1)),
            overflow_count: 0,
        }
    }

    /// Create a buffer holding `packets` packet intervals of the given format
    pub fn for_packets(packets: usize, sample_rate: u32, channels: u16, ptime_ms: u32) -> Self {
        Self::new(packets * samples_per_packet(sample_rate, channels, ptime_ms))
    }

    /// Append samples, overwriting the oldest ones when full
    ///
    /// Returns the number of samples that were discarded to make room.
    pub fn write(&mut self, samples: &[i16]) -> usize {
        let capacity = self.capacity();
        let (dropped, samples) = if samples.len() > capacity {
            // only the newest `capacity` samples can survive
            let excess = samples.len() - capacity;
            let lost = self.inner.occupied_len() + excess;
            self.inner.clear();
            (lost, &samples[excess..])
        } else {
            let lost = samples.len().saturating_sub(self.inner.vacant_len());
            (lost, samples)
        };

        self.inner.push_slice_overwrite(samples);
        self.overflow_count += dropped as u64;
        dropped
    }

    /// Pop up to `out.len()` samples in FIFO order, returning how many were read
    ///
    /// Callers check [`current_size`](Self::current_size) first so a full
    /// packet is available.
    pub fn read(&mut self, out: &mut [i16]) -> usize {
        self.inner.pop_slice(out)
    }

    /// Samples currently buffered
    pub fn current_size(&self) -> usize {
        self.inner.occupied_len()
    }

    /// Discard everything buffered
    pub fn flush(&mut self) {
        self.inner.clear();
    }

    /// Get buffer capacity in samples
    pub fn capacity(&self) -> usize {
        self.inner.capacity().get()
    }

    /// Total samples discarded by overflow since creation
    pub fn overflow_count(&self) -> u64 {
        self.overflow_count
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ring_buffer_basic() {
        let mut buffer = RingBuffer::new(8);

        assert_eq!(buffer.write(&[1, 2, 3]), 0);
        assert_eq!(buffer.write(&[4, 5]), 0);
        assert_eq!(buffer.current_size(), 5);

        let mut out = [0i16; 4];
        assert_eq!(buffer.read(&mut out), 4);
        assert_eq!(out, [1, 2, 3, 4]);
        assert_eq!(buffer.current_size(), 1);
    }

    #[test]
    fn test_overflow_drops_oldest() {
        let mut buffer = RingBuffer::new(4);

        buffer.write(&[1, 2, 3]);
        assert_eq!(buffer.write(&[4, 5, 6]), 2);
        assert_eq!(buffer.current_size(), 4);
        assert_eq!(buffer.overflow_count(), 2);

        let mut out = [0i16; 4];
        buffer.read(&mut out);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn test_write_larger_than_capacity() {
        let mut buffer = RingBuffer::new(4);
        buffer.write(&[9]);

        let dropped = buffer.write(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(dropped, 3);
        assert_eq!(buffer.current_size(), 4);

        let mut out = [0i16; 4];
        buffer.read(&mut out);
        assert_eq!(out, [3, 4, 5, 6]);
    }

    #[test]
    fn test_flush() {
        let mut buffer = RingBuffer::new(16);
        buffer.write(&[7; 10]);
        buffer.flush();
        assert!(buffer.is_empty());
        assert_eq!(buffer.capacity(), 16);
    }

    #[test]
    fn test_sized_for_packets() {
        // 30 packets of 20ms at 16kHz stereo
        let buffer = RingBuffer::for_packets(30, 16000, 2, 20);
        assert_eq!(buffer.capacity(), 30 * 640);
    }

    #[test]
    fn test_frame_duration() {
        let frame = AudioFrame::new(vec![0; samples_per_packet(48000, 2, 20)], 48000, 2);
        assert_eq!(frame.sample_count(), 1920);
        assert_eq!(frame.samples_per_channel(), 960);
        assert_eq!(frame.duration_us(), 20_000);
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity(writes in prop::collection::vec(1usize..64, 1..40)) {
            let mut buffer = RingBuffer::new(50);
            let mut written = 0u64;
            for len in writes {
                buffer.write(&vec![1i16; len]);
                written += len as u64;
                prop_assert!(buffer.current_size() <= buffer.capacity());
                prop_assert_eq!(buffer.capacity(), 50);
            }
            prop_assert_eq!(buffer.current_size() as u64 + buffer.overflow_count(), written);
        }
    }
}

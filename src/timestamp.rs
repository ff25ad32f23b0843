//! Extended RTP timestamp and marker state
//!
//! The timestamp starts at a random base and advances by the codec-rate
//! sample count of every frame that was sent or deferred, wrapping at 2^32.
//! The marker is owed to the first packet of the session and to the first
//! packet after a discontinuity (announcement to microphone); it is cleared
//! only once such a packet has actually been sent.

/// Streaming state of the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing sent yet
    Idle,
    /// At least one packet sent
    Streaming,
}

#[derive(Debug, Clone)]
pub struct TimestampTracker {
    base: u32,
    ext: u32,
    total: u64,
    marker: bool,
    state: StreamState,
}

impl TimestampTracker {
    /// Tracker seeded from a random base
    pub fn new() -> Self {
        let (seed, _, _, _) = uuid::Uuid::new_v4().as_fields();
        Self::with_base(seed)
    }

    /// Tracker seeded from a fixed base
    pub fn with_base(base: u32) -> Self {
        Self {
            base,
            ext: base,
            total: 0,
            marker: true,
            state: StreamState::Idle,
        }
    }

    /// Value for the RTP timestamp field of the next packet
    pub fn rtp_timestamp(&self) -> u32 {
        self.ext
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// Distance from the base, modulo 2^32
    pub fn offset(&self) -> u32 {
        self.ext.wrapping_sub(self.base)
    }

    /// Total samples advanced since start, without wrapping
    pub fn total_advanced(&self) -> u64 {
        self.total
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    /// Account `delta` codec-rate samples
    pub fn advance(&mut self, delta: u32) {
        self.ext = self.ext.wrapping_add(delta);
        self.total += delta as u64;
    }

    /// Whether the next packet must carry the marker bit
    pub fn marker_pending(&self) -> bool {
        self.marker
    }

    /// Owe the marker to the next packet
    pub fn mark_discontinuity(&mut self) {
        self.marker = true;
    }

    /// A packet went out
    pub fn on_sent(&mut self) {
        self.marker = false;
        self.state = StreamState::Streaming;
    }
}

impl Default for TimestampTracker {
    fn default() -> Self {
        Self::new()
    }
}

//! Source session
//!
//! The session ties a capture producer (and an optional announcement file)
//! to the encoder and the send callback. Producer callbacks only touch the
//! ring buffer; the drain routine pulls one packet at a time, converts it to
//! the codec format, runs the filter chain, encodes and hands the result to
//! the transport.
//!
//! Two locks protect the pipeline. The source lock covers the ring buffer,
//! the resampler, the announcement and the mute flag, and is shared with the
//! producer callback. The drain lock covers the encoder, the filter chain,
//! the timestamp tracker and the scratch buffers. When both are needed the
//! drain lock is taken first.
//!
//! The send callback and the end-of-announcement handler run on the draining
//! context and must not call back into the session.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;

use crate::audio::buffer::{samples_per_packet, AudioFrame, RingBuffer};
use crate::audio::file::AnnouncementFile;
use crate::audio::resample::Resampler;
use crate::codec::{AudioCodec, Delivery, EncoderParams, Packetizer, RtpBuffer, SendHandler};
use crate::config::{AudioConfig, FilterErrorPolicy, TxMode};
use crate::constants::{PACING_SLICE_MS, POLL_DRAIN_LIMIT, RING_BUFFER_PACKETS};
use crate::error::{DrainError, Error, Result, SendError};
use crate::filter::{FilterChain, FilterFactory, FilterParams};
use crate::scheduler::{poll_drain, Drainer, PacingThread, SchedulerState};
use crate::source::{ActiveSource, CaptureBackend, CaptureStream, FrameHandler, SourceError, SourceParams};
use crate::timestamp::TimestampTracker;

/// Called once when the announcement has finished playing
pub type EofHandler = Box<dyn FnOnce() + Send>;

/// Snapshot of the session counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Packets handed to the send callback successfully
    pub packets_sent: u64,
    /// Frames the encoder consumed without emitting a packet
    pub frames_deferred: u64,
    /// Frames lost to a resample, filter, encode or send failure
    pub frames_dropped: u64,
    /// Capture frames discarded while the announcement played
    pub frames_muted: u64,
    pub resample_errors: u64,
    pub filter_errors: u64,
    pub encode_errors: u64,
    pub send_errors: u64,
    /// Errors reported by the capture backend
    pub source_errors: u64,
    /// Samples discarded by ring buffer overflow
    pub ring_overflows: u64,
    pub resampler_setups: u64,
    /// RTP timestamp distance from the random base
    pub timestamp_offset: u32,
    pub announcement_done: bool,
    pub active_source: ActiveSource,
}

#[derive(Default)]
struct Counters {
    packets_sent: AtomicU64,
    frames_deferred: AtomicU64,
    frames_dropped: AtomicU64,
    frames_muted: AtomicU64,
    resample_errors: AtomicU64,
    filter_errors: AtomicU64,
    encode_errors: AtomicU64,
    send_errors: AtomicU64,
    source_errors: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// State shared between the producer callback and the drain path
struct SourceState {
    ring: Option<RingBuffer>,
    resampler: Resampler,
    announcement: Option<AnnouncementFile>,
    announcement_done: bool,
    mic_muted: bool,
    /// Format of the samples currently in the ring
    mic_rate: u32,
    mic_channels: u16,
    /// Muted capture time not yet matched by an announcement packet, in ns
    muted_ns: u64,
}

impl SourceState {
    fn write_mic(&mut self, frame: &AudioFrame) {
        let Some(ring) = self.ring.as_mut() else {
            return;
        };

        if frame.sample_rate != self.mic_rate || frame.channels != self.mic_channels {
            if frame.sample_rate == 0 || frame.channels == 0 {
                return;
            }
            tracing::debug!(
                "capture format changed to {}Hz/{}ch",
                frame.sample_rate,
                frame.channels
            );
            ring.flush();
            self.mic_rate = frame.sample_rate;
            self.mic_channels = frame.channels;
        }

        let dropped = ring.write(&frame.samples);
        if dropped > 0 {
            tracing::trace!("ring buffer overflow, {} samples dropped", dropped);
        }
    }

    /// Ring samples the next drain takes for `codec_frames` output frames
    fn mic_input_len(&self, codec_frames: usize) -> usize {
        self.resampler
            .input_frames_for(self.mic_rate, self.mic_channels, codec_frames)
            * self.mic_channels as usize
    }

    /// Announcement packets owed after `frame` worth of muted capture
    fn announcement_due(&mut self, frame: &AudioFrame, ptime_ms: u32) -> usize {
        if frame.sample_rate == 0 || frame.channels == 0 || ptime_ms == 0 {
            return 0;
        }
        let frames = frame.samples_per_channel() as u64;
        self.muted_ns += frames * 1_000_000_000 / u64::from(frame.sample_rate);

        let interval = u64::from(ptime_ms) * 1_000_000;
        let due = (self.muted_ns / interval).min(POLL_DRAIN_LIMIT as u64);
        self.muted_ns -= due * interval;
        if due == POLL_DRAIN_LIMIT as u64 {
            // capture far ahead of the file, do not bank the excess
            self.muted_ns %= interval;
        }
        due as usize
    }

    /// Switch from the announcement to the microphone
    fn finish_announcement(&mut self) {
        if let Some(file) = self.announcement.take() {
            tracing::info!(
                "announcement {} done after {} samples",
                file.path().display(),
                file.samples_read()
            );
        }
        self.announcement_done = true;
        if let Some(ring) = self.ring.as_mut() {
            ring.flush();
        }
        self.resampler.reset();
        self.mic_muted = false;
    }

    fn active(&self) -> ActiveSource {
        if self.announcement.is_some() {
            ActiveSource::Announcement
        } else {
            ActiveSource::Mic
        }
    }
}

/// State only the drain path touches
struct DrainState {
    packetizer: Packetizer,
    filters: FilterChain,
    tracker: TimestampTracker,
    input: Vec<i16>,
    frame: AudioFrame,
}

enum Cycle {
    Idle,
    Sent,
    Deferred,
}

struct Shared {
    source: Mutex<SourceState>,
    drain: Mutex<Option<DrainState>>,
    counters: Counters,
    on_eof: Mutex<Option<EofHandler>>,
    txmode: TxMode,
    ptime_ms: u32,
    /// Codec-rate frames in one packet
    codec_frames: usize,
    policy: FilterErrorPolicy,
}

impl Shared {
    fn on_mic_frame(&self, frame: &AudioFrame) {
        let limit = {
            let mut source = self.source.lock();
            if source.mic_muted {
                bump(&self.counters.frames_muted);
                if source.announcement.is_some() {
                    // the announcement is paced by the captured time
                    source.announcement_due(frame, self.ptime_ms)
                } else {
                    0
                }
            } else {
                source.write_mic(frame);
                POLL_DRAIN_LIMIT
            }
        };

        if self.txmode == TxMode::Poll {
            poll_drain(self, limit);
        }
    }

    fn drain(&self) -> std::result::Result<Cycle, DrainError> {
        let mut finished = false;
        let result = {
            let mut guard = self.drain.lock();
            let Some(state) = guard.as_mut() else {
                return Ok(Cycle::Idle);
            };
            let result = self.run_cycle(state, &mut finished);
            if finished {
                // the first microphone packet starts a new talk spurt
                state.tracker.mark_discontinuity();
            }
            result
        };

        if finished {
            let handler = self.on_eof.lock().take();
            if let Some(handler) = handler {
                handler();
            }
        }

        result
    }

    fn run_cycle(&self, state: &mut DrainState, finished: &mut bool) -> std::result::Result<Cycle, DrainError> {
        {
            let mut guard = self.source.lock();
            let source = &mut *guard;

            let (rate, channels) = match source.announcement.as_ref() {
                Some(file) => (file.sample_rate(), file.channels()),
                None => (source.mic_rate, source.mic_channels),
            };
            let len = source
                .resampler
                .input_frames_for(rate, channels, self.codec_frames)
                * channels as usize;

            match source.announcement.as_mut() {
                Some(file) => {
                    state.input.resize(len, 0);
                    let read = file.fill(&mut state.input);
                    *finished = read < len;
                }
                None => {
                    let Some(ring) = source.ring.as_mut() else {
                        return Ok(Cycle::Idle);
                    };
                    if ring.current_size() < len {
                        return Ok(Cycle::Idle);
                    }
                    state.input.resize(len, 0);
                    ring.read(&mut state.input);
                }
            }

            let converted = source.resampler.ensure_configured(rate, channels).and_then(|_| {
                source
                    .resampler
                    .convert(&state.input, self.codec_frames, &mut state.frame.samples)
            });

            if *finished {
                source.finish_announcement();
            }

            converted?;
        }

        let report = state.filters.apply(&mut state.frame);
        if !report.is_ok() {
            let failed = report.failures.len();
            self.counters
                .filter_errors
                .fetch_add(failed as u64, Ordering::Relaxed);
            if self.policy == FilterErrorPolicy::DropFrame {
                return Err(DrainError::Filter(failed));
            }
        }

        let outcome = state.packetizer.encode(&state.frame.samples);
        let sampc = state.frame.samples.len();
        match state.packetizer.pack_and_send(outcome, sampc, &mut state.tracker)? {
            Delivery::Sent { .. } => Ok(Cycle::Sent),
            Delivery::Deferred { .. } => Ok(Cycle::Deferred),
        }
    }

    fn record_failure(&self, error: DrainError) {
        bump(&self.counters.frames_dropped);
        match &error {
            DrainError::Resample(_) => bump(&self.counters.resample_errors),
            DrainError::Encode(_) => bump(&self.counters.encode_errors),
            DrainError::Send(_) => bump(&self.counters.send_errors),
            // counted per failing filter in run_cycle
            DrainError::Filter(_) => {}
        }
        tracing::warn!("dropped frame: {}", error);
    }

    fn snapshot(&self) -> SessionStats {
        let drain = self.drain.lock();
        let source = self.source.lock();
        let c = &self.counters;

        SessionStats {
            packets_sent: c.packets_sent.load(Ordering::Relaxed),
            frames_deferred: c.frames_deferred.load(Ordering::Relaxed),
            frames_dropped: c.frames_dropped.load(Ordering::Relaxed),
            frames_muted: c.frames_muted.load(Ordering::Relaxed),
            resample_errors: c.resample_errors.load(Ordering::Relaxed),
            filter_errors: c.filter_errors.load(Ordering::Relaxed),
            encode_errors: c.encode_errors.load(Ordering::Relaxed),
            send_errors: c.send_errors.load(Ordering::Relaxed),
            source_errors: c.source_errors.load(Ordering::Relaxed),
            ring_overflows: source.ring.as_ref().map_or(0, |r| r.overflow_count()),
            resampler_setups: source.resampler.setup_count(),
            timestamp_offset: drain.as_ref().map_or(0, |d| d.tracker.offset()),
            announcement_done: source.announcement_done,
            active_source: source.active(),
        }
    }

    /// Release producers, buffers, filters and encoder, in that order
    fn release(&self) {
        {
            let mut source = self.source.lock();
            source.announcement = None;
            source.ring = None;
        }

        if let Some(state) = self.drain.lock().take() {
            let DrainState {
                packetizer,
                filters,
                input,
                frame,
                ..
            } = state;
            drop(input);
            drop(frame);
            drop(filters);
            drop(packetizer);
        }

        self.on_eof.lock().take();
    }
}

impl Drainer for Shared {
    fn packet_ready(&self) -> bool {
        let source = self.source.lock();
        if source.announcement.is_some() {
            return true;
        }
        let len = source.mic_input_len(self.codec_frames);
        source.ring.as_ref().is_some_and(|r| r.current_size() >= len)
    }

    fn drain_one(&self) {
        match self.drain() {
            Ok(Cycle::Sent) => bump(&self.counters.packets_sent),
            Ok(Cycle::Deferred) => bump(&self.counters.frames_deferred),
            Ok(Cycle::Idle) => {}
            Err(e) => self.record_failure(e),
        }
    }
}

/// Frame handler given to the capture backend
///
/// Frames arriving before the session is fully assembled are dropped.
struct CaptureSink {
    name: String,
    shared: OnceLock<Arc<Shared>>,
}

impl CaptureSink {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            shared: OnceLock::new(),
        }
    }

    fn install(&self, shared: Arc<Shared>) {
        let _ = self.shared.set(shared);
    }
}

impl FrameHandler for CaptureSink {
    fn on_frame(&self, frame: &AudioFrame) {
        if let Some(shared) = self.shared.get() {
            shared.on_mic_frame(frame);
        }
    }

    fn on_error(&self, error: SourceError) {
        if error.is_eof() {
            tracing::info!("{}: capture stream ended", self.name);
        } else {
            tracing::error!("{}: capture error: {}", self.name, error);
        }
        if let Some(shared) = self.shared.get() {
            bump(&shared.counters.source_errors);
        }
    }
}

/// Stops the capture stream on every exit path
struct CaptureGuard(Box<dyn CaptureStream>);

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}

fn scratch(len: usize) -> Result<Vec<i16>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|e| Error::OutOfMemory(format!("{} sample scratch buffer: {}", len, e)))?;
    Ok(buf)
}

/// Assembles the optional parts of a [`Session`]
pub struct SessionBuilder {
    config: AudioConfig,
    codec: Option<Arc<dyn AudioCodec>>,
    backends: Vec<Arc<dyn CaptureBackend>>,
    filters: Vec<Arc<dyn FilterFactory>>,
    announcement: Option<PathBuf>,
    send: Option<SendHandler>,
    on_eof: Option<EofHandler>,
}

impl SessionBuilder {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            codec: None,
            backends: Vec::new(),
            filters: Vec::new(),
            announcement: None,
            send: None,
            on_eof: None,
        }
    }

    pub fn codec(mut self, codec: Arc<dyn AudioCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Register a capture backend; the one named by `src_mod` is used
    pub fn backend(mut self, backend: Arc<dyn CaptureBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Append a filter; filters run in registration order
    pub fn filter(mut self, factory: Arc<dyn FilterFactory>) -> Self {
        self.filters.push(factory);
        self
    }

    /// Play this file before the microphone, overriding the configured one
    pub fn announcement(mut self, path: impl Into<PathBuf>) -> Self {
        self.announcement = Some(path.into());
        self
    }

    pub fn on_send<F>(mut self, send: F) -> Self
    where
        F: FnMut(usize, bool, u32, &mut RtpBuffer) -> std::result::Result<(), SendError> + Send + 'static,
    {
        self.send = Some(Box::new(send));
        self
    }

    pub fn on_announcement_end<F>(mut self, handler: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_eof = Some(Box::new(handler));
        self
    }

    /// Acquire every resource and start streaming
    pub fn start(self) -> Result<Session> {
        let SessionBuilder {
            config,
            codec,
            backends,
            filters,
            announcement,
            send,
            on_eof,
        } = self;

        config.validate()?;
        let codec = codec.ok_or_else(|| Error::InvalidArgument("no codec given".to_string()))?;
        let send = send.ok_or_else(|| Error::InvalidArgument("no send handler given".to_string()))?;
        if codec.srate() == 0 || codec.channels() == 0 {
            return Err(Error::InvalidArgument(format!(
                "codec {} has no usable format",
                codec.name()
            )));
        }
        let backend = backends
            .iter()
            .find(|b| b.name() == config.src_mod)
            .cloned()
            .ok_or_else(|| Error::Unsupported(format!("capture module '{}' not available", config.src_mod)))?;

        let params = SourceParams::capture(&config);
        let mic_len = params.samples_per_packet();
        if mic_len == 0 {
            return Err(Error::InvalidArgument(format!(
                "{}Hz/{}ch at {}ms gives an empty packet",
                params.sample_rate, params.channels, params.ptime_ms
            )));
        }
        let codec_frames = samples_per_packet(codec.srate(), 1, config.ptime_ms);
        let codec_len = codec_frames * codec.channels() as usize;
        if codec_len == 0 {
            return Err(Error::InvalidArgument(format!(
                "codec {} at {}Hz gives an empty {}ms packet",
                codec.name(),
                codec.srate(),
                config.ptime_ms
            )));
        }

        tracing::debug!(
            "setting up audio encoder {} ({}Hz/{}ch, {}ms)",
            codec.name(),
            codec.srate(),
            codec.channels(),
            config.ptime_ms
        );
        let encoder = codec.encoder(&EncoderParams {
            ptime_ms: config.ptime_ms,
            format: config.enc_fmt,
        })?;
        let packetizer = Packetizer::new(codec.as_ref(), encoder, send);

        let announcement = match announcement.or_else(|| config.announcement.clone()) {
            Some(path) => {
                let file = AnnouncementFile::open(&path)?;
                tracing::info!(
                    "playing announcement {} ({}Hz/{}ch)",
                    path.display(),
                    file.sample_rate(),
                    file.channels()
                );
                Some(file)
            }
            None => None,
        };
        let mic_muted = announcement.is_some();

        tracing::info!(
            "opening {} capture on '{}' ({}Hz/{}ch {:?})",
            backend.name(),
            config.src_dev,
            params.sample_rate,
            params.channels,
            params.format
        );
        let sink = Arc::new(CaptureSink::new(backend.name()));
        let capture = CaptureGuard(backend.open(&params, &config.src_dev, sink.clone())?);

        let ring = RingBuffer::for_packets(
            RING_BUFFER_PACKETS,
            params.sample_rate,
            params.channels,
            params.ptime_ms,
        );
        let input = scratch(mic_len)?;
        let mut frame = AudioFrame::new(scratch(codec_len)?, codec.srate(), codec.channels());
        frame.format = config.src_fmt;

        let tracker = TimestampTracker::new();
        tracing::debug!("rtp timestamp base {}", tracker.base());

        let resampler = Resampler::new(codec.srate(), codec.channels());

        let filter_chain = FilterChain::build(
            &filters,
            &FilterParams {
                sample_rate: codec.srate(),
                channels: codec.channels(),
                format: config.src_fmt,
            },
        );

        let shared = Arc::new(Shared {
            source: Mutex::new(SourceState {
                ring: Some(ring),
                resampler,
                announcement,
                announcement_done: false,
                mic_muted,
                mic_rate: params.sample_rate,
                mic_channels: params.channels,
                muted_ns: 0,
            }),
            drain: Mutex::new(Some(DrainState {
                packetizer,
                filters: filter_chain,
                tracker,
                input,
                frame,
            })),
            counters: Counters::default(),
            on_eof: Mutex::new(on_eof),
            txmode: config.txmode,
            ptime_ms: config.ptime_ms,
            codec_frames,
            policy: config.filter_error_policy,
        });
        sink.install(shared.clone());

        let mut pacer = PacingThread::new();
        if config.txmode == TxMode::Thread {
            pacer.start(
                shared.clone(),
                Duration::from_millis(u64::from(config.ptime_ms)),
                Duration::from_millis(PACING_SLICE_MS),
            )?;
        }

        tracing::info!(
            "audio source started: {} {}ms, {:?} mode",
            codec.name(),
            config.ptime_ms,
            config.txmode
        );

        Ok(Session {
            shared,
            capture: Some(capture),
            pacer,
            config: Arc::new(config),
            final_stats: None,
        })
    }
}

/// Running audio source
///
/// Stopping (explicitly or by drop) joins the pacing thread and closes the
/// capture stream before any pipeline state is released, so no callback ever
/// runs against a torn-down session.
pub struct Session {
    shared: Arc<Shared>,
    capture: Option<CaptureGuard>,
    pacer: PacingThread,
    config: Arc<AudioConfig>,
    final_stats: Option<SessionStats>,
}

impl Session {
    pub fn builder(config: AudioConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    /// Start a session from explicit parts
    pub fn start(
        config: AudioConfig,
        codec: Arc<dyn AudioCodec>,
        backend: Arc<dyn CaptureBackend>,
        announcement: Option<PathBuf>,
        filters: Vec<Arc<dyn FilterFactory>>,
        send: SendHandler,
        on_eof: Option<EofHandler>,
    ) -> Result<Session> {
        SessionBuilder {
            config,
            codec: Some(codec),
            backends: vec![backend],
            filters,
            announcement,
            send: Some(send),
            on_eof,
        }
        .start()
    }

    /// Stop streaming and release every resource; calling it again is a no-op
    pub fn stop(&mut self) {
        if self.final_stats.is_some() {
            return;
        }

        self.pacer.stop();
        drop(self.capture.take());

        let stats = self.shared.snapshot();
        self.shared.release();

        tracing::info!(
            "audio source stopped: {} packets sent, {} deferred, {} dropped",
            stats.packets_sent,
            stats.frames_deferred,
            stats.frames_dropped
        );
        self.final_stats = Some(stats);
    }

    pub fn is_running(&self) -> bool {
        self.final_stats.is_none()
    }

    /// Current counters, or the final ones once stopped
    pub fn stats(&self) -> SessionStats {
        match &self.final_stats {
            Some(stats) => stats.clone(),
            None => self.shared.snapshot(),
        }
    }

    /// Producer currently feeding the encoder
    pub fn active_source(&self) -> ActiveSource {
        self.shared.source.lock().active()
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.pacer.state()
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.stop();
    }
}

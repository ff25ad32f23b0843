#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rtp_audio_source::codec::{AudioCodec, Encoded, Encoder, EncoderParams, RtpBuffer};
use rtp_audio_source::config::{AudioConfig, TxMode};
use rtp_audio_source::error::{CodecError, SendError};
use rtp_audio_source::source::ManualBackend;
use rtp_audio_source::SessionBuilder;

/// What the scripted encoder does with its next frame
#[derive(Debug, Clone, Copy)]
pub enum Step {
    Packet,
    /// Packet with the codec's own marker request
    Marker,
    Defer(u32),
    Fail,
}

pub type Script = Arc<Mutex<VecDeque<Step>>>;

/// Big-endian 16 bit PCM, steered by a script
pub struct L16 {
    pub srate: u32,
    pub channels: u16,
    pub script: Script,
    /// Reject frames of any other length, like a fixed-frame codec
    pub frame_len: Option<usize>,
}

impl L16 {
    pub fn new(srate: u32, channels: u16) -> Self {
        Self {
            srate,
            channels,
            script: Arc::default(),
            frame_len: None,
        }
    }

    /// Only accept frames of exactly 20ms
    pub fn fixed_frame(srate: u32, channels: u16) -> Self {
        Self {
            frame_len: Some((srate as usize * channels as usize * 20) / 1000),
            ..Self::new(srate, channels)
        }
    }

    pub fn with_script(srate: u32, channels: u16, steps: &[Step]) -> Self {
        let codec = Self::new(srate, channels);
        codec.script.lock().unwrap().extend(steps.iter().copied());
        codec
    }
}

impl AudioCodec for L16 {
    fn name(&self) -> &str {
        "l16"
    }

    fn srate(&self) -> u32 {
        self.srate
    }

    fn clock_rate(&self) -> u32 {
        self.srate
    }

    fn channels(&self) -> u16 {
        self.channels
    }

    fn encoder(&self, _params: &EncoderParams) -> Result<Box<dyn Encoder>, CodecError> {
        Ok(Box::new(L16Encoder {
            script: self.script.clone(),
            frame_len: self.frame_len,
        }))
    }
}

struct L16Encoder {
    script: Script,
    frame_len: Option<usize>,
}

impl Encoder for L16Encoder {
    fn encode(&mut self, marker: &mut bool, samples: &[i16], out: &mut [u8]) -> Result<Encoded, CodecError> {
        if self.frame_len.is_some_and(|len| len != samples.len()) {
            return Err(CodecError::InvalidFrameSize(samples.len()));
        }
        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Packet);
        match step {
            Step::Defer(sample_delta) => Ok(Encoded::Deferred { sample_delta }),
            Step::Fail => Err(CodecError::EncodingFailed("scripted failure".into())),
            Step::Packet | Step::Marker => {
                if matches!(step, Step::Marker) {
                    *marker = true;
                }
                let len = samples.len() * 2;
                if out.len() < len {
                    return Err(CodecError::BufferTooSmall {
                        needed: len,
                        available: out.len(),
                    });
                }
                for (chunk, sample) in out.chunks_exact_mut(2).zip(samples) {
                    chunk.copy_from_slice(&sample.to_be_bytes());
                }
                Ok(Encoded::Packet { len })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub marker: bool,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

pub type SentLog = Arc<Mutex<Vec<Sent>>>;

/// Send callback recording every packet; fails the first `fail_first` calls
pub fn recorder(fail_first: usize) -> (SentLog, impl FnMut(usize, bool, u32, &mut RtpBuffer) -> Result<(), SendError> + Send + 'static) {
    let log: SentLog = Arc::default();
    let sink = log.clone();
    let mut failures = fail_first;
    let send = move |_ext: usize, marker: bool, timestamp: u32, buffer: &mut RtpBuffer| {
        if failures > 0 {
            failures -= 1;
            return Err(SendError::SendFailed("network unreachable".into()));
        }
        sink.lock().unwrap().push(Sent {
            marker,
            timestamp,
            payload: buffer.payload().to_vec(),
        });
        Ok(())
    };
    (log, send)
}

pub fn config(srate: u32, channels: u16, txmode: TxMode) -> AudioConfig {
    AudioConfig {
        src_mod: "manual".to_string(),
        src_dev: "test".to_string(),
        srate_src: srate,
        channels_src: channels,
        txmode,
        ptime_ms: 20,
        ..Default::default()
    }
}

/// Builder wired to a manual backend, an L16 codec and a recording sender
pub fn builder(config: AudioConfig, codec: L16) -> (SessionBuilder, ManualBackend, SentLog) {
    let backend = ManualBackend::new("manual");
    let (log, send) = recorder(0);
    let builder = SessionBuilder::new(config)
        .codec(Arc::new(codec))
        .backend(Arc::new(backend.clone()))
        .on_send(send);
    (builder, backend, log)
}

pub fn write_wav(path: &Path, rate: u32, channels: u16, samples: &[i16]) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for &s in samples {
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}

pub fn markers(log: &SentLog) -> Vec<bool> {
    log.lock().unwrap().iter().map(|s| s.marker).collect()
}

/// Poll `done` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    done()
}

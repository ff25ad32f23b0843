//! Live capture backend built on cpal
//!
//! The cpal stream is owned by a dedicated thread (streams are not `Send` on
//! every platform). The device callback assembles packet-sized S16 frames and
//! hands them to the session's [`FrameHandler`]; float capture is converted at
//! this boundary.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::StreamConfig;
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::buffer::AudioFrame;
use crate::audio::convert::f32_to_i16;
use crate::audio::device::get_input_device;
use crate::config::SampleFormat;
use crate::error::AudioError;
use crate::source::{CaptureBackend, CaptureStream, FrameHandler, SourceError, SourceParams};

/// Code passed to `on_error` for stream failures reported by cpal
const STREAM_ERROR_CODE: i32 = -1;

/// cpal capture backend
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl CaptureBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open(
        &self,
        params: &SourceParams,
        device: &str,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        let capture = CpalCapture::start(*params, device, handler)?;
        Ok(Box::new(capture))
    }
}

/// Splits arbitrary callback buffers into packet-sized frames
pub(crate) struct FrameAssembler {
    frame: AudioFrame,
    packet_len: usize,
    start_time: Instant,
}

impl FrameAssembler {
    pub(crate) fn new(params: &SourceParams) -> Self {
        let packet_len = params.samples_per_packet().max(params.channels as usize);
        let mut frame = AudioFrame::new(Vec::with_capacity(packet_len), params.sample_rate, params.channels);
        frame.format = params.format;
        Self {
            frame,
            packet_len,
            start_time: Instant::now(),
        }
    }

    /// Append samples, emitting every completed frame through `emit`
    pub(crate) fn push<F>(&mut self, samples: impl Iterator<Item = i16>, mut emit: F)
    where
        F: FnMut(&AudioFrame),
    {
        for sample in samples {
            self.frame.samples.push(sample);
            if self.frame.samples.len() == self.packet_len {
                self.frame.timestamp = self.start_time.elapsed().as_micros() as u64;
                emit(&self.frame);
                self.frame.samples.clear();
            }
        }
    }
}

/// Running cpal capture
struct CpalCapture {
    device_name: String,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl CpalCapture {
    fn start(
        params: SourceParams,
        device_name: &str,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Self, AudioError> {
        let device = get_input_device(device_name)?;
        let config = StreamConfig {
            channels: params.channels,
            sample_rate: cpal::SampleRate(params.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let running = Arc::new(AtomicBool::new(true));
        let running_for_loop = running.clone();
        let (ready_tx, ready_rx) = bounded::<Result<(), AudioError>>(1);

        let handle = thread::Builder::new()
            .name(format!("capture-{}", device_name))
            .spawn(move || {
                let stream = build_stream(&device, &config, params, handler);

                match stream {
                    Ok(stream) => {
                        if let Err(e) = stream.play() {
                            let _ = ready_tx.send(Err(AudioError::StreamError(e.to_string())));
                            return;
                        }
                        let _ = ready_tx.send(Ok(()));

                        // Keep thread alive while running
                        while running_for_loop.load(Ordering::Relaxed) {
                            thread::sleep(Duration::from_millis(10));
                        }

                        // Stream is dropped here, stopping capture
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        let mut capture = Self {
            device_name: device_name.to_string(),
            running,
            thread_handle: Some(handle),
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                tracing::info!(
                    "capture started on '{}': {}Hz, {} channel(s), {:?}",
                    device_name,
                    params.sample_rate,
                    params.channels,
                    params.format
                );
                Ok(capture)
            }
            Ok(Err(e)) => {
                capture.stop();
                Err(e)
            }
            Err(_) => {
                capture.stop();
                Err(AudioError::StreamError("capture thread exited during startup".into()))
            }
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    params: SourceParams,
    handler: Arc<dyn FrameHandler>,
) -> Result<cpal::Stream, AudioError> {
    let error_handler = handler.clone();
    let on_error = move |err: cpal::StreamError| {
        tracing::error!("capture stream error: {}", err);
        error_handler.on_error(SourceError::new(STREAM_ERROR_CODE, err.to_string()));
    };

    let mut assembler = FrameAssembler::new(&params);
    let stream = match params.format {
        SampleFormat::S16le => device.build_input_stream(
            config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                assembler.push(data.iter().copied(), |frame| handler.on_frame(frame));
            },
            on_error,
            None,
        ),
        SampleFormat::Float => device.build_input_stream(
            config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                assembler.push(data.iter().map(|&s| f32_to_i16(s)), |frame| handler.on_frame(frame));
            },
            on_error,
            None,
        ),
    };

    stream.map_err(|e| AudioError::CpalError(e.to_string()))
}

impl CaptureStream for CpalCapture {
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                tracing::error!("capture thread for '{}' panicked", self.device_name);
            }
        }
    }
}

impl Drop for CpalCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assembler_emits_packet_sized_frames() {
        let params = SourceParams {
            format: SampleFormat::S16le,
            sample_rate: 8000,
            channels: 1,
            ptime_ms: 1,
        };
        let mut assembler = FrameAssembler::new(&params);
        let mut frames = Vec::new();

        // 8 samples per packet; deliver 5 + 7 + 4 samples
        assembler.push(0..5i16, |f| frames.push(f.samples.clone()));
        assert!(frames.is_empty());
        assembler.push(5..12i16, |f| frames.push(f.samples.clone()));
        assembler.push(12..16i16, |f| frames.push(f.samples.clone()));

        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], (0..8).collect::<Vec<i16>>());
        assert_eq!(frames[1], (8..16).collect::<Vec<i16>>());
    }

    #[test]
    #[ignore = "requires audio hardware"]
    fn test_open_default_device() {
        struct Discard;
        impl FrameHandler for Discard {
            fn on_frame(&self, _frame: &AudioFrame) {}
            fn on_error(&self, _error: SourceError) {}
        }

        let params = SourceParams {
            format: SampleFormat::S16le,
            sample_rate: 48000,
            channels: 2,
            ptime_ms: 20,
        };
        let mut stream = CpalBackend::new()
            .open(&params, "default", Arc::new(Discard))
            .unwrap();
        stream.stop();
    }
}

//! Capture backend driven by the caller
//!
//! Useful when audio comes from somewhere other than a sound card (another
//! audio stack, a test, a file player). The application pushes frames through
//! [`ManualBackend::push`] and they reach the session exactly as a live
//! capture thread would deliver them.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::audio::buffer::AudioFrame;
use crate::error::AudioError;
use crate::source::{CaptureBackend, CaptureStream, FrameHandler, SourceError, SourceParams};

type Slot = Arc<Mutex<Option<Opened>>>;

struct Opened {
    handler: Arc<dyn FrameHandler>,
    params: SourceParams,
    device: String,
}

/// Backend whose frames are pushed by the application
#[derive(Clone)]
pub struct ManualBackend {
    name: String,
    slot: Slot,
}

impl ManualBackend {
    /// Backend registered under `name` (matched against `src_mod`)
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slot: Arc::default(),
        }
    }

    /// Deliver one frame; returns `false` if no stream is open
    pub fn push(&self, frame: &AudioFrame) -> bool {
        // clone the handler out so delivery runs without the slot lock
        let handler = self.slot.lock().as_ref().map(|o| o.handler.clone());
        match handler {
            Some(handler) => {
                handler.on_frame(frame);
                true
            }
            None => false,
        }
    }

    /// Deliver interleaved samples in the opened format
    pub fn push_samples(&self, samples: &[i16]) -> bool {
        let Some(params) = self.params() else {
            return false;
        };
        self.push(&AudioFrame::new(samples.to_vec(), params.sample_rate, params.channels))
    }

    /// Report a producer error
    pub fn fail(&self, error: SourceError) -> bool {
        let handler = self.slot.lock().as_ref().map(|o| o.handler.clone());
        match handler {
            Some(handler) => {
                handler.on_error(error);
                true
            }
            None => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Parameters the stream was opened with
    pub fn params(&self) -> Option<SourceParams> {
        self.slot.lock().as_ref().map(|o| o.params)
    }

    /// Device name the stream was opened with
    pub fn device(&self) -> Option<String> {
        self.slot.lock().as_ref().map(|o| o.device.clone())
    }
}

impl CaptureBackend for ManualBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(
        &self,
        params: &SourceParams,
        device: &str,
        handler: Arc<dyn FrameHandler>,
    ) -> Result<Box<dyn CaptureStream>, AudioError> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(AudioError::StreamError(format!("{} already open", self.name)));
        }

        *slot = Some(Opened {
            handler,
            params: *params,
            device: device.to_string(),
        });
        tracing::debug!("manual capture '{}' opened on {}", self.name, device);

        Ok(Box::new(ManualStream {
            slot: self.slot.clone(),
        }))
    }
}

struct ManualStream {
    slot: Slot,
}

impl CaptureStream for ManualStream {
    fn stop(&mut self) {
        self.slot.lock().take();
    }
}

impl Drop for ManualStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SampleFormat;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Count {
        frames: AtomicUsize,
        errors: AtomicUsize,
    }

    impl FrameHandler for Count {
        fn on_frame(&self, _frame: &AudioFrame) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, _error: SourceError) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn params() -> SourceParams {
        SourceParams {
            format: SampleFormat::S16le,
            sample_rate: 8000,
            channels: 1,
            ptime_ms: 20,
        }
    }

    #[test]
    fn test_push_reaches_handler() {
        let backend = ManualBackend::new("manual");
        assert!(!backend.push_samples(&[0; 160]));

        let count = Arc::new(Count::default());
        let mut stream = backend.open(&params(), "line-in", count.clone()).unwrap();
        assert_eq!(backend.device().as_deref(), Some("line-in"));

        assert!(backend.push_samples(&[0; 160]));
        assert!(backend.fail(SourceError::new(-1, "glitch")));
        assert_eq!(count.frames.load(Ordering::SeqCst), 1);
        assert_eq!(count.errors.load(Ordering::SeqCst), 1);

        stream.stop();
        assert!(!backend.is_open());
        assert!(!backend.push_samples(&[0; 160]));
        assert_eq!(count.frames.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_open_twice_fails() {
        let backend = ManualBackend::new("manual");
        let count = Arc::new(Count::default());
        let _stream = backend.open(&params(), "a", count.clone()).unwrap();
        assert!(backend.open(&params(), "b", count).is_err());
    }

    #[test]
    fn test_drop_closes() {
        let backend = ManualBackend::new("manual");
        let stream = backend
            .open(&params(), "a", Arc::new(Count::default()))
            .unwrap();
        drop(stream);
        assert!(!backend.is_open());
    }
}

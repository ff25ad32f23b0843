//! Post-capture audio filter chain
//!
//! Filters are instantiated once at session start from a list of
//! [`FilterFactory`] values, in registration order, and the resulting chain is
//! immutable for the lifetime of the session.
//!
//! Every filter always runs. A failing filter is logged and the next one
//! still sees the frame; the failures are collected in a [`FilterReport`] and
//! the session's [`FilterErrorPolicy`](crate::config::FilterErrorPolicy)
//! decides whether the frame is still encoded.

use crate::audio::buffer::AudioFrame;
use crate::config::SampleFormat;
use crate::error::FilterError;

/// Format the filters will see (the codec format)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterParams {
    pub sample_rate: u32,
    pub channels: u16,
    pub format: SampleFormat,
}

/// One instantiated filter
pub trait AudioFilter: Send {
    fn name(&self) -> &str;

    /// Process a frame in place
    fn process(&mut self, frame: &mut AudioFrame) -> Result<(), FilterError>;
}

/// Builds filter instances for a session
pub trait FilterFactory: Send + Sync {
    fn name(&self) -> &str;

    /// Create an encode-side instance; `Ok(None)` means the filter does not
    /// take part in encoding.
    fn create(&self, params: &FilterParams) -> Result<Option<Box<dyn AudioFilter>>, FilterError>;
}

/// Outcome of running the chain over one frame
#[derive(Debug, Default)]
pub struct FilterReport {
    pub failures: Vec<FilterError>,
}

impl FilterReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Ordered, immutable list of filters
#[derive(Default)]
pub struct FilterChain {
    filters: Vec<Box<dyn AudioFilter>>,
}

impl FilterChain {
    /// Instantiate every factory in order; factories whose setup fails are skipped
    pub fn build(factories: &[std::sync::Arc<dyn FilterFactory>], params: &FilterParams) -> Self {
        let mut filters = Vec::with_capacity(factories.len());

        for factory in factories {
            match factory.create(params) {
                Ok(Some(filter)) => {
                    tracing::debug!("audio filter '{}' added", filter.name());
                    filters.push(filter);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("audio filter {} setup failed: {}, continue with next", factory.name(), e);
                }
            }
        }

        Self { filters }
    }

    /// Chain over already instantiated filters
    pub fn from_filters(filters: Vec<Box<dyn AudioFilter>>) -> Self {
        Self { filters }
    }

    /// Run every filter over `frame`, left to right
    pub fn apply(&mut self, frame: &mut AudioFrame) -> FilterReport {
        let mut report = FilterReport::default();

        for filter in &mut self.filters {
            if let Err(e) = filter.process(frame) {
                tracing::warn!("audio filter '{}' failed: {}", filter.name(), e);
                report.failures.push(e);
            }
        }

        report
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Filter names in application order
    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }
}

/// Fixed gain, mostly useful to level an announcement against the microphone
pub struct Gain {
    factor: f32,
}

impl Gain {
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }
}

impl AudioFilter for Gain {
    fn name(&self) -> &str {
        "gain"
    }

    fn process(&mut self, frame: &mut AudioFrame) -> Result<(), FilterError> {
        if !self.factor.is_finite() {
            return Err(FilterError::Process {
                name: "gain".to_string(),
                reason: format!("invalid factor {}", self.factor),
            });
        }
        for sample in &mut frame.samples {
            *sample = (f32::from(*sample) * self.factor).clamp(-32768.0, 32767.0) as i16;
        }
        Ok(())
    }
}

/// Factory for [`Gain`]
pub struct GainFactory(pub f32);

impl FilterFactory for GainFactory {
    fn name(&self) -> &str {
        "gain"
    }

    fn create(&self, _params: &FilterParams) -> Result<Option<Box<dyn AudioFilter>>, FilterError> {
        Ok(Some(Box::new(Gain::new(self.0))))
    }
}

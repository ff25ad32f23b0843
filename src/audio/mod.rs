//! Audio subsystem module

pub mod buffer;
#[cfg(feature = "cpal-backend")]
pub mod capture;
pub mod convert;
#[cfg(feature = "cpal-backend")]
pub mod device;
pub mod file;
pub mod resample;

pub use buffer::{AudioFrame, RingBuffer};
#[cfg(feature = "cpal-backend")]
pub use capture::CpalBackend;
pub use file::AnnouncementFile;
pub use resample::Resampler;

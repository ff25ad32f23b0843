//! Announcement ("gong") file source
//!
//! The announcement is a WAV file read synchronously by the drain path, one
//! packet interval at a time. A short read marks the end of the file; the
//! caller zero-fills the rest of that packet so pacing is not disturbed.

use hound::{SampleFormat as WavSampleFormat, WavReader};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::audio::convert::{f32_to_i16, int_to_i16};
use crate::error::AudioError;

/// Open announcement file with its native format
pub struct AnnouncementFile {
    reader: WavReader<BufReader<File>>,
    path: PathBuf,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    float: bool,
    samples_read: u64,
}

impl AnnouncementFile {
    /// Open a WAV file
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AudioError> {
        let path = path.as_ref();
        let reader = WavReader::open(path).map_err(|e| AudioError::Announcement {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let spec = reader.spec();
        if spec.channels == 0 || spec.channels > 2 {
            return Err(AudioError::UnsupportedFormat(format!(
                "{}: {} channels",
                path.display(),
                spec.channels
            )));
        }

        tracing::debug!(
            "announcement {}: {}Hz, {} channel(s), {} bit {:?}",
            path.display(),
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample,
            spec.sample_format
        );

        Ok(Self {
            reader,
            path: path.to_path_buf(),
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            bits_per_sample: spec.bits_per_sample,
            float: spec.sample_format == WavSampleFormat::Float,
            samples_read: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Native sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Native channel count
    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Interleaved samples read so far
    pub fn samples_read(&self) -> u64 {
        self.samples_read
    }

    /// Fill `out` with the next samples and zero the remainder
    ///
    /// Returns the number of samples taken from the file. Anything less than
    /// `out.len()` means the file is exhausted (or unreadable from here on).
    pub fn fill(&mut self, out: &mut [i16]) -> usize {
        let read = if self.float {
            read_into(self.reader.samples::<f32>(), out, f32_to_i16)
        } else {
            let bits = self.bits_per_sample;
            read_into(self.reader.samples::<i32>(), out, |s| int_to_i16(s, bits))
        };

        if read < out.len() {
            out[read..].fill(0);
        }
        self.samples_read += read as u64;
        read
    }
}

fn read_into<S, I, F>(samples: I, out: &mut [i16], convert: F) -> usize
where
    I: Iterator<Item = hound::Result<S>>,
    F: Fn(S) -> i16,
{
    let mut read = 0;
    for (slot, sample) in out.iter_mut().zip(samples) {
        match sample {
            Ok(s) => {
                *slot = convert(s);
                read += 1;
            }
            Err(e) => {
                tracing::warn!("announcement read error: {}", e);
                break;
            }
        }
    }
    read
}

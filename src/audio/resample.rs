//! Sample rate and channel conversion towards the codec format
//!
//! The resampler starts cleared and is (re)configured lazily whenever the
//! drain path observes an input rate or channel count that differs from the
//! one recorded at the last setup. Output rate and channels are fixed to the
//! active codec for the lifetime of the session.
//!
//! Conversion uses linear interpolation and always produces the number of
//! output frames the caller asks for. The read position is kept as an exact
//! fraction (in units of `1 / out_rate` input frames) and the input frames
//! still needed for interpolation are carried into the next call, so the
//! long-run ratio of input to output is exactly `in_rate / out_rate`. Ask
//! [`Resampler::input_frames_for`] how much input the next call consumes.

use crate::error::ResampleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Setup {
    in_rate: u32,
    in_channels: u16,
}

/// Lazily configured resampler
#[derive(Debug)]
pub struct Resampler {
    out_rate: u32,
    out_channels: u16,
    setup: Option<Setup>,
    /// Channel-mapped input frames not yet consumed
    pending: Vec<i16>,
    /// Position of the next output frame within `pending`, in `1 / out_rate` input frames
    phase: u64,
    /// Whether the first input frame was duplicated as history
    primed: bool,
    /// Channel-mapped input of the current call
    mapped: Vec<i16>,
    setup_count: u64,
}

impl Resampler {
    /// Create a cleared resampler targeting the codec format
    pub fn new(out_rate: u32, out_channels: u16) -> Self {
        Self {
            out_rate,
            out_channels,
            setup: None,
            pending: Vec::new(),
            phase: 0,
            primed: false,
            mapped: Vec::new(),
            setup_count: 0,
        }
    }

    /// Make sure the resampler converts from `in_rate`/`in_channels`
    ///
    /// Returns `Ok(true)` if a setup was performed, `Ok(false)` if the
    /// current setup already matches.
    pub fn ensure_configured(&mut self, in_rate: u32, in_channels: u16) -> Result<bool, ResampleError> {
        let wanted = Setup { in_rate, in_channels };
        if self.setup == Some(wanted) {
            return Ok(false);
        }

        let unsupported = in_rate == 0
            || in_channels == 0
            || self.out_rate == 0
            || self.out_channels == 0
            || (in_channels != self.out_channels
                && !matches!((in_channels, self.out_channels), (1, 2) | (2, 1)));
        if unsupported {
            self.setup = None;
            return Err(ResampleError::Unsupported {
                in_rate,
                in_channels,
                out_rate: self.out_rate,
                out_channels: self.out_channels,
            });
        }

        tracing::debug!(
            "resampler setup {}Hz/{}ch -> {}Hz/{}ch",
            in_rate,
            in_channels,
            self.out_rate,
            self.out_channels
        );
        self.setup = Some(wanted);
        self.clear_history();
        self.setup_count += 1;
        Ok(true)
    }

    /// Return to the cleared state; the next conversion triggers a new setup
    pub fn reset(&mut self) {
        self.setup = None;
        self.clear_history();
    }

    fn clear_history(&mut self) {
        self.pending.clear();
        self.phase = 0;
        self.primed = false;
    }

    /// Whether a setup is active
    pub fn is_configured(&self) -> bool {
        self.setup.is_some()
    }

    /// Whether the active setup is a pass-through
    pub fn is_noop(&self) -> bool {
        matches!(self.setup, Some(s) if s.in_rate == self.out_rate && s.in_channels == self.out_channels)
    }

    /// Number of setups performed since creation
    pub fn setup_count(&self) -> u64 {
        self.setup_count
    }

    pub fn out_rate(&self) -> u32 {
        self.out_rate
    }

    pub fn out_channels(&self) -> u16 {
        self.out_channels
    }

    /// Input frames (per channel) the next [`convert`](Self::convert) consumes
    /// to produce `out_frames` output frames from `in_rate`/`in_channels`
    ///
    /// If that format differs from the current setup the answer assumes the
    /// fresh state a new setup starts from.
    pub fn input_frames_for(&self, in_rate: u32, in_channels: u16, out_frames: usize) -> usize {
        if out_frames == 0 || in_rate == 0 {
            return 0;
        }
        if in_rate == self.out_rate {
            return out_frames;
        }

        let current = self.setup == Some(Setup { in_rate, in_channels });
        let (pending, phase, primed) = if current {
            (self.pending_frames(), self.phase, self.primed)
        } else {
            (0, 0, false)
        };

        let span = frames_spanned(phase, out_frames, in_rate, self.out_rate);
        if primed {
            span.saturating_sub(pending)
        } else {
            // the first input frame is also used as its own history
            span.saturating_sub(pending + 1).max(1)
        }
    }

    fn pending_frames(&self) -> usize {
        self.pending.len() / self.out_channels.max(1) as usize
    }

    /// Convert interleaved input into exactly `out_frames` output frames
    ///
    /// `input` should hold [`input_frames_for`](Self::input_frames_for)
    /// frames; fewer fails with [`ResampleError::BufferTooSmall`], more is
    /// kept for the next call.
    pub fn convert(&mut self, input: &[i16], out_frames: usize, out: &mut Vec<i16>) -> Result<(), ResampleError> {
        let setup = self.setup.ok_or(ResampleError::NotConfigured)?;
        out.clear();

        let out_ch = self.out_channels as usize;
        let wanted = out_frames * out_ch;

        if self.is_noop() {
            if input.len() < wanted {
                return Err(ResampleError::BufferTooSmall {
                    needed: wanted,
                    available: input.len(),
                });
            }
            out.extend_from_slice(&input[..wanted]);
            return Ok(());
        }

        remap_channels(input, setup.in_channels, self.out_channels, &mut self.mapped);

        if setup.in_rate == self.out_rate {
            if self.mapped.len() < wanted {
                return Err(ResampleError::BufferTooSmall {
                    needed: out_frames * setup.in_channels as usize,
                    available: input.len(),
                });
            }
            out.extend_from_slice(&self.mapped[..wanted]);
            return Ok(());
        }

        let in_frames = self.mapped.len() / out_ch;
        let prime = usize::from(!self.primed && in_frames > 0);
        let available = self.pending_frames() + prime + in_frames;
        let needed = frames_spanned(self.phase, out_frames, setup.in_rate, self.out_rate);
        if out_frames > 0 && available < needed {
            let carried = self.pending_frames() + prime;
            return Err(ResampleError::BufferTooSmall {
                needed: needed.saturating_sub(carried) * setup.in_channels as usize,
                available: input.len(),
            });
        }

        if prime == 1 {
            self.pending.extend_from_slice(&self.mapped[..out_ch]);
            self.primed = true;
        }
        self.pending.extend_from_slice(&self.mapped);

        let in_rate = u64::from(setup.in_rate);
        let out_rate = u64::from(self.out_rate);
        out.reserve(wanted);

        for _ in 0..out_frames {
            let idx = (self.phase / out_rate) as usize;
            let rem = self.phase % out_rate;
            for ch in 0..out_ch {
                let a = self.pending[idx * out_ch + ch];
                let s = if rem == 0 {
                    a
                } else {
                    let b = self.pending[(idx + 1) * out_ch + ch];
                    let frac = rem as f64 / out_rate as f64;
                    let v = f64::from(a) + (f64::from(b) - f64::from(a)) * frac;
                    v.round().clamp(-32768.0, 32767.0) as i16
                };
                out.push(s);
            }
            self.phase += in_rate;
        }

        // frames wholly behind the next read position are done with
        let consumed = ((self.phase / out_rate) as usize).min(self.pending_frames());
        self.pending.drain(..consumed * out_ch);
        self.phase -= consumed as u64 * out_rate;
        Ok(())
    }
}

/// Input frames covering `out_frames` reads starting at `phase`
fn frames_spanned(phase: u64, out_frames: usize, in_rate: u32, out_rate: u32) -> usize {
    if out_frames == 0 {
        return 0;
    }
    let out_rate = u64::from(out_rate);
    let last = phase + (out_frames as u64 - 1) * u64::from(in_rate);
    (last / out_rate) as usize + 1 + usize::from(last % out_rate != 0)
}

/// Map interleaved samples between channel layouts (mono <-> stereo)
fn remap_channels(input: &[i16], in_channels: u16, out_channels: u16, out: &mut Vec<i16>) {
    out.clear();
    match (in_channels, out_channels) {
        (1, 2) => out.extend(input.iter().flat_map(|&s| [s, s])),
        (2, 1) => out.extend(
            input
                .chunks_exact(2)
                .map(|pair| ((i32::from(pair[0]) + i32::from(pair[1])) / 2) as i16),
        ),
        _ => {
            let whole = input.len() - input.len() % in_channels as usize;
            out.extend_from_slice(&input[..whole]);
        }
    }
}

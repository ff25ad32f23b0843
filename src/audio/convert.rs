//! Sample format conversion

/// Converts an f32 sample in [-1.0, 1.0] to i16, clamping out-of-range input.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts an i16 sample to f32 in [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

/// Converts i16 samples into an existing f32 buffer.
pub fn i16_to_f32_into(input: &[i16], out: &mut Vec<f32>) {
    out.clear();
    out.extend(input.iter().map(|&s| i16_to_f32(s)));
}

/// Rescales an integer sample of `bits` width to i16.
#[inline]
pub fn int_to_i16(sample: i32, bits: u16) -> i16 {
    match bits {
        0..=16 => (sample << (16 - bits.max(1))) as i16,
        _ => (sample >> (bits - 16)) as i16,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_to_i16_full_range() {
        assert_eq!(f32_to_i16(1.0), 32767);
        assert_eq!(f32_to_i16(-1.0), -32767);
        assert_eq!(f32_to_i16(0.0), 0);
    }

    #[test]
    fn test_f32_to_i16_clamping() {
        assert_eq!(f32_to_i16(2.0), 32767);
        assert_eq!(f32_to_i16(-2.0), -32768);
    }

    #[test]
    fn test_into_reuses_buffer() {
        let mut floats = vec![0.25f32; 10];
        i16_to_f32_into(&[-32768, 0], &mut floats);
        assert_eq!(floats, vec![-1.0, 0.0]);
    }

    #[test]
    fn test_int_to_i16() {
        assert_eq!(int_to_i16(127, 8), 127 << 8);
        assert_eq!(int_to_i16(-1000, 16), -1000);
        assert_eq!(int_to_i16(0x7fffff, 24), 0x7fff);
    }
}

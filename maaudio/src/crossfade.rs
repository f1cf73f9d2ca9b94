use bytes::{Bytes, BytesMut};
use std::f64::consts::FRAC_PI_2;
use thiserror::Error;
use tracing::trace;

/// Errors from the raw-PCM crossfade.
#[derive(Debug, Error)]
pub enum CrossfadeError {
    /// Only 16/24/32-bit little-endian PCM is supported.
    #[error("unsupported bit depth for crossfade: {0}")]
    UnsupportedBitDepth(u8),
}

/// Blends the head of the next track into the tail of the previous one
/// with equal-power (sine/cosine) gain curves.
///
/// Both parts are raw interleaved little-endian stereo PCM at `bit_depth`.
/// The blend covers the overlapping frames of the two parts; when the
/// fade-out part is shorter than the fade-in part (track shorter than the
/// crossfade window), the fade-in remainder passes through unchanged. The
/// output length always equals the fade-in part length, which keeps the
/// flow stream's byte accounting exact.
pub fn crossfade_pcm_parts(
    fade_in_part: &[u8],
    fade_out_part: &[u8],
    bit_depth: u8,
    sample_rate: u32,
) -> Result<Bytes, CrossfadeError> {
    let bytes_per_sample = match bit_depth {
        16 => 2usize,
        24 => 3,
        32 => 4,
        other => return Err(CrossfadeError::UnsupportedBitDepth(other)),
    };
    let frame_size = bytes_per_sample * 2;

    let in_frames = fade_in_part.len() / frame_size;
    let out_frames = fade_out_part.len() / frame_size;
    let blend_frames = in_frames.min(out_frames);

    trace!(
        "Crossfading {:.3}s at {} Hz / {} bit",
        blend_frames as f64 / sample_rate as f64,
        sample_rate,
        bit_depth
    );

    let mut output = BytesMut::with_capacity(fade_in_part.len());
    for i in 0..blend_frames {
        // Sample gains at the frame center so first/last frames are not
        // exactly 0/1 and the summed power stays flat across the window.
        let t = (i as f64 + 0.5) / blend_frames as f64;
        let gain_in = (t * FRAC_PI_2).sin();
        let gain_out = (t * FRAC_PI_2).cos();

        for ch in 0..2 {
            let offset = (i * 2 + ch) * bytes_per_sample;
            let sample_in = read_sample(&fade_in_part[offset..], bytes_per_sample);
            let sample_out = read_sample(&fade_out_part[offset..], bytes_per_sample);
            let mixed = sample_in * gain_in + sample_out * gain_out;
            write_sample(&mut output, mixed, bytes_per_sample);
        }
    }

    // Fade-in remainder (and any trailing partial frame) passes through.
    output.extend_from_slice(&fade_in_part[blend_frames * frame_size..]);

    Ok(output.freeze())
}

fn read_sample(buf: &[u8], bytes_per_sample: usize) -> f64 {
    match bytes_per_sample {
        2 => i16::from_le_bytes([buf[0], buf[1]]) as f64,
        3 => {
            let value =
                (buf[0] as i32) | ((buf[1] as i32) << 8) | (((buf[2] as i8) as i32) << 16);
            value as f64
        }
        _ => i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64,
    }
}

fn write_sample(output: &mut BytesMut, value: f64, bytes_per_sample: usize) {
    match bytes_per_sample {
        2 => {
            let clamped = value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
            output.extend_from_slice(&clamped.to_le_bytes());
        }
        3 => {
            let clamped = value.round().clamp(-8_388_608.0, 8_388_607.0) as i32;
            output.extend_from_slice(&[
                clamped as u8,
                (clamped >> 8) as u8,
                (clamped >> 16) as u8,
            ]);
        }
        _ => {
            let clamped = value.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32;
            output.extend_from_slice(&clamped.to_le_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant_part_i16(value: i16, frames: usize) -> Vec<u8> {
        let mut part = Vec::with_capacity(frames * 4);
        for _ in 0..frames * 2 {
            part.extend_from_slice(&value.to_le_bytes());
        }
        part
    }

    fn sample_i16(buf: &[u8], index: usize) -> i16 {
        i16::from_le_bytes([buf[index * 2], buf[index * 2 + 1]])
    }

    #[test]
    fn test_output_length_equals_fade_in() {
        let fade_in = constant_part_i16(1000, 480);
        let fade_out = constant_part_i16(-1000, 480);
        let result = crossfade_pcm_parts(&fade_in, &fade_out, 16, 48000).unwrap();
        assert_eq!(result.len(), fade_in.len());
    }

    #[test]
    fn test_endpoints_follow_gain_curves() {
        let frames = 1000;
        let fade_in = constant_part_i16(10000, frames);
        let fade_out = constant_part_i16(20000, frames);
        let result = crossfade_pcm_parts(&fade_in, &fade_out, 16, 48000).unwrap();

        // First frame is almost pure fade-out, last almost pure fade-in.
        let first = sample_i16(&result, 0);
        let last = sample_i16(&result, (frames - 1) * 2);
        assert!((first as i32 - 20000).abs() < 150, "first = {first}");
        assert!((last as i32 - 10000).abs() < 150, "last = {last}");
    }

    #[test]
    fn test_equal_power_midpoint() {
        // At the window center both gains are sqrt(2)/2; blending two equal
        // constant signals yields sqrt(2) times the input there.
        let frames = 101;
        let fade_in = constant_part_i16(10000, frames);
        let fade_out = constant_part_i16(10000, frames);
        let result = crossfade_pcm_parts(&fade_in, &fade_out, 16, 44100).unwrap();
        let mid = sample_i16(&result, (frames / 2) * 2) as f64;
        assert!((mid - 10000.0 * std::f64::consts::SQRT_2).abs() < 50.0, "mid = {mid}");
    }

    #[test]
    fn test_short_fade_out_passes_remainder_through() {
        let fade_in = constant_part_i16(5000, 100);
        let fade_out = constant_part_i16(-5000, 40);
        let result = crossfade_pcm_parts(&fade_in, &fade_out, 16, 48000).unwrap();
        assert_eq!(result.len(), fade_in.len());
        // Beyond the overlap the fade-in bytes are untouched.
        assert_eq!(&result[40 * 4..], &fade_in[40 * 4..]);
    }

    #[test]
    fn test_24bit_single_frame_blend() {
        // One blend frame samples both gains at t = 0.5 (cos = sin ≈ 0.7071).
        let mut fade_in = Vec::new();
        let mut fade_out = Vec::new();
        for value in [-1_000_000i32, -1_000_000] {
            fade_in.extend_from_slice(&[value as u8, (value >> 8) as u8, (value >> 16) as u8]);
        }
        for value in [2_000_000i32, 2_000_000] {
            fade_out.extend_from_slice(&[value as u8, (value >> 8) as u8, (value >> 16) as u8]);
        }
        let result = crossfade_pcm_parts(&fade_in, &fade_out, 24, 48000).unwrap();
        assert_eq!(result.len(), 6);

        let decoded = (result[0] as i32)
            | ((result[1] as i32) << 8)
            | (((result[2] as i8) as i32) << 16);
        let expected = (1_000_000.0 * std::f64::consts::FRAC_1_SQRT_2).round() as i32;
        assert!((decoded - expected).abs() <= 1, "decoded = {decoded}");
    }

    #[test]
    fn test_clamping_on_full_scale_inputs() {
        let fade_in = constant_part_i16(i16::MAX, 50);
        let fade_out = constant_part_i16(i16::MAX, 50);
        let result = crossfade_pcm_parts(&fade_in, &fade_out, 16, 48000).unwrap();
        for i in 0..100 {
            // Mid-window sums exceed full scale and must clamp, not wrap.
            assert!(sample_i16(&result, i) > 0);
        }
    }

    #[test]
    fn test_unsupported_bit_depth() {
        let err = crossfade_pcm_parts(&[0u8; 8], &[0u8; 8], 8, 48000).unwrap_err();
        assert!(matches!(err, CrossfadeError::UnsupportedBitDepth(8)));
    }
}

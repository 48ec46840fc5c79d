//! 16-bit little-endian PCM conversion between the client's layout and the
//! engine's fixed 24 kHz mono.

use std::ops::RangeInclusive;

/// Client PCM rate used unless configured otherwise.
pub const CLIENT_PCM_RATE: u32 = 16_000;

/// Client rates the converter accepts.
pub const SUPPORTED_CLIENT_RATES: RangeInclusive<u32> = 8_000..=48_000;

/// Convert interleaved PCM at any rate and channel count to mono `to_rate`.
///
/// A trailing odd byte and a trailing partial frame are dropped.
#[must_use]
pub fn convert(audio: &[u8], from_rate: u32, channels: u16, to_rate: u32) -> Vec<u8> {
    if from_rate == to_rate && channels == 1 {
        return audio[..audio.len() & !1].to_vec();
    }
    let mono = downmix(&decode(audio), channels);
    encode(&resample(&mono, from_rate, to_rate))
}

fn decode(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

fn encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[allow(clippy::cast_possible_truncation)]
fn downmix(samples: &[i16], channels: u16) -> Vec<i16> {
    let channels = usize::from(channels.max(1));
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| i32::from(s)).sum();
            // The mean of i16 values always fits in i16.
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Linear-interpolation resample of mono samples.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }
    let out_len = (samples.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let step = f64::from(from_rate) / f64::from(to_rate);
    let last = samples.len() - 1;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos as usize).min(last);
            let frac = pos - idx as f64;
            let a = f64::from(samples[idx]);
            let b = f64::from(samples[(idx + 1).min(last)]);
            (a + (b - a) * frac).round() as i16
        })
        .collect()
}
